//! Rendering of the Ansible inventory handed to the configuration runner.
//!
//! The document is YAML written in its JSON subset: every scalar goes through
//! `serde_json` escaping, key order is fixed by struct declaration order, and
//! the output always ends in a newline. Identical inputs therefore render to
//! identical bytes, which the run trigger depends on.

use crate::provision::descriptor::ResourceDescriptor;
use crate::provision::fsutil;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Deployment settings that are the same for every host in a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentParams {
    pub deploy_user: Option<String>,
    pub domain: Option<String>,
    pub repository_url: Option<String>,
    pub working_directory: Option<String>,
}

impl DeploymentParams {
    fn working_directory_for(&self, deploy_user: &str) -> String {
        match self.working_directory.as_deref() {
            Some(dir) if !dir.trim().is_empty() => dir.to_string(),
            _ => format!("/home/{deploy_user}/app"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),
    #[error("failed to encode inventory: {0}")]
    Encode(String),
}

/// Rendered inventory bytes plus their digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryRecord {
    content: String,
    sha256: String,
}

impl InventoryRecord {
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.content.as_bytes()
    }

    /// Lowercase hex SHA-256 of [`Self::content`].
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub async fn write_to(&self, path: &Path) -> io::Result<()> {
        fsutil::write_atomic(path, self.as_bytes()).await
    }
}

#[derive(Serialize)]
struct InventoryDocument<'a> {
    all: InventoryGroup<'a>,
}

#[derive(Serialize)]
struct InventoryGroup<'a> {
    hosts: BTreeMap<&'a str, HostVars<'a>>,
    vars: GroupVars<'a>,
}

#[derive(Serialize)]
struct HostVars<'a> {
    ansible_host: &'a str,
    ansible_user: &'a str,
    ansible_ssh_private_key_file: String,
    private_address: &'a str,
}

#[derive(Serialize)]
struct GroupVars<'a> {
    deploy_user: &'a str,
    domain_name: &'a str,
    repository_url: &'a str,
    working_directory: String,
}

/// Build the inventory for `descriptor`. Pure: no I/O, no clock, no env.
///
/// Only absent (or blank) required values are errors. Values that are present
/// but look wrong are passed through for the runner to reject.
pub fn render(
    descriptor: &ResourceDescriptor,
    params: &DeploymentParams,
) -> Result<InventoryRecord, RenderError> {
    let resource_id = required("resource_id", Some(&descriptor.resource_id))?;
    let public_address = required("public_address", Some(&descriptor.public_address))?;
    let admin_principal = required("admin_principal", Some(&descriptor.admin_principal))?;
    let deploy_user = required("deploy_user", params.deploy_user.as_ref())?;
    let domain = required("domain", params.domain.as_ref())?;
    let repository_url = required("repository_url", params.repository_url.as_ref())?;

    let mut hosts = BTreeMap::new();
    hosts.insert(
        resource_id,
        HostVars {
            ansible_host: public_address,
            ansible_user: admin_principal,
            ansible_ssh_private_key_file: descriptor.credential_reference.display().to_string(),
            private_address: &descriptor.private_address,
        },
    );

    let document = InventoryDocument {
        all: InventoryGroup {
            hosts,
            vars: GroupVars {
                deploy_user,
                domain_name: domain,
                repository_url,
                working_directory: params.working_directory_for(deploy_user),
            },
        },
    };

    let mut content = serde_json::to_string_pretty(&document)
        .map_err(|err| RenderError::Encode(err.to_string()))?;
    content.push('\n');
    let sha256 = hex::encode(Sha256::digest(content.as_bytes()));
    Ok(InventoryRecord { content, sha256 })
}

fn required<'a>(name: &'static str, value: Option<&'a String>) -> Result<&'a str, RenderError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value.as_str()),
        _ => Err(RenderError::MissingParameter(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::descriptor::Generation;
    use serde_json::Value;
    use std::path::PathBuf;

    fn descriptor() -> ResourceDescriptor {
        ResourceDescriptor {
            resource_id: "i-1".into(),
            public_address: "203.0.113.5".into(),
            private_address: "10.0.1.7".into(),
            admin_principal: "ubuntu".into(),
            credential_reference: PathBuf::from("/home/ci/.ssh/todo.pem"),
            generation: Generation::from("g1"),
        }
    }

    fn params() -> DeploymentParams {
        DeploymentParams {
            deploy_user: Some("deploy".into()),
            domain: Some("example.test".into()),
            repository_url: Some("https://git.example.test/todo.git".into()),
            working_directory: None,
        }
    }

    #[test]
    fn render_is_byte_identical_for_identical_inputs() {
        let first = render(&descriptor(), &params()).unwrap();
        let second = render(&descriptor(), &params()).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(first.sha256(), second.sha256());
        assert!(first.content().ends_with("}\n"));
    }

    #[test]
    fn render_places_fields_where_ansible_expects_them() {
        let record = render(&descriptor(), &params()).unwrap();
        let parsed: Value = serde_json::from_str(record.content()).unwrap();

        let host = &parsed["all"]["hosts"]["i-1"];
        assert_eq!(host["ansible_host"], "203.0.113.5");
        assert_eq!(host["ansible_user"], "ubuntu");
        assert_eq!(host["ansible_ssh_private_key_file"], "/home/ci/.ssh/todo.pem");
        assert_eq!(host["private_address"], "10.0.1.7");

        let vars = &parsed["all"]["vars"];
        assert_eq!(vars["deploy_user"], "deploy");
        assert_eq!(vars["domain_name"], "example.test");
        assert_eq!(vars["repository_url"], "https://git.example.test/todo.git");
        assert_eq!(vars["working_directory"], "/home/deploy/app");
    }

    #[test]
    fn explicit_working_directory_wins() {
        let mut params = params();
        params.working_directory = Some("/srv/todo".into());
        let record = render(&descriptor(), &params).unwrap();
        let parsed: Value = serde_json::from_str(record.content()).unwrap();
        assert_eq!(parsed["all"]["vars"]["working_directory"], "/srv/todo");
    }

    #[test]
    fn missing_domain_is_a_render_error() {
        let mut params = params();
        params.domain = None;
        assert_eq!(
            render(&descriptor(), &params),
            Err(RenderError::MissingParameter("domain"))
        );

        params.domain = Some("   ".into());
        assert_eq!(
            render(&descriptor(), &params),
            Err(RenderError::MissingParameter("domain"))
        );
    }

    #[test]
    fn missing_address_is_a_render_error() {
        let mut descriptor = descriptor();
        descriptor.public_address.clear();
        assert_eq!(
            render(&descriptor, &params()),
            Err(RenderError::MissingParameter("public_address"))
        );
    }

    #[test]
    fn hostile_values_are_escaped_not_rejected() {
        let mut params = params();
        params.domain = Some("evil\"\n  injected: true".into());
        let record = render(&descriptor(), &params).unwrap();
        let parsed: Value = serde_json::from_str(record.content()).unwrap();
        assert_eq!(
            parsed["all"]["vars"]["domain_name"],
            "evil\"\n  injected: true"
        );
        assert!(parsed["all"]["vars"].get("injected").is_none());
    }

    #[test]
    fn changing_domain_changes_digest() {
        let first = render(&descriptor(), &params()).unwrap();
        let mut params = params();
        params.domain = Some("other.test".into());
        let second = render(&descriptor(), &params).unwrap();
        assert_ne!(first.sha256(), second.sha256());
    }

    #[test]
    fn generation_is_not_part_of_the_inventory() {
        let first = render(&descriptor(), &params()).unwrap();
        let mut replaced = descriptor();
        replaced.generation = Generation::from("g2");
        let second = render(&replaced, &params()).unwrap();
        assert_eq!(first, second);
    }
}
