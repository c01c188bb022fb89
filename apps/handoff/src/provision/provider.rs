//! Resource provider adapters: where the descriptor comes from.
//!
//! Terraform is the provider in practice. Its `output -json` document maps
//! each output name to `{ "value": ..., "type": ..., "sensitive": ... }`.
//! Flags given on the command line override anything Terraform reported.

use crate::provision::descriptor::{Generation, ResourceDescriptor};
use crate::transport::process::{describe_exit_status, last_line};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to read terraform output {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("terraform output is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("terraform output '{0}' is not a string or number")]
    NotScalar(String),
    #[error("failed to run {program}: {reason}")]
    Command { program: String, reason: String },
}

/// Output names to read from Terraform.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TerraformKeys {
    pub resource_id: String,
    pub public_address: String,
    pub private_address: String,
    pub generation: String,
}

impl Default for TerraformKeys {
    fn default() -> Self {
        Self {
            resource_id: "instance_id".to_string(),
            public_address: "public_ip".to_string(),
            private_address: "private_ip".to_string(),
            generation: "generation".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OutputEntry {
    value: Value,
}

/// Provider-reported fields; everything optional until merged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderReport {
    pub resource_id: Option<String>,
    pub public_address: Option<String>,
    pub private_address: Option<String>,
    pub generation: Option<String>,
}

impl ProviderReport {
    pub fn from_terraform_json(raw: &[u8], keys: &TerraformKeys) -> Result<Self, ProviderError> {
        let outputs: BTreeMap<String, OutputEntry> = serde_json::from_slice(raw)?;
        let lookup = |key: &str| -> Result<Option<String>, ProviderError> {
            match outputs.get(key).map(|entry| &entry.value) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(text)) => Ok(Some(text.clone())),
                Some(Value::Number(number)) => Ok(Some(number.to_string())),
                Some(_) => Err(ProviderError::NotScalar(key.to_string())),
            }
        };
        Ok(Self {
            resource_id: lookup(&keys.resource_id)?,
            public_address: lookup(&keys.public_address)?,
            private_address: lookup(&keys.private_address)?,
            generation: lookup(&keys.generation)?,
        })
    }

    pub async fn from_terraform_file(path: &Path, keys: &TerraformKeys) -> Result<Self, ProviderError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|source| ProviderError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(target: "handoff::provider", path = %path.display(), "read terraform output file");
        Self::from_terraform_json(&raw, keys)
    }

    /// Run `terraform -chdir=<dir> output -json` and parse the result.
    pub async fn from_terraform_dir(
        program: &str,
        dir: &Path,
        keys: &TerraformKeys,
    ) -> Result<Self, ProviderError> {
        let mut command = TokioCommand::new(program);
        command
            .arg(format!("-chdir={}", dir.display()))
            .arg("output")
            .arg("-json")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(target: "handoff::provider", dir = %dir.display(), "reading terraform outputs");
        let output = command.output().await.map_err(|err| ProviderError::Command {
            program: program.to_string(),
            reason: err.to_string(),
        })?;
        if !output.status.success() {
            return Err(ProviderError::Command {
                program: program.to_string(),
                reason: format!(
                    "{}: {}",
                    describe_exit_status(output.status),
                    last_line(&output.stderr)
                ),
            });
        }
        Self::from_terraform_json(&output.stdout, keys)
    }

    /// Fields set in `other` replace ours.
    pub fn overridden_by(self, other: ProviderReport) -> Self {
        Self {
            resource_id: other.resource_id.or(self.resource_id),
            public_address: other.public_address.or(self.public_address),
            private_address: other.private_address.or(self.private_address),
            generation: other.generation.or(self.generation),
        }
    }

    /// Combine with the credentials the operator supplied.
    ///
    /// Without an explicit generation the resource id stands in for it, since
    /// a replaced instance comes back with a new id. Absent fields stay empty
    /// and are reported by the renderer.
    pub fn into_descriptor(
        self,
        admin_principal: String,
        credential_reference: PathBuf,
    ) -> ResourceDescriptor {
        let resource_id = self.resource_id.unwrap_or_default();
        let generation = self
            .generation
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| resource_id.clone());
        ResourceDescriptor {
            resource_id,
            public_address: self.public_address.unwrap_or_default(),
            private_address: self.private_address.unwrap_or_default(),
            admin_principal,
            credential_reference,
            generation: Generation::new(generation),
        }
    }
}
