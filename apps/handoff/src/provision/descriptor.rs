use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// Token that changes whenever the underlying compute resource is replaced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(String);

impl Generation {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Generation {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// What the resource provider reports about one provisioned host.
///
/// Read-only for the coordinator; a new provisioning cycle produces a new
/// descriptor rather than mutating this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub resource_id: String,
    pub public_address: String,
    pub private_address: String,
    pub admin_principal: String,
    pub credential_reference: PathBuf,
    pub generation: Generation,
}

impl ResourceDescriptor {
    /// Name safe to embed in work-directory file names.
    pub fn file_stem(&self) -> String {
        file_stem_for(&self.resource_id)
    }

    /// `user@host` as understood by ssh.
    pub fn ssh_destination(&self) -> String {
        format!("{}@{}", self.admin_principal, self.public_address)
    }
}

pub fn file_stem_for(resource_id: &str) -> String {
    let sanitized: String = resource_id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let stem = sanitized.trim_start_matches('.');
    if !stem.is_empty() && stem == resource_id {
        return stem.to_string();
    }
    // Rewritten ids get a digest of the raw id so `a:b` and `a_b` stay apart.
    let digest = hex::encode(Sha256::digest(resource_id.as_bytes()));
    let stem = if stem.is_empty() { "resource" } else { stem };
    format!("{stem}-{}", &digest[..8])
}
