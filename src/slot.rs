//! Artifact slots: the five roles a file can play in a certificate bundle.

use serde::{Deserialize, Serialize};

/// One artifact role within a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactSlot {
    Cert,
    Key,
    Pem,
    Intermediate,
    Ca,
}

impl ArtifactSlot {
    /// All slots in planning order.
    pub const ALL: [ArtifactSlot; 5] = [
        ArtifactSlot::Cert,
        ArtifactSlot::Key,
        ArtifactSlot::Pem,
        ArtifactSlot::Intermediate,
        ArtifactSlot::Ca,
    ];

    /// File extension used for the default filename.
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactSlot::Cert => "crt",
            ArtifactSlot::Key => "key",
            ArtifactSlot::Pem => "pem",
            ArtifactSlot::Intermediate => "intermediate.crt",
            ArtifactSlot::Ca => "ca.crt",
        }
    }

    /// Slots whose artifacts get registered in the system trust store.
    pub fn is_trust_anchor(self) -> bool {
        matches!(self, ArtifactSlot::Intermediate | ArtifactSlot::Ca)
    }

    /// Private key material gets restrictive permissions.
    pub fn is_private(self) -> bool {
        self == ArtifactSlot::Key
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactSlot::Cert => "cert",
            ArtifactSlot::Key => "key",
            ArtifactSlot::Pem => "pem",
            ArtifactSlot::Intermediate => "intermediate",
            ArtifactSlot::Ca => "ca",
        }
    }
}

impl std::fmt::Display for ArtifactSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
