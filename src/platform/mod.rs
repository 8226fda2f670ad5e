//! Platform policy: which trust-store mechanics a platform family uses.
//!
//! Planning never branches on the platform itself; it looks the family up
//! here once and carries the resulting [`PlatformTrustConfig`] around.

use std::collections::BTreeMap;

#[cfg(unix)]
pub mod unix;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::PlanError;
use crate::slot::ArtifactSlot;

/// Directory `update-ca-certificates` reads registered certificates from.
pub const DEBIAN_CA_ROOT: &str = "/usr/share/ca-certificates";

/// Resolved platform identity, as supplied by fact detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformId {
    pub family: String,
    /// Operating-system name (e.g. "Nexenta"); used in error messages.
    pub os_name: Option<String>,
}

impl PlatformId {
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            os_name: None,
        }
    }

    pub fn with_os_name(mut self, os_name: impl Into<String>) -> Self {
        self.os_name = Some(os_name.into());
        self
    }
}

/// Trust-store mechanics and standard directories for one platform family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformTrustConfig {
    /// Directory registered intermediate/CA copies are placed in.
    pub trust_dir: String,
    /// Root the list file's entries are relative to.
    #[serde(default = "default_trust_root")]
    pub trust_root: String,
    /// File listing the registered certificates, one per line.
    pub list_file: String,
    pub rebuild_command: Vec<String>,
    /// When set, runs once before the rebuild.
    #[serde(default)]
    pub reconfigure_command: Option<Vec<String>>,
    #[serde(default = "default_cert_dir")]
    pub cert_dir: String,
    #[serde(default = "default_key_dir")]
    pub key_dir: String,
    #[serde(default = "default_cert_dir")]
    pub pem_dir: String,
}

fn default_trust_root() -> String {
    DEBIAN_CA_ROOT.to_string()
}

fn default_cert_dir() -> String {
    "/etc/ssl/certs".to_string()
}

fn default_key_dir() -> String {
    "/etc/ssl/private".to_string()
}

impl PlatformTrustConfig {
    /// Debian family: ca-certificates with a managed subdirectory.
    pub fn debian() -> Self {
        Self {
            trust_dir: format!("{DEBIAN_CA_ROOT}/certdeploy"),
            trust_root: default_trust_root(),
            list_file: "/etc/ca-certificates.conf".to_string(),
            rebuild_command: vec!["update-ca-certificates".to_string()],
            reconfigure_command: None,
            cert_dir: default_cert_dir(),
            key_dir: default_key_dir(),
            pem_dir: default_cert_dir(),
        }
    }

    pub fn requires_reconfigure_before_rebuild(&self) -> bool {
        self.reconfigure_command.is_some()
    }

    /// Standard directory for a slot when none is configured.
    pub fn standard_dir(&self, slot: ArtifactSlot) -> &str {
        match slot {
            ArtifactSlot::Cert => &self.cert_dir,
            ArtifactSlot::Key => &self.key_dir,
            ArtifactSlot::Pem => &self.pem_dir,
            ArtifactSlot::Intermediate | ArtifactSlot::Ca => &self.trust_dir,
        }
    }

    /// List-file record for a registered copy: its path relative to `trust_root`.
    pub fn list_line(&self, registered_path: &str) -> String {
        let root = self.trust_root.trim_end_matches('/');
        registered_path
            .strip_prefix(root)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(registered_path)
            .to_string()
    }
}

/// Lookup table from platform family to trust-store mechanics.
#[derive(Debug, Clone)]
pub struct PlatformPolicy {
    families: BTreeMap<String, PlatformTrustConfig>,
}

impl Default for PlatformPolicy {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PlatformPolicy {
    /// Built-in families.
    pub fn builtin() -> Self {
        let mut families = BTreeMap::new();
        families.insert("Debian".to_string(), PlatformTrustConfig::debian());
        Self { families }
    }

    /// Add or replace a family.
    pub fn with_family(mut self, family: impl Into<String>, config: PlatformTrustConfig) -> Self {
        self.families.insert(family.into(), config);
        self
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.families.keys().map(String::as_str)
    }

    /// Resolve a platform to its trust config, or fail with the platform's name.
    pub fn resolve(&self, platform: &PlatformId) -> Result<&PlatformTrustConfig, PlanError> {
        self.families
            .get(&platform.family)
            .ok_or_else(|| PlanError::UnsupportedPlatform {
                family: platform.family.clone(),
                name: platform
                    .os_name
                    .clone()
                    .unwrap_or_else(|| platform.family.clone()),
            })
    }
}

/// Trait for the host commands that refresh the system trust store.
pub trait TrustStore: Send + Sync {
    /// Reconfigure the trust-store package (runs before a rebuild where required).
    fn reconfigure(&self, command: &[String]) -> Result<()>;
    /// Rebuild the system trust store from the registered certificates.
    fn rebuild(&self, command: &[String]) -> Result<()>;
}

/// Get platform TrustStore implementation.
pub fn default_trust_store() -> Box<dyn TrustStore> {
    #[cfg(unix)]
    return Box::new(unix::CommandTrustStore);

    #[cfg(not(unix))]
    return Box::new(UnavailableTrustStore);
}

#[cfg(not(unix))]
struct UnavailableTrustStore;

#[cfg(not(unix))]
impl TrustStore for UnavailableTrustStore {
    fn reconfigure(&self, _command: &[String]) -> Result<()> {
        anyhow::bail!("trust store commands are only available on unix hosts")
    }

    fn rebuild(&self, _command: &[String]) -> Result<()> {
        anyhow::bail!("trust store commands are only available on unix hosts")
    }
}
