//! Manifest loading and path resolution.
//!
//! Supports CERTDEPLOY_HOME env var override for testing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::plan::{PermissionSet, Permissions};
use crate::platform::{PlatformPolicy, PlatformTrustConfig};
use crate::resolve::SlotOverride;
use crate::slot::ArtifactSlot;

/// Paths for the certdeploy data directory.
#[derive(Debug, Clone)]
pub struct DeployPaths {
    pub home: PathBuf,
    pub manifest: PathBuf,
    pub source_root: PathBuf,
}

impl DeployPaths {
    /// Build paths from base directory (e.g. ProjectDirs data dir or CERTDEPLOY_HOME).
    pub fn from_base(base: PathBuf) -> Self {
        let manifest = base.join("certdeploy.toml");
        let source_root = base.join("certificates");
        Self {
            home: base,
            manifest,
            source_root,
        }
    }

    /// Paths for testing: use a temp dir as base.
    pub fn for_test(base: impl AsRef<Path>) -> Self {
        Self::from_base(base.as_ref().to_path_buf())
    }

    /// Get default paths (respects CERTDEPLOY_HOME).
    pub fn default_paths() -> Self {
        let base = if let Ok(home) = std::env::var("CERTDEPLOY_HOME") {
            PathBuf::from(home)
        } else if let Some(dirs) = directories::ProjectDirs::from("org", "certdeploy", "certdeploy") {
            dirs.data_dir().to_path_buf()
        } else {
            PathBuf::from(".certdeploy")
        };
        Self::from_base(base)
    }
}

fn yes() -> bool {
    true
}

/// Per-certificate options. Cert and key install by default; the rest do not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleConfig {
    #[serde(default = "yes")]
    pub install_cert: bool,
    #[serde(default = "yes")]
    pub install_key: bool,
    #[serde(default)]
    pub install_pem: bool,
    #[serde(default)]
    pub install_intermediate: bool,
    #[serde(default)]
    pub install_ca: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pem_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pem_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_dir: Option<String>,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            install_cert: true,
            install_key: true,
            install_pem: false,
            install_intermediate: false,
            install_ca: false,
            cert_file: None,
            key_file: None,
            pem_file: None,
            intermediate_file: None,
            ca_file: None,
            cert_dir: None,
            key_dir: None,
            pem_dir: None,
            intermediate_dir: None,
            ca_dir: None,
        }
    }
}

impl BundleConfig {
    /// Everything disabled: plans removal of all five slots.
    pub fn uninstall() -> Self {
        Self {
            install_cert: false,
            install_key: false,
            ..Self::default()
        }
    }

    pub fn wanted(&self, slot: ArtifactSlot) -> bool {
        match slot {
            ArtifactSlot::Cert => self.install_cert,
            ArtifactSlot::Key => self.install_key,
            ArtifactSlot::Pem => self.install_pem,
            ArtifactSlot::Intermediate => self.install_intermediate,
            ArtifactSlot::Ca => self.install_ca,
        }
    }

    pub fn set_wanted(&mut self, slot: ArtifactSlot, wanted: bool) {
        match slot {
            ArtifactSlot::Cert => self.install_cert = wanted,
            ArtifactSlot::Key => self.install_key = wanted,
            ArtifactSlot::Pem => self.install_pem = wanted,
            ArtifactSlot::Intermediate => self.install_intermediate = wanted,
            ArtifactSlot::Ca => self.install_ca = wanted,
        }
    }

    pub fn override_for(&self, slot: ArtifactSlot) -> SlotOverride {
        let (filename, directory) = match slot {
            ArtifactSlot::Cert => (&self.cert_file, &self.cert_dir),
            ArtifactSlot::Key => (&self.key_file, &self.key_dir),
            ArtifactSlot::Pem => (&self.pem_file, &self.pem_dir),
            ArtifactSlot::Intermediate => (&self.intermediate_file, &self.intermediate_dir),
            ArtifactSlot::Ca => (&self.ca_file, &self.ca_dir),
        };
        SlotOverride {
            filename: filename.clone(),
            directory: directory.clone(),
        }
    }
}

/// `[permissions]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub owner: String,
    pub group: String,
    pub mode: String,
    pub key_owner: String,
    pub key_group: String,
    pub key_mode: String,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        let set = PermissionSet::default();
        Self {
            owner: set.standard.owner,
            group: set.standard.group,
            mode: set.standard.mode,
            key_owner: set.private.owner,
            key_group: set.private.group,
            key_mode: set.private.mode,
        }
    }
}

impl PermissionsConfig {
    pub fn to_set(&self) -> PermissionSet {
        PermissionSet {
            standard: Permissions::new(&self.owner, &self.group, &self.mode),
            private: Permissions::new(&self.key_owner, &self.key_group, &self.key_mode),
        }
    }
}

/// Main certdeploy.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Platform family of this host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    /// Extra platform families, merged over the built-in ones.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub platforms: BTreeMap<String, PlatformTrustConfig>,
    #[serde(default)]
    pub certificates: BTreeMap<String, BundleConfig>,
}

impl Config {
    /// Load config from path (with shared lock when file exists).
    pub fn load(path: &Path) -> Result<Config> {
        if path.is_file() {
            let mut file = fs::OpenOptions::new()
                .read(true)
                .open(path)
                .with_context(|| format!("open manifest: {}", path.display()))?;
            fs2::FileExt::lock_shared(&file)?;
            let mut s = String::new();
            file.read_to_string(&mut s)?;
            let cfg: Config = toml::from_str(&s)
                .with_context(|| format!("parse manifest: {}", path.display()))?;
            cfg.validate()?;
            Ok(cfg)
        } else {
            Ok(Config::default())
        }
    }

    /// Save config to path (with exclusive lock). Creates parent dirs if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(p) = path.parent() {
            fs::create_dir_all(p)?;
        }
        let s = toml::to_string_pretty(self)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("open manifest: {}", path.display()))?;
        // Truncate only under the lock, or a concurrent load reads an empty manifest.
        fs2::FileExt::lock_exclusive(&file)?;
        file.set_len(0)?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for name in self.certificates.keys() {
            validate_name(name)?;
        }
        for (family, platform) in &self.platforms {
            if platform.rebuild_command.is_empty() {
                anyhow::bail!("platform '{family}': rebuild_command must not be empty");
            }
        }
        Ok(())
    }

    /// Built-in platform table plus the manifest's extra families.
    pub fn policy(&self) -> PlatformPolicy {
        self.platforms
            .iter()
            .fold(PlatformPolicy::builtin(), |policy, (family, cfg)| {
                policy.with_family(family.clone(), cfg.clone())
            })
    }

    /// Configured source root, else the data dir's `certificates/`.
    pub fn source_root(&self, paths: &DeployPaths) -> String {
        self.source_root
            .clone()
            .unwrap_or_else(|| paths.source_root.to_string_lossy().into_owned())
    }
}

/// Validate a certificate name: it becomes a path component on the host.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("empty certificate name");
    }
    if name == "." || name.contains("..") {
        anyhow::bail!("invalid certificate name '{name}': relative path segment");
    }
    for c in name.chars() {
        if c == '/' || c == '\\' || c == '\0' {
            anyhow::bail!("invalid certificate name '{name}': illegal char {c:?}");
        }
    }
    Ok(())
}
