//! Shared test helpers.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use certdeploy::config::BundleConfig;
use certdeploy::converge::{ConvergencePass, PassOutcome};
use certdeploy::platform::{PlatformId, PlatformPolicy, PlatformTrustConfig, TrustStore};
use tempfile::TempDir;

pub const NAME: &str = "www.website.com";
pub const SOURCE_ROOT: &str = "/srv/ssl_certificates";
pub const TRUST_DIR: &str = "/usr/share/ca-certificates/certdeploy";
pub const LIST_FILE: &str = "/etc/ca-certificates.conf";
pub const REBUILD: &str = "update-ca-certificates";

/// Create a scratch directory inside the workspace.
pub fn temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("certdeploy_test_")
        .tempdir_in(std::env::current_dir().unwrap_or_else(|_| std::path::Path::new(".").into()))
        .expect("temp dir")
}

pub fn debian() -> PlatformId {
    PlatformId::new("Debian")
}

/// Debian-like family that reconfigures the package before rebuilding.
pub fn reconfiguring_family() -> PlatformTrustConfig {
    PlatformTrustConfig {
        reconfigure_command: Some(vec![
            "dpkg-reconfigure".to_string(),
            "-fnoninteractive".to_string(),
            "ca-certificates".to_string(),
        ]),
        ..PlatformTrustConfig::debian()
    }
}

pub fn pass() -> ConvergencePass {
    ConvergencePass::new(PlatformPolicy::builtin(), debian(), SOURCE_ROOT)
}

pub fn pass_on(policy: PlatformPolicy, platform: PlatformId) -> ConvergencePass {
    ConvergencePass::new(policy, platform, SOURCE_ROOT)
}

/// Plan a single bundle named NAME on Debian.
pub fn plan_one(bundle: BundleConfig) -> PassOutcome {
    plan_many(&[(NAME, bundle)])
}

pub fn plan_many(bundles: &[(&str, BundleConfig)]) -> PassOutcome {
    pass().run(&bundles_map(bundles))
}

pub fn bundles_map(bundles: &[(&str, BundleConfig)]) -> BTreeMap<String, BundleConfig> {
    bundles
        .iter()
        .map(|(name, b)| (name.to_string(), b.clone()))
        .collect()
}

/// Expected source locator for a certificate's file.
pub fn source(name: &str, filename: &str) -> String {
    format!("{SOURCE_ROOT}/{name}/{filename}")
}

/// Write a source artifact under `{root}/{name}/{filename}`.
pub fn write_source(root: &Path, name: &str, filename: &str, content: &str) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(filename), content).unwrap();
}

/// Records reconfigure/rebuild calls.
#[derive(Default)]
pub struct MockTrustStore {
    calls: Mutex<Vec<String>>,
}

impl MockTrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl TrustStore for MockTrustStore {
    fn reconfigure(&self, command: &[String]) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("reconfigure: {}", command.join(" ")));
        Ok(())
    }

    fn rebuild(&self, command: &[String]) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("rebuild: {}", command.join(" ")));
        Ok(())
    }
}
