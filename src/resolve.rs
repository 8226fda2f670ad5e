//! Destination and source path resolution for artifact slots.

use serde::Serialize;

use crate::platform::PlatformTrustConfig;
use crate::slot::ArtifactSlot;

/// Per-slot overrides from the bundle configuration. Each field is independent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotOverride {
    pub filename: Option<String>,
    pub directory: Option<String>,
}

/// Where a slot's artifact lives on the host and where it comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPath {
    pub directory: String,
    pub filename: String,
    /// `{source_root}/{name}/{filename}`; never overridable.
    pub source: String,
}

impl ResolvedPath {
    /// Full destination path.
    pub fn path(&self) -> String {
        join(&self.directory, &self.filename)
    }
}

/// Default filename for a slot: `{name}.{extension}`.
pub fn default_filename(name: &str, slot: ArtifactSlot) -> String {
    format!("{name}.{}", slot.extension())
}

/// Resolve a slot's directory, filename and source locator. Pure.
pub fn resolve(
    name: &str,
    slot: ArtifactSlot,
    over: &SlotOverride,
    platform: &PlatformTrustConfig,
    source_root: &str,
) -> ResolvedPath {
    let filename = over
        .filename
        .clone()
        .unwrap_or_else(|| default_filename(name, slot));
    let directory = over
        .directory
        .clone()
        .unwrap_or_else(|| platform.standard_dir(slot).to_string());
    let source = join(&join(source_root, name), &filename);
    ResolvedPath {
        directory,
        filename,
        source,
    }
}

/// Join two path segments with exactly one `/`, keeping URL-style roots intact.
pub(crate) fn join(dir: &str, file: &str) -> String {
    if dir.is_empty() {
        return file.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), file.trim_start_matches('/'))
}
