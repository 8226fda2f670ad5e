//! Apply a plan to the local host.
//!
//! Operations run in dependency order; refresh-only actions run afterwards,
//! once each, and only when something that notifies them actually changed.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::listfile::ListFile;
use crate::plan::{ActionKind, EdgeKind, Ensure, FileOperation, Permissions, Plan, ResourceRef};
use crate::platform::TrustStore;

/// What an apply run did (or would do, for a dry run).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub changed: Vec<ResourceRef>,
    pub unchanged: Vec<ResourceRef>,
    pub failed: Vec<ResourceRef>,
    /// Not attempted because something they require failed.
    pub skipped: Vec<ResourceRef>,
    pub actions_run: Vec<ResourceRef>,
}

impl ApplyReport {
    pub fn is_changed(&self, resource: &ResourceRef) -> bool {
        self.changed.contains(resource)
    }
}

/// Applies plans through the filesystem and a [`TrustStore`].
pub struct Applier<'a> {
    store: &'a dyn TrustStore,
    root: Option<PathBuf>,
    dry_run: bool,
}

impl<'a> Applier<'a> {
    pub fn new(store: &'a dyn TrustStore) -> Self {
        Self {
            store,
            root: None,
            dry_run: false,
        }
    }

    /// Re-root every host path under `root` (tests, chroots, image builds).
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Where a planned path lives on this host.
    pub fn host_path(&self, path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(path.trim_start_matches('/')),
            None => PathBuf::from(path),
        }
    }

    /// Apply `plan`. A failing operation does not stop the run: operations
    /// that require it are skipped, the rest still apply, and actions notified
    /// by what did change still run. The first failure is returned afterwards.
    pub fn apply(&self, plan: &Plan) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();
        let mut errors = Vec::new();
        let mut broken: HashSet<&ResourceRef> = HashSet::new();
        for op in apply_order(plan)? {
            let blocked = plan
                .edges_from(&op.resource)
                .find(|e| e.kind == EdgeKind::Requires && broken.contains(&e.to));
            if let Some(edge) = blocked {
                tracing::warn!(resource = %op.resource, requires = %edge.to, "skipped, dependency failed");
                broken.insert(&op.resource);
                report.skipped.push(op.resource.clone());
                continue;
            }
            match self
                .apply_operation(op)
                .with_context(|| format!("apply {}", op.resource))
            {
                Ok(true) => {
                    tracing::info!(resource = %op.resource, ensure = %op.ensure, dry_run = self.dry_run, "changed");
                    report.changed.push(op.resource.clone());
                }
                Ok(false) => report.unchanged.push(op.resource.clone()),
                Err(e) => {
                    tracing::warn!(resource = %op.resource, error = %format!("{e:#}"), "operation failed");
                    broken.insert(&op.resource);
                    report.failed.push(op.resource.clone());
                    errors.push(e);
                }
            }
        }

        let notified: HashSet<&ResourceRef> = plan
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Notifies && report.changed.contains(&e.from))
            .map(|e| &e.to)
            .collect();
        for action in &plan.actions {
            let runs_before_notified = plan
                .edges_from(&action.resource)
                .any(|e| e.kind == EdgeKind::Before && notified.contains(&e.to));
            if !notified.contains(&action.resource) && !runs_before_notified {
                continue;
            }
            tracing::info!(action = %action.resource, dry_run = self.dry_run, "running trust store action");
            if !self.dry_run {
                let result = match action.kind {
                    ActionKind::Reconfigure => self.store.reconfigure(&action.command),
                    ActionKind::Rebuild => self.store.rebuild(&action.command),
                };
                if let Err(e) = result {
                    errors.push(e.context(format!("run {}", action.resource)));
                    break;
                }
            }
            report.actions_run.push(action.resource.clone());
        }

        let failures = errors.len();
        match errors.into_iter().next() {
            None => Ok(report),
            Some(first) if failures == 1 => Err(first),
            Some(first) => Err(first.context(format!("{failures} errors during apply"))),
        }
    }

    fn apply_operation(&self, op: &FileOperation) -> Result<bool> {
        match (&op.resource, op.ensure) {
            (ResourceRef::File { path }, Ensure::Present) => {
                let source = op
                    .source
                    .as_deref()
                    .with_context(|| format!("no source for {}", op.resource))?;
                self.place_file(&self.host_path(path), source, op.permissions.as_ref())
            }
            (ResourceRef::File { path }, Ensure::Absent) => {
                let target = self.host_path(path);
                if !target.exists() {
                    return Ok(false);
                }
                if !self.dry_run {
                    fs::remove_file(&target)
                        .with_context(|| format!("remove {}", target.display()))?;
                }
                Ok(true)
            }
            (ResourceRef::Directory { path }, Ensure::Present) => {
                let target = self.host_path(path);
                if target.is_dir() {
                    return Ok(false);
                }
                if !self.dry_run {
                    fs::create_dir_all(&target)
                        .with_context(|| format!("create {}", target.display()))?;
                }
                Ok(true)
            }
            (ResourceRef::Directory { path }, Ensure::Absent) => {
                let target = self.host_path(path);
                if !target.is_dir() {
                    return Ok(false);
                }
                if !self.dry_run {
                    fs::remove_dir(&target)
                        .with_context(|| format!("remove {}", target.display()))?;
                }
                Ok(true)
            }
            (ResourceRef::Line { file, line }, ensure) => {
                let list = ListFile::new(self.host_path(file));
                let present = list.contains(line)?;
                let changed = present != (ensure == Ensure::Present);
                if changed && !self.dry_run {
                    match ensure {
                        Ensure::Present => list.ensure_line(line)?,
                        Ensure::Absent => list.remove_line(line)?,
                    };
                }
                Ok(changed)
            }
            (ResourceRef::Exec { .. }, _) => {
                anyhow::bail!("exec resources are actions, not file operations")
            }
        }
    }

    fn place_file(&self, target: &Path, source: &str, permissions: Option<&Permissions>) -> Result<bool> {
        let source_path = source.strip_prefix("file://").unwrap_or(source);
        let content = fs::read(source_path).with_context(|| format!("read source {source}"))?;
        let mode = permissions.map(Permissions::mode_bits).transpose()?;

        let same_content = fs::read(target).map(|c| c == content).unwrap_or(false);
        let same_mode = match mode {
            Some(bits) => mode_matches(target, bits),
            None => true,
        };
        if same_content && same_mode {
            return Ok(false);
        }
        if self.dry_run {
            return Ok(true);
        }

        if let Some(p) = target.parent() {
            fs::create_dir_all(p)?;
        }
        if !same_content {
            let mut tmp = target.as_os_str().to_owned();
            tmp.push(".certdeploy-tmp");
            let tmp = PathBuf::from(tmp);
            fs::write(&tmp, &content).with_context(|| format!("write {}", tmp.display()))?;
            set_mode(&tmp, mode)?;
            fs::rename(&tmp, target).with_context(|| format!("rename into {}", target.display()))?;
        } else {
            set_mode(target, mode)?;
        }
        if let Some(p) = permissions {
            tracing::debug!(path = %target.display(), owner = %p.owner, group = %p.group, "ownership left to the host");
        }
        Ok(true)
    }
}

/// Operations in an order that satisfies every `Requires` edge between them.
/// Ties keep plan order. Fails on a dependency cycle.
pub fn apply_order(plan: &Plan) -> Result<Vec<&FileOperation>> {
    let mut pending: Vec<&FileOperation> = plan.operations.iter().collect();
    let mut done: HashSet<&ResourceRef> = HashSet::new();
    let mut order = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let ready = pending.iter().position(|op| {
            plan.edges_from(&op.resource)
                .filter(|e| e.kind == EdgeKind::Requires)
                .all(|e| done.contains(&e.to) || plan.operation(&e.to).is_none())
        });
        let Some(i) = ready else {
            let stuck: Vec<String> = pending.iter().map(|op| op.resource.to_string()).collect();
            anyhow::bail!("dependency cycle among {}", stuck.join(", "));
        };
        let op = pending.remove(i);
        done.insert(&op.resource);
        order.push(op);
    }
    Ok(order)
}

#[cfg(unix)]
fn mode_matches(path: &Path, bits: u32) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o7777 == bits)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn mode_matches(_path: &Path, _bits: u32) -> bool {
    true
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(bits) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(bits))
            .with_context(|| format!("chmod {}", path.display()))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}
