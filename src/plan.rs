//! Plan model and the per-slot artifact planner.
//!
//! A [`Plan`] is a declarative description of host state: an ordered list of
//! [`FileOperation`]s, the [`Edge`]s between resources, and the refresh-only
//! [`ScheduledAction`]s those edges can trigger. Applying it is someone
//! else's job (see [`crate::apply`]).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PlanError;
use crate::resolve::ResolvedPath;
use crate::slot::ArtifactSlot;

/// Identity of a managed resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceRef {
    File { path: String },
    Directory { path: String },
    Line { file: String, line: String },
    Exec { name: String },
}

impl ResourceRef {
    pub fn file(path: impl Into<String>) -> Self {
        ResourceRef::File { path: path.into() }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        ResourceRef::Directory { path: path.into() }
    }

    pub fn line(file: impl Into<String>, line: impl Into<String>) -> Self {
        ResourceRef::Line {
            file: file.into(),
            line: line.into(),
        }
    }

    pub fn exec(name: impl Into<String>) -> Self {
        ResourceRef::Exec { name: name.into() }
    }

    /// Host path the resource touches (the list file for lines).
    pub fn path(&self) -> Option<&str> {
        match self {
            ResourceRef::File { path } | ResourceRef::Directory { path } => Some(path),
            ResourceRef::Line { file, .. } => Some(file),
            ResourceRef::Exec { .. } => None,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::File { path } => write!(f, "File[{path}]"),
            ResourceRef::Directory { path } => write!(f, "Directory[{path}]"),
            ResourceRef::Line { file, line } => write!(f, "Line[{file}:{line}]"),
            ResourceRef::Exec { name } => write!(f, "Exec[{name}]"),
        }
    }
}

/// Desired state of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    Present,
    Absent,
}

impl Ensure {
    pub fn from_wanted(wanted: bool) -> Self {
        if wanted {
            Ensure::Present
        } else {
            Ensure::Absent
        }
    }
}

impl fmt::Display for Ensure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ensure::Present => f.write_str("present"),
            Ensure::Absent => f.write_str("absent"),
        }
    }
}

/// Ownership and octal mode applied to placed files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub owner: String,
    pub group: String,
    /// Octal string, e.g. "0644".
    pub mode: String,
}

impl Permissions {
    pub fn new(owner: impl Into<String>, group: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            group: group.into(),
            mode: mode.into(),
        }
    }

    /// Parsed mode bits.
    pub fn mode_bits(&self) -> anyhow::Result<u32> {
        u32::from_str_radix(self.mode.trim_start_matches("0o"), 8)
            .map_err(|e| anyhow::anyhow!("invalid file mode '{}': {e}", self.mode))
    }
}

/// Standard and private-key permissions for placed artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSet {
    pub standard: Permissions,
    pub private: Permissions,
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self {
            standard: Permissions::new("root", "root", "0644"),
            private: Permissions::new("root", "root", "0600"),
        }
    }
}

impl PermissionSet {
    pub fn for_slot(&self, slot: ArtifactSlot) -> &Permissions {
        if slot.is_private() {
            &self.private
        } else {
            &self.standard
        }
    }
}

/// One unit of planned host state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOperation {
    pub resource: ResourceRef,
    pub ensure: Ensure,
    /// Source locator; always `None` for absent operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    /// Certificate the operation belongs to; `None` for shared resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// `from` is applied only after `to`.
    Requires,
    /// A change to `from` triggers the refresh-only `to`.
    Notifies,
    /// `from` runs before `to` whenever both run.
    Before,
}

/// Directed ordering relation between two resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: ResourceRef,
    pub to: ResourceRef,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Reconfigure,
    Rebuild,
}

/// Refresh-only host command, run when notified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledAction {
    pub resource: ResourceRef,
    pub kind: ActionKind,
    pub command: Vec<String>,
}

/// Declarative plan for one or more bundles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub operations: Vec<FileOperation>,
    pub edges: Vec<Edge>,
    pub actions: Vec<ScheduledAction>,
}

impl Plan {
    /// Operation managing `resource`, if any.
    pub fn operation(&self, resource: &ResourceRef) -> Option<&FileOperation> {
        self.operations.iter().find(|op| &op.resource == resource)
    }

    /// Operation at a file path.
    pub fn file(&self, path: &str) -> Option<&FileOperation> {
        self.operation(&ResourceRef::file(path))
    }

    pub fn has_edge(&self, from: &ResourceRef, to: &ResourceRef, kind: EdgeKind) -> bool {
        self.edges
            .iter()
            .any(|e| &e.from == from && &e.to == to && e.kind == kind)
    }

    pub fn edges_from<'a>(&'a self, from: &'a ResourceRef) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| &e.from == from)
    }

    pub fn action(&self, kind: ActionKind) -> Option<&ScheduledAction> {
        self.actions.iter().find(|a| a.kind == kind)
    }

    /// Add an operation. An identical declaration of the same resource is
    /// merged; a differing one is a conflict. Returns whether it was added.
    pub fn push_operation(&mut self, op: FileOperation) -> Result<bool, PlanError> {
        if !self.accepts(&op)? {
            return Ok(false);
        }
        self.operations.push(op);
        Ok(true)
    }

    /// Add an edge; duplicates are ignored.
    pub fn push_edge(&mut self, from: ResourceRef, to: ResourceRef, kind: EdgeKind) {
        if !self.has_edge(&from, &to, kind) {
            self.edges.push(Edge { from, to, kind });
        }
    }

    /// Merge another plan's operations and edges (actions are pass-level).
    /// On a conflict nothing from `other` is merged.
    pub fn merge(&mut self, other: Plan) -> Result<(), PlanError> {
        for op in &other.operations {
            self.accepts(op)?;
        }
        for op in other.operations {
            if self.operation(&op.resource).is_none() {
                self.operations.push(op);
            }
        }
        for edge in other.edges {
            self.push_edge(edge.from, edge.to, edge.kind);
        }
        Ok(())
    }

    /// Whether `op` is new to this plan; errors if it contradicts an existing one.
    fn accepts(&self, op: &FileOperation) -> Result<bool, PlanError> {
        match self.operation(&op.resource) {
            None => Ok(true),
            Some(existing) if existing == op => Ok(false),
            Some(existing) => Err(PlanError::ConflictingDeclaration {
                resource: op.resource.to_string(),
                first: declared_by(existing),
                second: declared_by(op),
            }),
        }
    }
}

fn declared_by(op: &FileOperation) -> String {
    match &op.certificate {
        Some(name) => format!("{name} ({})", op.ensure),
        None => format!("the pass ({})", op.ensure),
    }
}

/// Plan one artifact slot: present with a source when wanted, absent without one otherwise.
pub fn plan_artifact(
    certificate: &str,
    slot: ArtifactSlot,
    wanted: bool,
    resolved: &ResolvedPath,
    permissions: &PermissionSet,
) -> FileOperation {
    let resource = ResourceRef::file(resolved.path());
    let op = if wanted {
        FileOperation {
            resource,
            ensure: Ensure::Present,
            source: Some(resolved.source.clone()),
            permissions: Some(permissions.for_slot(slot).clone()),
            certificate: Some(certificate.to_string()),
        }
    } else {
        FileOperation {
            resource,
            ensure: Ensure::Absent,
            source: None,
            permissions: None,
            certificate: Some(certificate.to_string()),
        }
    };
    tracing::debug!(certificate, slot = %slot, resource = %op.resource, ensure = %op.ensure, "planned artifact");
    op
}
