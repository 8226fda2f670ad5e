//! Trust store registration and the pass-wide rebuild trigger.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::plan::{
    ActionKind, EdgeKind, Ensure, FileOperation, Permissions, Plan, ResourceRef, ScheduledAction,
};
use crate::platform::PlatformTrustConfig;
use crate::resolve::{default_filename, join, ResolvedPath};
use crate::slot::ArtifactSlot;

/// A certificate registered in the system trust store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustStoreEntry {
    /// Copy inside the platform trust directory.
    pub registered_path: String,
    /// Record written to the platform list file.
    pub list_file_line: String,
    pub owner_certificate: String,
}

/// Output of registering one intermediate/CA slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    /// Present only when the slot is wanted.
    pub entry: Option<TrustStoreEntry>,
    pub plan: Plan,
}

/// Lifecycle of the rebuild trigger within one convergence pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerState {
    Idle,
    Armed,
    Fired,
}

#[derive(Debug, Default)]
struct TriggerInner {
    notifiers: BTreeSet<ResourceRef>,
    platform: Option<PlatformTrustConfig>,
    fired: bool,
}

/// Single rebuild trigger shared by every bundle planned in a pass.
///
/// Arming is a set insert, so it is idempotent and order-independent.
/// Firing yields the reconfigure/rebuild actions at most once.
#[derive(Debug, Default)]
pub struct RebuildTrigger {
    inner: Mutex<TriggerInner>,
}

impl RebuildTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TriggerInner> {
        // Arming cannot leave the set half-updated, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `notifier` as wanting a trust-store refresh on `platform`.
    pub fn arm(&self, notifier: ResourceRef, platform: &PlatformTrustConfig) {
        let mut inner = self.lock();
        if inner.fired {
            tracing::warn!(notifier = %notifier, "rebuild trigger armed after firing; ignored");
            return;
        }
        // One platform per pass.
        debug_assert!(inner.platform.as_ref().map_or(true, |p| p == platform));
        if inner.platform.is_none() {
            inner.platform = Some(platform.clone());
        }
        inner.notifiers.insert(notifier);
    }

    pub fn state(&self) -> TriggerState {
        let inner = self.lock();
        if inner.fired {
            TriggerState::Fired
        } else if inner.notifiers.is_empty() {
            TriggerState::Idle
        } else {
            TriggerState::Armed
        }
    }

    /// Resources that armed the trigger, in sorted order.
    pub fn notifiers(&self) -> Vec<ResourceRef> {
        self.lock().notifiers.iter().cloned().collect()
    }

    /// Consume the trigger. Returns the actions (reconfigure first, if the
    /// platform needs it) and their ordering edges; empty unless armed.
    pub fn fire(&self) -> Plan {
        let mut inner = self.lock();
        let mut out = Plan::default();
        if inner.fired || inner.notifiers.is_empty() {
            return out;
        }
        inner.fired = true;
        let Some(platform) = inner.platform.as_ref() else {
            return out;
        };

        let rebuild = rebuild_action(platform);
        if let Some(command) = &platform.reconfigure_command {
            let reconfigure = ScheduledAction {
                resource: ResourceRef::exec(command.join(" ")),
                kind: ActionKind::Reconfigure,
                command: command.clone(),
            };
            out.push_edge(
                reconfigure.resource.clone(),
                rebuild.resource.clone(),
                EdgeKind::Before,
            );
            out.actions.push(reconfigure);
        }
        tracing::debug!(notifiers = inner.notifiers.len(), action = %rebuild.resource, "rebuild trigger fired");
        out.actions.push(rebuild);
        out
    }
}

/// The rebuild action a platform uses.
pub fn rebuild_action(platform: &PlatformTrustConfig) -> ScheduledAction {
    ScheduledAction {
        resource: ResourceRef::exec(platform.rebuild_command.join(" ")),
        kind: ActionKind::Rebuild,
        command: platform.rebuild_command.clone(),
    }
}

/// Register (or unregister) an intermediate/CA artifact in the trust store.
///
/// Emits the trust directory, the registered copy and the list-file line,
/// each notifying the rebuild action, and arms `trigger` for both install
/// and uninstall. Non trust-anchor slots yield an empty registration.
pub fn register(
    certificate: &str,
    slot: ArtifactSlot,
    wanted: bool,
    artifact: &ResolvedPath,
    permissions: &Permissions,
    platform: &PlatformTrustConfig,
    trigger: &RebuildTrigger,
) -> Registration {
    if !slot.is_trust_anchor() {
        return Registration::default();
    }

    let ensure = Ensure::from_wanted(wanted);
    let registered_path = join(&platform.trust_dir, &default_filename(certificate, slot));
    let list_file_line = platform.list_line(&registered_path);

    let dir = ResourceRef::directory(&platform.trust_dir);
    let copy = ResourceRef::file(&registered_path);
    let line = ResourceRef::line(&platform.list_file, &list_file_line);
    let rebuild = rebuild_action(platform).resource;

    let mut plan = Plan::default();
    plan.operations = vec![
        FileOperation {
            resource: dir.clone(),
            ensure: Ensure::Present,
            source: None,
            permissions: None,
            certificate: None,
        },
        FileOperation {
            resource: copy.clone(),
            ensure,
            source: wanted.then(|| artifact.source.clone()),
            permissions: wanted.then(|| permissions.clone()),
            certificate: Some(certificate.to_string()),
        },
        FileOperation {
            resource: line.clone(),
            ensure,
            source: None,
            permissions: None,
            certificate: Some(certificate.to_string()),
        },
    ];

    match ensure {
        Ensure::Present => {
            plan.push_edge(copy.clone(), dir, EdgeKind::Requires);
            plan.push_edge(line.clone(), copy.clone(), EdgeKind::Requires);
        }
        // Drop the list entry before the file it names disappears.
        Ensure::Absent => plan.push_edge(copy.clone(), line.clone(), EdgeKind::Requires),
    }
    plan.push_edge(copy.clone(), rebuild.clone(), EdgeKind::Notifies);
    plan.push_edge(line.clone(), rebuild, EdgeKind::Notifies);
    trigger.arm(copy, platform);
    trigger.arm(line, platform);

    let entry = wanted.then(|| TrustStoreEntry {
        registered_path,
        list_file_line,
        owner_certificate: certificate.to_string(),
    });
    Registration { entry, plan }
}
