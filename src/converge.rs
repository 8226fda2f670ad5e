//! Convergence orchestration: plan every bundle of a pass, then fire the
//! shared rebuild trigger once.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::config::BundleConfig;
use crate::error::PlanError;
use crate::plan::{plan_artifact, PermissionSet, Plan, ResourceRef};
use crate::platform::{PlatformId, PlatformPolicy};
use crate::resolve::resolve;
use crate::slot::ArtifactSlot;
use crate::trust::{register, RebuildTrigger, TriggerState, TrustStoreEntry};

static NEXT_PASS_ID: AtomicU64 = AtomicU64::new(1);

/// Plan for a single certificate bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePlan {
    pub name: String,
    pub plan: Plan,
    pub entries: Vec<TrustStoreEntry>,
}

/// A bundle whose planning aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleFailure {
    pub name: String,
    pub error: String,
}

/// Result of a full pass over all bundles.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassOutcome {
    /// Merged operations of every successful bundle plus the pass actions.
    pub plan: Plan,
    pub entries: Vec<TrustStoreEntry>,
    pub failures: Vec<BundleFailure>,
    /// Resources that armed the rebuild trigger.
    pub rebuild_notifiers: Vec<ResourceRef>,
}

impl PassOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One convergence pass. Owns the rebuild trigger every bundle shares.
#[derive(Debug)]
pub struct ConvergencePass {
    id: u64,
    policy: PlatformPolicy,
    platform: PlatformId,
    source_root: String,
    permissions: PermissionSet,
    trigger: RebuildTrigger,
}

impl ConvergencePass {
    pub fn new(policy: PlatformPolicy, platform: PlatformId, source_root: impl Into<String>) -> Self {
        Self {
            id: NEXT_PASS_ID.fetch_add(1, Ordering::Relaxed),
            policy,
            platform,
            source_root: source_root.into(),
            permissions: PermissionSet::default(),
            trigger: RebuildTrigger::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn trigger_state(&self) -> TriggerState {
        self.trigger.state()
    }

    /// Plan one bundle. Resolves the platform first, unconditionally: an
    /// unsupported platform fails the bundle before anything is planned.
    pub fn plan_bundle(&self, name: &str, bundle: &BundleConfig) -> Result<BundlePlan, PlanError> {
        let span = tracing::debug_span!("bundle", pass = self.id, certificate = name);
        let _guard = span.enter();

        let platform = self.policy.resolve(&self.platform)?;

        let mut plan = Plan::default();
        let mut entries = Vec::new();
        let mut anchors = Vec::new();
        for slot in ArtifactSlot::ALL {
            let wanted = bundle.wanted(slot);
            let resolved = resolve(
                name,
                slot,
                &bundle.override_for(slot),
                platform,
                &self.source_root,
            );
            plan.push_operation(plan_artifact(name, slot, wanted, &resolved, &self.permissions))?;
            if slot.is_trust_anchor() {
                anchors.push((slot, wanted, resolved));
            }
        }

        for (slot, wanted, resolved) in anchors {
            let registration = register(
                name,
                slot,
                wanted,
                &resolved,
                self.permissions.for_slot(slot),
                platform,
                &self.trigger,
            );
            plan.merge(registration.plan)?;
            entries.extend(registration.entry);
        }

        tracing::debug!(operations = plan.operations.len(), "bundle planned");
        Ok(BundlePlan {
            name: name.to_string(),
            plan,
            entries,
        })
    }

    /// Plan every bundle in name order and close the pass.
    pub fn run(self, bundles: &BTreeMap<String, BundleConfig>) -> PassOutcome {
        let mut planned = Vec::new();
        let mut failures = Vec::new();
        for (name, bundle) in bundles {
            match self.plan_bundle(name, bundle) {
                Ok(p) => planned.push(p),
                Err(e) => {
                    tracing::warn!(pass = self.id, certificate = %name, error = %e, "bundle not planned");
                    failures.push(BundleFailure {
                        name: name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        let mut outcome = self.finish(planned);
        failures.append(&mut outcome.failures);
        failures.sort_by(|a, b| a.name.cmp(&b.name));
        outcome.failures = failures;
        outcome
    }

    /// Merge bundle plans and fire the rebuild trigger. Consumes the pass, so
    /// the reconfigure/rebuild actions are produced at most once.
    ///
    /// A bundle that contradicts an earlier one is left out whole and
    /// reported as a failure.
    pub fn finish(self, bundles: impl IntoIterator<Item = BundlePlan>) -> PassOutcome {
        let mut outcome = PassOutcome::default();
        for bundle in bundles {
            match outcome.plan.merge(bundle.plan) {
                Ok(()) => outcome.entries.extend(bundle.entries),
                Err(e) => {
                    tracing::warn!(pass = self.id, certificate = %bundle.name, error = %e, "bundle rejected");
                    outcome.failures.push(BundleFailure {
                        name: bundle.name,
                        error: e.to_string(),
                    });
                }
            }
        }

        // Rejected bundles may have armed the trigger; only merged resources count.
        outcome.rebuild_notifiers = self
            .trigger
            .notifiers()
            .into_iter()
            .filter(|r| outcome.plan.operation(r).is_some())
            .collect();
        let fired = self.trigger.fire();
        if !outcome.rebuild_notifiers.is_empty() {
            outcome.plan.actions.extend(fired.actions);
            for edge in fired.edges {
                outcome.plan.push_edge(edge.from, edge.to, edge.kind);
            }
        }
        tracing::debug!(
            pass = self.id,
            operations = outcome.plan.operations.len(),
            actions = outcome.plan.actions.len(),
            "pass finished"
        );
        outcome
    }
}
