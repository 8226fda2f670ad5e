//! Planning errors.

/// Errors raised while planning a certificate bundle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// The host's platform has no trust-store mechanics. Fatal for the bundle.
    /// `name` is the operating-system name when known, else the family.
    #[error("{name} not supported")]
    UnsupportedPlatform { family: String, name: String },

    /// Two declarations manage the same resource with different states.
    #[error("{resource} is declared by both {first} and {second} with different states")]
    ConflictingDeclaration {
        resource: String,
        first: String,
        second: String,
    },
}
