//! Crate-wide error taxonomy.

use thiserror::Error;

/// Errors produced while planning or executing a contraction, summation, scale
/// or reduction.
#[derive(Debug, Error)]
pub enum Error {
    /// Shape or symmetry mismatch across operand indices, or a repeated label
    /// inside a single operand that the planner could not reduce away.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The mapping planner exhausted the topology x mapping search space
    /// without producing a legal plan.
    #[error("no valid mapping found for this contraction")]
    NoValidMapping,

    /// The chosen plan's estimated peak memory exceeds the reported available
    /// memory on some rank.
    #[error("insufficient memory: plan needs {needed} bytes, {available} available")]
    InsufficientMemory {
        /// Estimated peak bytes the plan would need.
        needed: usize,
        /// Bytes reported available by the [`crate::messaging::MemoryReporter`]
        /// collaborator.
        available: usize,
    },

    /// The redistribution or messaging collaborator returned an error.
    #[error("collaborator failure: {0}")]
    CollaboratorFailure(String),

    /// The requested operation is not implemented for the given scalar type
    /// or tensor configuration.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// An error that does not originate in this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
