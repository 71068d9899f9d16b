//! Messaging collaborator interface.
//!
//! This core never talks to a network itself: every collective — the
//! planner's cross-process plan-selection agreement, a sub-communicator
//! broadcast, an error-reducing all-reduce — is expressed against
//! [`ProcessGroup`], reduced to the collective primitives this crate's own
//! logic actually calls.

use crate::error::Result;

/// The binary reduction ops the planner and reducer need.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReduceOp {
    /// Elementwise minimum.
    Min,
    /// Elementwise sum.
    Sum,
}

/// A process group: a fixed-size collection of cooperating ranks exposing
/// the collectives this crate's planning and error-propagation logic needs.
/// Consumed, not implemented, by this crate's own algorithms —
/// [`SingleProcessGroup`] is the trivial in-process stand-in this crate's
/// own tests and single-rank callers use in its place.
pub trait ProcessGroup {
    /// Total number of ranks in this group.
    fn size(&self) -> usize;

    /// This process's rank, in `0..size()`.
    fn rank(&self) -> usize;

    /// Reduces `buf` elementwise by `op` across every rank in the group, in
    /// place, so every rank observes the same result afterward. The
    /// contraction planner drives each candidate plan's cost triple through
    /// this with [`ReduceOp::Min`] before comparing candidates, so every
    /// rank settles on the same plan even if local cost estimates drift.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::CollaboratorFailure`] if the
    /// underlying transport fails.
    fn all_reduce_u64(&self, op: ReduceOp, buf: &mut [u64]) -> Result<()>;

    /// Broadcasts `buf` from `root` to every rank in the group, in place.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::CollaboratorFailure`] if the
    /// underlying transport fails.
    fn broadcast(&self, root: usize, buf: &mut [u8]) -> Result<()>;
}

/// Reports memory available to the calling rank, consulted by the planner
/// before committing to a plan whose estimated peak exceeds it.
pub trait MemoryReporter {
    /// Bytes of memory available to this process for plan execution.
    fn available_bytes(&self) -> usize;
}

/// The trivial single-rank process group: every collective is a no-op
/// identity, since with `size() == 1` there is nothing to reduce across or
/// broadcast to. Used by single-process callers and by this crate's own
/// tests in place of a real messaging backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleProcessGroup;

impl ProcessGroup for SingleProcessGroup {
    fn size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn all_reduce_u64(&self, _op: ReduceOp, _buf: &mut [u64]) -> Result<()> {
        Ok(())
    }

    fn broadcast(&self, _root: usize, _buf: &mut [u8]) -> Result<()> {
        Ok(())
    }
}

/// Reports a fixed, caller-configured budget. The trivial implementation
/// single-process callers and this crate's own tests use in place of a real
/// memory query.
#[derive(Clone, Copy, Debug)]
pub struct FixedMemoryReporter {
    /// Bytes reported as available.
    pub available: usize,
}

impl MemoryReporter for FixedMemoryReporter {
    fn available_bytes(&self) -> usize {
        self.available
    }
}
