//! Redistribution collaborator interface.
//!
//! Moving a tensor's local block from one [`crate::tensor::MappingChain`]
//! assignment to another is real network traffic (an all-to-all over the
//! grid dimensions whose factors changed); this crate states the contract
//! only and consumes it through [`Redistributor`], the same way it consumes
//! the rest of messaging through [`crate::messaging::ProcessGroup`].

use crate::error::{Error, Result};
use crate::tensor::MappingChain;

/// Redistributes a tensor's local dense buffer from `source_mapping` to
/// `target_mapping`, both describing the same tensor shape under a
/// different [`MappingChain`] per mode.
pub trait Redistributor<T> {
    /// Returns a new buffer holding this process's data under
    /// `target_mapping`, given its current buffer under `source_mapping`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CollaboratorFailure`] if the remap cannot be carried
    /// out (e.g. the two mappings describe incompatible shapes).
    fn remap_tensor(
        &self,
        data: &[T],
        edge_len: &[usize],
        source_mapping: &[MappingChain],
        target_mapping: &[MappingChain],
    ) -> Result<Vec<T>>;
}

/// The trivial redistributor: valid only when the source and target
/// mappings are already identical, in which case it passes the buffer
/// through unchanged. Stands in for a real redistribution backend in
/// single-process use and in this crate's own tests, where the planner
/// never actually picks a differing mapping.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityRedistributor;

impl<T: Clone> Redistributor<T> for IdentityRedistributor {
    fn remap_tensor(
        &self,
        data: &[T],
        _edge_len: &[usize],
        source_mapping: &[MappingChain],
        target_mapping: &[MappingChain],
    ) -> Result<Vec<T>> {
        if source_mapping != target_mapping {
            return Err(Error::CollaboratorFailure(
                "IdentityRedistributor cannot remap across differing mappings".to_string(),
            ));
        }
        Ok(data.to_vec())
    }
}
