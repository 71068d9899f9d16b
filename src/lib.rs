#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! A distributed symmetric tensor-contraction engine: process topology and
//! mapping, symmetric packed storage, contraction planning, and the
//! sequential kernels that execute a chosen plan's leaf.
//!
//! Messaging, redistribution and memory reporting are external collaborator
//! concerns, consumed here only through the traits in [`messaging`] and
//! [`redistribute`].

pub mod engine;
pub mod error;
pub mod fold;
pub mod home;
pub mod kernel;
pub mod mapping;
pub mod messaging;
pub mod plan;
pub mod redistribute;
pub mod semiring;
pub mod sum;
pub mod symmetry;
pub mod tensor;
pub mod topology;
