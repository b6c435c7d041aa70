//! Core domain types for the review studio.
//!
//! This module contains the identifiers and the queued-operation model shared
//! by the recreation pipeline, the queue and the HTTP layer.

pub mod ids;
pub mod operation;

pub use ids::{InvalidSha, LeaseOwner, OperationId, PrNumber, RepoId, Sha};
pub use operation::{
    CreateForkPayload, CreatePrPayload, DeleteBranchPayload, DeleteForkPayload, Lease, Operation,
    OperationPayload, OperationStatus, OperationType, SimulatePrPayload, UnknownVariant,
};
