//! Serialized queue of GitHub-mutating operations.
//!
//! Operations are persisted by [`OperationStore`] and run one per call of
//! [`QueueProcessor::process_next`], which an external scheduler invokes
//! repeatedly. Each call:
//!
//! 1. returns stale `processing` operations to `queued`
//! 2. stops if the last operation finished less than `min_delay` ago
//! 3. takes the oldest `queued` operation
//! 4. leases it (a conditional write that fails while any operation is in
//!    flight; losing the race stops the call)
//! 5. dispatches it to its handler
//! 6. records `completed` or `failed` and restarts the rate-limit window

mod handlers;
mod processor;
mod rate_limit;
mod sqlite;
mod store;


use std::sync::Arc;

pub use handlers::{HandlerConfig, HandlerError, OperationHandlers};
pub use processor::{
    OperationDispatcher, ProcessError, ProcessOutcome, ProcessedOperation, QueueConfig,
    QueueProcessor, QueueStatus, SkipReason,
};
pub use rate_limit::{RateLimitCheck, RateLimiter};
pub use sqlite::SqliteOperationStore;
pub use store::{ForkRecord, NewFork, NewPr, OperationStore, PrRecord, QueueCounts, StoreError};

/// Clock shared by the processor, limiter and handlers.
pub type SharedClock = Arc<dyn mockable::Clock + Send + Sync>;
