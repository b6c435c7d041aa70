//! The queue step function.
//!
//! `process_next` does at most one operation per call and never loops. An
//! external scheduler calls it repeatedly. Overlapping calls, from this
//! process or another, answer `already_processing` while an operation is in
//! flight: the store grants no lease while any row is `processing`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::SharedClock;
use super::rate_limit::{RateLimitCheck, RateLimiter};
use super::store::{OperationStore, QueueCounts, StoreError};
use crate::types::{LeaseOwner, Operation, OperationId, OperationStatus, OperationType};

/// Runs one leased operation.
///
/// An `Err` marks the operation `failed` with the error's display text.
pub trait OperationDispatcher: Send + Sync + 'static {
    type Error: std::fmt::Display + Send;

    fn dispatch(
        &self,
        operation: &Operation,
    ) -> impl Future<Output = Result<serde_json::Value, Self::Error>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Minimum spacing between any two operations.
    pub min_delay: Duration,
    /// A `processing` operation older than this is presumed abandoned.
    pub stale_after: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            min_delay: Duration::from_secs(60),
            stale_after: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("duration out of range: {0}")]
    Duration(#[from] chrono::OutOfRangeError),
}

/// Why a call did not run anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    RateLimited,
    QueueEmpty,
    AlreadyProcessing,
}

/// The operation a call ran, after finalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedOperation {
    pub id: OperationId,
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<ProcessedOperation>,
    /// Operations returned to `queued` by this call's stuck sweep.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recovered: Vec<OperationId>,
}

impl ProcessOutcome {
    fn skipped(reason: SkipReason, recovered: Vec<OperationId>) -> Self {
        ProcessOutcome {
            processed: false,
            reason: Some(reason),
            wait_seconds: None,
            operation: None,
            recovered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Operations waiting to run.
    pub depth: u64,
    pub counts: QueueCounts,
    pub can_process_now: bool,
    pub wait_seconds: u64,
    pub min_delay_seconds: u64,
    pub stale_after_seconds: u64,
}

pub struct QueueProcessor<S, D> {
    store: Arc<S>,
    dispatcher: Arc<D>,
    limiter: RateLimiter,
    clock: SharedClock,
    owner: LeaseOwner,
    config: QueueConfig,
}

impl<S: OperationStore, D: OperationDispatcher> QueueProcessor<S, D> {
    pub fn new(store: Arc<S>, dispatcher: Arc<D>, clock: SharedClock, config: QueueConfig) -> Self {
        QueueProcessor {
            store,
            dispatcher,
            limiter: RateLimiter::new(config.min_delay, clock.clone()),
            clock,
            owner: LeaseOwner::random(),
            config,
        }
    }

    /// Use a fixed lease owner instead of a random one.
    pub fn with_owner(mut self, owner: LeaseOwner) -> Self {
        self.owner = owner;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn owner(&self) -> &LeaseOwner {
        &self.owner
    }

    /// Run at most one queued operation.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn process_next(&self) -> Result<ProcessOutcome, ProcessError> {
        let now = self.clock.utc();
        let stale_after = chrono::Duration::from_std(self.config.stale_after)?;

        // The sweep always runs, even when the gate below turns the call away.
        let recovered = self.store.reset_stuck(now - stale_after).await?;
        for id in &recovered {
            warn!(operation_id = %id, "Returned stuck operation to the queue");
        }

        if let check @ RateLimitCheck::Wait { .. } = self.limiter.check() {
            return Ok(ProcessOutcome {
                wait_seconds: Some(check.wait_seconds()),
                ..ProcessOutcome::skipped(SkipReason::RateLimited, recovered)
            });
        }

        let Some(operation) = self.store.next_queued().await? else {
            return Ok(ProcessOutcome::skipped(SkipReason::QueueEmpty, recovered));
        };

        let leased = self
            .store
            .try_lease(operation.id, self.owner.clone(), now, now + stale_after)
            .await?;
        if !leased {
            info!(operation_id = %operation.id, "Operation leased by another consumer");
            return Ok(ProcessOutcome::skipped(
                SkipReason::AlreadyProcessing,
                recovered,
            ));
        }

        let operation_type = operation.operation_type();
        info!(
            operation_id = %operation.id,
            operation_type = %operation_type,
            "Processing operation"
        );

        let outcome = self.dispatcher.dispatch(&operation).await;
        self.limiter.record();
        let finished_at = self.clock.utc();

        let (status, result, error, finalized) = match outcome {
            Ok(result) => {
                let finalized = self
                    .store
                    .mark_completed(operation.id, self.owner.clone(), result.clone(), finished_at)
                    .await?;
                info!(operation_id = %operation.id, "Operation completed");
                (OperationStatus::Completed, Some(result), None, finalized)
            }
            Err(e) => {
                let message = e.to_string();
                let finalized = self
                    .store
                    .mark_failed(operation.id, self.owner.clone(), message.clone(), finished_at)
                    .await?;
                warn!(operation_id = %operation.id, error = %message, "Operation failed");
                (OperationStatus::Failed, None, Some(message), finalized)
            }
        };

        if !finalized {
            warn!(
                operation_id = %operation.id,
                "Lease lost before finalization; outcome discarded"
            );
        }

        Ok(ProcessOutcome {
            processed: true,
            reason: None,
            wait_seconds: None,
            operation: Some(ProcessedOperation {
                id: operation.id,
                operation_type,
                status,
                result,
                error,
            }),
            recovered,
        })
    }

    /// Queue depth and whether the next call would be turned away.
    pub async fn status(&self) -> Result<QueueStatus, ProcessError> {
        let counts = self.store.counts().await?;
        let check = self.limiter.check();
        Ok(QueueStatus {
            depth: counts.queued,
            counts,
            can_process_now: check.is_ready(),
            wait_seconds: check.wait_seconds(),
            min_delay_seconds: self.config.min_delay.as_secs(),
            stale_after_seconds: self.config.stale_after.as_secs(),
        })
    }
}
