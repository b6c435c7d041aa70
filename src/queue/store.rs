//! Persistence interface for the operation queue.
//!
//! The store is the single source of truth for lease state. Every status
//! transition is a conditional write so that overlapping callers (several
//! `process_next` invocations, or several processes sharing one database)
//! cannot both win the same operation.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::types::{LeaseOwner, Operation, OperationId, OperationPayload, RepoId};

/// Errors from the operation store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected an operation.
    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    /// A stored row could not be decoded.
    #[error("corrupt {what} in row {id}: {message}")]
    Corrupt {
        what: &'static str,
        id: i64,
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corrupt(what: &'static str, id: i64, message: impl Into<String>) -> Self {
        StoreError::Corrupt {
            what,
            id,
            message: message.into(),
        }
    }
}

/// Number of operations per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Fork data to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFork {
    pub upstream: Option<RepoId>,
    pub fork: RepoId,
    pub fork_url: String,
}

/// A persisted fork row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkRecord {
    pub id: i64,
    pub upstream: Option<RepoId>,
    pub fork: RepoId,
    pub fork_url: String,
    pub created_at: DateTime<Utc>,
}

/// Pull request data to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPr {
    pub source_pr_url: Option<String>,
    pub fork_id: Option<i64>,
    pub pr_url: Option<String>,
    pub title: Option<String>,
    pub head_branch: Option<String>,
    pub status: String,
}

/// A persisted pull request row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrRecord {
    pub id: i64,
    pub source_pr_url: Option<String>,
    pub fork_id: Option<i64>,
    pub pr_url: Option<String>,
    pub title: Option<String>,
    pub head_branch: Option<String>,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

/// Durable storage behind the queue.
///
/// Finalizing calls (`mark_completed`, `mark_failed`) return `false` when
/// `owner` no longer holds the lease; the caller must treat its result as
/// discarded.
pub trait OperationStore: Send + Sync + 'static {
    /// Appends an operation in `queued` state.
    fn enqueue(
        &self,
        payload: OperationPayload,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<OperationId, StoreError>> + Send;

    fn get(
        &self,
        id: OperationId,
    ) -> impl Future<Output = Result<Option<Operation>, StoreError>> + Send;

    /// The oldest `queued` operation.
    fn next_queued(&self) -> impl Future<Output = Result<Option<Operation>, StoreError>> + Send;

    /// Moves `id` from `queued` to `processing` under `owner`'s lease.
    ///
    /// Returns `false` if the operation was no longer `queued`, or if any other
    /// operation is still `processing`: at most one lease exists at a time.
    fn try_lease(
        &self,
        id: OperationId,
        owner: LeaseOwner,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn mark_completed(
        &self,
        id: OperationId,
        owner: LeaseOwner,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn mark_failed(
        &self,
        id: OperationId,
        owner: LeaseOwner,
        error: String,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Returns every `processing` operation started at or before
    /// `started_before` to `queued`, dropping its lease.
    fn reset_stuck(
        &self,
        started_before: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<OperationId>, StoreError>> + Send;

    fn counts(&self) -> impl Future<Output = Result<QueueCounts, StoreError>> + Send;

    /// Upserts a fork keyed by its repository.
    ///
    /// When `placeholder` names an existing row, that row is reconciled with
    /// `fork` instead of inserting a new one. If another row already holds
    /// the same repository, the placeholder is merged into it.
    fn save_fork(
        &self,
        fork: NewFork,
        placeholder: Option<i64>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<ForkRecord, StoreError>> + Send;

    fn get_fork(&self, id: i64)
    -> impl Future<Output = Result<Option<ForkRecord>, StoreError>> + Send;

    fn find_fork(
        &self,
        fork: RepoId,
    ) -> impl Future<Output = Result<Option<ForkRecord>, StoreError>> + Send;

    /// Inserts a pull request row, or updates `placeholder` when it exists.
    fn save_pr(
        &self,
        pr: NewPr,
        placeholder: Option<i64>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<PrRecord, StoreError>> + Send;

    fn get_pr(&self, id: i64) -> impl Future<Output = Result<Option<PrRecord>, StoreError>> + Send;
}
