//! Commit recreation: surface one commit as a pull request inside a fork.
//!
//! The pipeline (see [`Recreator`]) resolves the fork and the commit, clones
//! the fork into a disposable directory, replays the commit onto a review
//! branch based at its parent, force-pushes it and opens a pull request.
//!
//! Two variants exist:
//! - **Manual**: `repo_url` names the fork; both hashes are required.
//! - **Auto**: `repo_url` names the upstream; the fork is resolved (and
//!   created if absent) under the authenticated identity, and both hashes are
//!   optional.
//!
//! Progress is reported through a [`ProgressSink`] as a stream of status
//! events followed by exactly one result event.

mod pipeline;
mod progress;


use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::git::GitError;
use crate::github::{GitHubApiError, UrlError};
use crate::types::Sha;

pub use pipeline::Recreator;
pub use progress::{ProgressEvent, ProgressSink, ResultEvent, Stage, StatusType};

/// Which flavour of recreation a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateMode {
    /// `repo_url` is the fork; commit and parent are given.
    Manual,
    /// `repo_url` is the upstream; the fork is resolved or created.
    Auto,
}

/// Request body of the recreation endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecreateInput {
    pub repo_url: String,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub parent_commit_hash: Option<String>,
}

/// A recreation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecreationRequest {
    pub mode: RecreateMode,
    pub repo_url: String,
    pub commit_hash: Option<String>,
    pub parent_commit_hash: Option<String>,
    /// Additional refspecs fetched from upstream in auto mode, e.g. a pull
    /// request head that was never merged.
    pub upstream_refspecs: Vec<String>,
}

impl RecreationRequest {
    pub fn manual(input: RecreateInput) -> Self {
        Self::from_input(RecreateMode::Manual, input)
    }

    pub fn auto(input: RecreateInput) -> Self {
        Self::from_input(RecreateMode::Auto, input)
    }

    fn from_input(mode: RecreateMode, input: RecreateInput) -> Self {
        RecreationRequest {
            mode,
            repo_url: input.repo_url,
            commit_hash: blank_to_none(input.commit_hash),
            parent_commit_hash: blank_to_none(input.parent_commit_hash),
            upstream_refspecs: Vec::new(),
        }
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Outcome of a successful recreation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecreationResult {
    pub pr_url: String,
    pub fork_url: String,
    pub commit_hash: String,
    /// True when no new PR was opened because one already existed.
    pub already_existed: bool,
    pub title: String,
    pub branch_name: String,
    pub pr_number: u64,
}

/// Runtime configuration of the pipeline.
#[derive(Debug, Clone)]
pub struct RecreatorConfig {
    /// Hosting-API token, also used to authenticate clone and push.
    pub token: Option<String>,
    /// Parent directory for disposable clones.
    pub workspace_root: PathBuf,
    /// Wait after creating a fork before using it.
    pub fork_settle_delay: Duration,
}

/// Errors from the recreation pipeline.
#[derive(Debug, Error)]
pub enum RecreateError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cherry-pick of {commit} conflicts in: {}", .files.join(", "))]
    Conflict { commit: Sha, files: Vec<String> },

    #[error("push failed: {0}")]
    Push(String),

    #[error(transparent)]
    GitHub(#[from] GitHubApiError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<UrlError> for RecreateError {
    fn from(err: UrlError) -> Self {
        RecreateError::InvalidInput(err.to_string())
    }
}

impl RecreateError {
    /// Machine-readable error class.
    pub fn kind(&self) -> &'static str {
        match self {
            RecreateError::Configuration(_) => "configuration",
            RecreateError::InvalidInput(_) => "invalid_input",
            RecreateError::NotFound(_) => "not_found",
            RecreateError::Conflict { .. } => "conflict",
            RecreateError::Push(_) => "push",
            RecreateError::GitHub(e) if e.is_not_found() => "not_found",
            RecreateError::GitHub(_) => "github",
            RecreateError::Git(_) => "git",
            RecreateError::Io(_) => "io",
        }
    }

    /// HTTP status reflecting the error class.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            "invalid_input" => 400,
            "not_found" => 404,
            "conflict" => 409,
            _ => 500,
        }
    }
}
