//! Effects-as-data for GitHub and Git operations.
//!
//! This module defines effect types that describe operations without executing them.
//! This enables:
//! - Testability via fake interpreters
//! - Logging/tracing of intended operations
//! - A single seam between the pipeline logic and the outside world

pub mod git;
pub mod github;
pub mod interpreter;

pub use git::{GitEffect, GitResponse, RemoteUrl};
pub use github::{CommitData, GitHubEffect, GitHubResponse, PrData, RepoData};
pub use interpreter::{GitHubInterpreter, GitInterpreter};
