//! GitHub API client and effect interpreter.
//!
//! This module provides the implementation for executing GitHub effects via the octocrab
//! library. It implements the `GitHubInterpreter` trait defined in the effects module.
//!
//! Key features:
//! - Error categorization (not found, already exists, unauthorized, rate limited)
//! - 404 on lookups reported as absence rather than failure
//! - Typed helpers in [`ops`] for callers that issue single effects
//! - Parsing of repository, pull request and commit URLs

mod client;
mod error;
mod interpreter;
pub mod ops;
pub mod url;

pub use client::OctocrabClient;
pub use error::{GitHubApiError, GitHubErrorKind};
pub use interpreter::interpret_github_effect;
pub use url::{
    REVIEW_BRANCH_PREFIX, UrlError, commit_subject, looks_like_commit_hash, parse_pr_url,
    parse_repo_url, pr_html_url, review_branch_name,
};
