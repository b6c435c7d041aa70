//! Effect interpreter traits.
//!
//! These traits define how effects are executed:
//! - `LocalGit` runs git effects with the `git` CLI
//! - `OctocrabClient` runs GitHub effects against the REST API
//!
//! Tests substitute fakes for both (see `test_utils`).

use std::future::Future;
use std::path::Path;

use super::git::{GitEffect, GitResponse};
use super::github::{GitHubEffect, GitHubResponse};
use crate::git::GitResult;
use crate::github::GitHubApiError;

/// Interprets GitHub effects against the GitHub API.
///
/// # Example (mock for testing)
///
/// ```ignore
/// struct StaticGitHub {
///     login: String,
/// }
///
/// impl GitHubInterpreter for StaticGitHub {
///     async fn interpret(&self, effect: GitHubEffect) -> Result<GitHubResponse, GitHubApiError> {
///         match effect {
///             GitHubEffect::GetAuthenticatedUser => Ok(GitHubResponse::User(self.login.clone())),
///             other => Err(GitHubApiError::other(format!("unexpected effect: {:?}", other))),
///         }
///     }
/// }
/// ```
pub trait GitHubInterpreter: Send + Sync + 'static {
    /// Execute a GitHub effect and return its response.
    fn interpret(
        &self,
        effect: GitHubEffect,
    ) -> impl Future<Output = Result<GitHubResponse, GitHubApiError>> + Send;
}

/// Interprets Git effects against a local working directory.
pub trait GitInterpreter: Send + Sync + 'static {
    /// Execute a Git effect in `workdir` and return its response.
    fn interpret(
        &self,
        workdir: &Path,
        effect: GitEffect,
    ) -> impl Future<Output = GitResult<GitResponse>> + Send;
}
