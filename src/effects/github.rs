//! GitHub API effect types.
//!
//! These types describe GitHub API operations as data, without executing them.
//! Unlike git effects, every variant names the repository it targets: the
//! recreation pipeline talks to both a fork and its upstream.

use serde::{Deserialize, Serialize};

use crate::types::{PrNumber, RepoId, Sha};

/// Repository metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoData {
    pub id: RepoId,
    pub html_url: String,
    pub default_branch: Option<String>,
    pub is_fork: bool,
}

/// Commit metadata as reported by the hosting API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitData {
    pub sha: Sha,
    pub message: String,
    /// Parents in listed order; the first is the mainline parent.
    pub parents: Vec<Sha>,
}

/// Pull request metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrData {
    pub number: PrNumber,
    pub html_url: String,
    pub title: String,
    pub head_ref: String,
    pub head_sha: Option<Sha>,
    pub base_ref: String,
    /// Merge commit of a merged PR.
    pub merge_commit_sha: Option<Sha>,
    pub merged: bool,
}

/// A GitHub API effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GitHubEffect {
    // ─── Identity & repositories ──────────────────────────────────────────────
    /// Look up the login of the authenticated caller.
    GetAuthenticatedUser,

    /// Fetch repository metadata. Responds with `None` if it does not exist.
    GetRepository { repo: RepoId },

    /// Fork `upstream` into `organization`, or into the caller's account.
    CreateFork {
        upstream: RepoId,
        organization: Option<String>,
    },

    /// Delete a repository.
    DeleteRepository { repo: RepoId },

    /// Disable GitHub Actions on a repository.
    DisableActions { repo: RepoId },

    // ─── Commits & refs ───────────────────────────────────────────────────────
    /// Fetch commit metadata by full or abbreviated SHA. Responds with `None`
    /// if the commit is unknown to the repository.
    GetCommit { repo: RepoId, sha: String },

    /// Resolve the tip of a branch. Responds with `None` if the branch does
    /// not exist.
    GetBranchHead { repo: RepoId, branch: String },

    /// Delete `refs/heads/<branch>`.
    DeleteBranchRef { repo: RepoId, branch: String },

    // ─── Pull requests ────────────────────────────────────────────────────────
    /// Fetch a pull request.
    GetPullRequest { repo: RepoId, number: PrNumber },

    /// Find the open PR whose head is `<head_owner>:<branch>`.
    FindOpenPullRequest {
        repo: RepoId,
        head_owner: String,
        branch: String,
    },

    /// Open a pull request.
    CreatePullRequest {
        repo: RepoId,
        head: String,
        base: String,
        title: String,
        body: String,
    },
}

impl GitHubEffect {
    /// Short name for logging and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            GitHubEffect::GetAuthenticatedUser => "get_authenticated_user",
            GitHubEffect::GetRepository { .. } => "get_repository",
            GitHubEffect::CreateFork { .. } => "create_fork",
            GitHubEffect::DeleteRepository { .. } => "delete_repository",
            GitHubEffect::DisableActions { .. } => "disable_actions",
            GitHubEffect::GetCommit { .. } => "get_commit",
            GitHubEffect::GetBranchHead { .. } => "get_branch_head",
            GitHubEffect::DeleteBranchRef { .. } => "delete_branch_ref",
            GitHubEffect::GetPullRequest { .. } => "get_pull_request",
            GitHubEffect::FindOpenPullRequest { .. } => "find_open_pull_request",
            GitHubEffect::CreatePullRequest { .. } => "create_pull_request",
        }
    }
}

/// Response from executing a GitHub effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GitHubResponse {
    /// Login of the authenticated caller.
    User(String),

    /// Repository lookup or creation.
    Repository(Option<RepoData>),

    /// Commit lookup.
    Commit(Option<CommitData>),

    /// Branch tip lookup.
    BranchHead(Option<Sha>),

    /// A single pull request (fetched or created).
    PullRequest(PrData),

    /// Open PR search.
    OpenPullRequest(Option<PrData>),

    /// A repository or ref was deleted.
    Deleted,

    /// Actions were disabled.
    ActionsDisabled,
}
