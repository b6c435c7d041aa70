//! Typed wrappers over `GitHubInterpreter`.
//!
//! Each helper issues one effect and unpacks the matching response variant,
//! so callers never match on `GitHubResponse` themselves.

use crate::effects::{CommitData, GitHubEffect, GitHubInterpreter, GitHubResponse, PrData, RepoData};
use crate::types::{PrNumber, RepoId, Sha};

use super::error::GitHubApiError;

fn unexpected(effect: &'static str, response: GitHubResponse) -> GitHubApiError {
    GitHubApiError::other(format!("unexpected response to {}: {:?}", effect, response))
}

pub async fn authenticated_user<H: GitHubInterpreter>(github: &H) -> Result<String, GitHubApiError> {
    match github.interpret(GitHubEffect::GetAuthenticatedUser).await? {
        GitHubResponse::User(login) => Ok(login),
        other => Err(unexpected("get_authenticated_user", other)),
    }
}

pub async fn get_repository<H: GitHubInterpreter>(
    github: &H,
    repo: &RepoId,
) -> Result<Option<RepoData>, GitHubApiError> {
    let effect = GitHubEffect::GetRepository { repo: repo.clone() };
    match github.interpret(effect).await? {
        GitHubResponse::Repository(data) => Ok(data),
        other => Err(unexpected("get_repository", other)),
    }
}

pub async fn create_fork<H: GitHubInterpreter>(
    github: &H,
    upstream: &RepoId,
    organization: Option<&str>,
) -> Result<RepoData, GitHubApiError> {
    let effect = GitHubEffect::CreateFork {
        upstream: upstream.clone(),
        organization: organization.map(str::to_string),
    };
    match github.interpret(effect).await? {
        GitHubResponse::Repository(Some(data)) => Ok(data),
        other => Err(unexpected("create_fork", other)),
    }
}

pub async fn delete_repository<H: GitHubInterpreter>(
    github: &H,
    repo: &RepoId,
) -> Result<(), GitHubApiError> {
    let effect = GitHubEffect::DeleteRepository { repo: repo.clone() };
    match github.interpret(effect).await? {
        GitHubResponse::Deleted => Ok(()),
        other => Err(unexpected("delete_repository", other)),
    }
}

pub async fn disable_actions<H: GitHubInterpreter>(
    github: &H,
    repo: &RepoId,
) -> Result<(), GitHubApiError> {
    let effect = GitHubEffect::DisableActions { repo: repo.clone() };
    match github.interpret(effect).await? {
        GitHubResponse::ActionsDisabled => Ok(()),
        other => Err(unexpected("disable_actions", other)),
    }
}

pub async fn get_commit<H: GitHubInterpreter>(
    github: &H,
    repo: &RepoId,
    sha: &str,
) -> Result<Option<CommitData>, GitHubApiError> {
    let effect = GitHubEffect::GetCommit {
        repo: repo.clone(),
        sha: sha.to_string(),
    };
    match github.interpret(effect).await? {
        GitHubResponse::Commit(data) => Ok(data),
        other => Err(unexpected("get_commit", other)),
    }
}

pub async fn get_branch_head<H: GitHubInterpreter>(
    github: &H,
    repo: &RepoId,
    branch: &str,
) -> Result<Option<Sha>, GitHubApiError> {
    let effect = GitHubEffect::GetBranchHead {
        repo: repo.clone(),
        branch: branch.to_string(),
    };
    match github.interpret(effect).await? {
        GitHubResponse::BranchHead(sha) => Ok(sha),
        other => Err(unexpected("get_branch_head", other)),
    }
}

pub async fn delete_branch_ref<H: GitHubInterpreter>(
    github: &H,
    repo: &RepoId,
    branch: &str,
) -> Result<(), GitHubApiError> {
    let effect = GitHubEffect::DeleteBranchRef {
        repo: repo.clone(),
        branch: branch.to_string(),
    };
    match github.interpret(effect).await? {
        GitHubResponse::Deleted => Ok(()),
        other => Err(unexpected("delete_branch_ref", other)),
    }
}

pub async fn get_pull_request<H: GitHubInterpreter>(
    github: &H,
    repo: &RepoId,
    number: PrNumber,
) -> Result<PrData, GitHubApiError> {
    let effect = GitHubEffect::GetPullRequest {
        repo: repo.clone(),
        number,
    };
    match github.interpret(effect).await? {
        GitHubResponse::PullRequest(pr) => Ok(pr),
        other => Err(unexpected("get_pull_request", other)),
    }
}

pub async fn find_open_pull_request<H: GitHubInterpreter>(
    github: &H,
    repo: &RepoId,
    head_owner: &str,
    branch: &str,
) -> Result<Option<PrData>, GitHubApiError> {
    let effect = GitHubEffect::FindOpenPullRequest {
        repo: repo.clone(),
        head_owner: head_owner.to_string(),
        branch: branch.to_string(),
    };
    match github.interpret(effect).await? {
        GitHubResponse::OpenPullRequest(pr) => Ok(pr),
        other => Err(unexpected("find_open_pull_request", other)),
    }
}

/// Parameters for opening a pull request.
#[derive(Debug, Clone)]
pub struct NewPullRequest<'a> {
    pub repo: &'a RepoId,
    /// `<owner>:<branch>` for cross-repository PRs, or a bare branch name.
    pub head: String,
    pub base: &'a str,
    pub title: &'a str,
    pub body: &'a str,
}

pub async fn create_pull_request<H: GitHubInterpreter>(
    github: &H,
    pr: NewPullRequest<'_>,
) -> Result<PrData, GitHubApiError> {
    let effect = GitHubEffect::CreatePullRequest {
        repo: pr.repo.clone(),
        head: pr.head,
        base: pr.base.to_string(),
        title: pr.title.to_string(),
        body: pr.body.to_string(),
    };
    match github.interpret(effect).await? {
        GitHubResponse::PullRequest(pr) => Ok(pr),
        other => Err(unexpected("create_pull_request", other)),
    }
}
