//! GitHub effect interpreter using octocrab.
//!
//! Typed octocrab builders are used where they exist. Commits, branch tips and
//! the Actions permission toggle go through raw routes.
//!
//! Lookups (`GetRepository`, `GetCommit`, `GetBranchHead`) answer `None` on
//! 404 rather than failing.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::effects::{
    CommitData, GitHubEffect, GitHubInterpreter, GitHubResponse, PrData, RepoData,
};
use crate::types::{PrNumber, RepoId, Sha};

use super::client::OctocrabClient;
use super::error::{GitHubApiError, GitHubErrorKind};
use super::url::pr_html_url;

// ─── REST Types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
    #[serde(default)]
    parents: Vec<CommitParent>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct CommitParent {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    commit: BranchCommit,
}

#[derive(Debug, Deserialize)]
struct BranchCommit {
    sha: String,
}

#[derive(Debug, Serialize)]
struct ActionsPermissions {
    enabled: bool,
}

// ─── Interpreter Implementation ───────────────────────────────────────────────

impl GitHubInterpreter for OctocrabClient {
    async fn interpret(&self, effect: GitHubEffect) -> Result<GitHubResponse, GitHubApiError> {
        debug!(effect = effect.name(), "executing GitHub effect");
        interpret_github_effect(self, effect).await
    }
}

/// Interprets a GitHub effect, executing it against the GitHub API.
pub async fn interpret_github_effect(
    client: &OctocrabClient,
    effect: GitHubEffect,
) -> Result<GitHubResponse, GitHubApiError> {
    match effect {
        GitHubEffect::GetAuthenticatedUser => get_authenticated_user(client).await,
        GitHubEffect::GetRepository { repo } => get_repository(client, repo).await,
        GitHubEffect::CreateFork {
            upstream,
            organization,
        } => create_fork(client, upstream, organization).await,
        GitHubEffect::DeleteRepository { repo } => delete_repository(client, repo).await,
        GitHubEffect::DisableActions { repo } => disable_actions(client, repo).await,
        GitHubEffect::GetCommit { repo, sha } => get_commit(client, repo, sha).await,
        GitHubEffect::GetBranchHead { repo, branch } => {
            get_branch_head(client, repo, branch).await
        }
        GitHubEffect::DeleteBranchRef { repo, branch } => {
            delete_branch_ref(client, repo, branch).await
        }
        GitHubEffect::GetPullRequest { repo, number } => {
            get_pull_request(client, repo, number).await
        }
        GitHubEffect::FindOpenPullRequest {
            repo,
            head_owner,
            branch,
        } => find_open_pull_request(client, repo, head_owner, branch).await,
        GitHubEffect::CreatePullRequest {
            repo,
            head,
            base,
            title,
            body,
        } => create_pull_request(client, repo, head, base, title, body).await,
    }
}

/// Maps a 404 to `Ok(None)`, passing other results through.
fn none_if_not_found<T>(result: Result<T, GitHubApiError>) -> Result<Option<T>, GitHubApiError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn parse_sha(sha: &str, what: &str) -> Result<Sha, GitHubApiError> {
    Sha::parse(sha).map_err(|e| GitHubApiError::other(format!("invalid {} SHA: {}", what, e)))
}

// ─── Identity & Repositories ──────────────────────────────────────────────────

async fn get_authenticated_user(client: &OctocrabClient) -> Result<GitHubResponse, GitHubApiError> {
    let user = client
        .inner()
        .current()
        .user()
        .await
        .map_err(GitHubApiError::from_octocrab)?;
    Ok(GitHubResponse::User(user.login))
}

fn repo_data(fallback: &RepoId, repo: octocrab::models::Repository) -> RepoData {
    let owner = repo
        .owner
        .map(|o| o.login)
        .unwrap_or_else(|| fallback.owner.clone());
    let id = RepoId::new(owner, repo.name);
    RepoData {
        html_url: repo
            .html_url
            .map(|u| u.to_string())
            .unwrap_or_else(|| id.html_url()),
        id,
        default_branch: repo.default_branch,
        is_fork: repo.fork.unwrap_or(false),
    }
}

async fn get_repository(client: &OctocrabClient, repo: RepoId) -> Result<GitHubResponse, GitHubApiError> {
    let result = client
        .inner()
        .repos(&repo.owner, &repo.repo)
        .get()
        .await
        .map_err(GitHubApiError::from_octocrab);

    let data = none_if_not_found(result)?.map(|r| repo_data(&repo, r));
    Ok(GitHubResponse::Repository(data))
}

async fn create_fork(
    client: &OctocrabClient,
    upstream: RepoId,
    organization: Option<String>,
) -> Result<GitHubResponse, GitHubApiError> {
    let repos = client.inner().repos(&upstream.owner, &upstream.repo);
    let mut builder = repos.create_fork();
    if let Some(org) = organization {
        builder = builder.organization(org);
    }
    let fork = builder.send().await.map_err(GitHubApiError::from_octocrab)?;
    Ok(GitHubResponse::Repository(Some(repo_data(&upstream, fork))))
}

async fn delete_repository(
    client: &OctocrabClient,
    repo: RepoId,
) -> Result<GitHubResponse, GitHubApiError> {
    client
        .inner()
        .repos(&repo.owner, &repo.repo)
        .delete()
        .await
        .map_err(GitHubApiError::from_octocrab)?;
    Ok(GitHubResponse::Deleted)
}

async fn disable_actions(client: &OctocrabClient, repo: RepoId) -> Result<GitHubResponse, GitHubApiError> {
    let route = format!("/repos/{}/{}/actions/permissions", repo.owner, repo.repo);
    let response = client
        .inner()
        ._put(route, Some(&ActionsPermissions { enabled: false }))
        .await
        .map_err(GitHubApiError::from_octocrab)?;
    octocrab::map_github_error(response)
        .await
        .map_err(GitHubApiError::from_octocrab)?;
    Ok(GitHubResponse::ActionsDisabled)
}

// ─── Commits & Refs ───────────────────────────────────────────────────────────

async fn get_commit(
    client: &OctocrabClient,
    repo: RepoId,
    sha: String,
) -> Result<GitHubResponse, GitHubApiError> {
    let route = format!("/repos/{}/{}/commits/{}", repo.owner, repo.repo, sha);
    let result: Result<CommitResponse, _> = client
        .inner()
        .get(&route, None::<&()>)
        .await
        .map_err(GitHubApiError::from_octocrab);

    // An unknown SHA is a 422 ("No commit found for SHA") rather than a 404.
    let result = match result {
        Err(e)
            if e.kind == GitHubErrorKind::Other
                && e.status_code == Some(422)
                && e.message.to_lowercase().contains("no commit found") =>
        {
            return Ok(GitHubResponse::Commit(None));
        }
        other => other,
    };

    let Some(commit) = none_if_not_found(result)? else {
        return Ok(GitHubResponse::Commit(None));
    };

    let parents = commit
        .parents
        .iter()
        .map(|p| parse_sha(&p.sha, "parent"))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(GitHubResponse::Commit(Some(CommitData {
        sha: parse_sha(&commit.sha, "commit")?,
        message: commit.commit.message,
        parents,
    })))
}

async fn get_branch_head(
    client: &OctocrabClient,
    repo: RepoId,
    branch: String,
) -> Result<GitHubResponse, GitHubApiError> {
    let route = format!(
        "/repos/{}/{}/branches/{}",
        repo.owner,
        repo.repo,
        urlencoding::encode(&branch)
    );
    let result: Result<BranchResponse, _> = client
        .inner()
        .get(&route, None::<&()>)
        .await
        .map_err(GitHubApiError::from_octocrab);

    let head = match none_if_not_found(result)? {
        Some(branch) => Some(parse_sha(&branch.commit.sha, "branch head")?),
        None => None,
    };
    Ok(GitHubResponse::BranchHead(head))
}

async fn delete_branch_ref(
    client: &OctocrabClient,
    repo: RepoId,
    branch: String,
) -> Result<GitHubResponse, GitHubApiError> {
    client
        .inner()
        .repos(&repo.owner, &repo.repo)
        .delete_ref(&octocrab::params::repos::Reference::Branch(branch))
        .await
        .map_err(GitHubApiError::from_octocrab)?;
    Ok(GitHubResponse::Deleted)
}

// ─── Pull Requests ────────────────────────────────────────────────────────────

fn pr_data(repo: &RepoId, pull: octocrab::models::pulls::PullRequest) -> Result<PrData, GitHubApiError> {
    let number = PrNumber(pull.number);
    let head_sha = if pull.head.sha.is_empty() {
        None
    } else {
        Some(parse_sha(&pull.head.sha, "head")?)
    };
    let merge_commit_sha = match pull.merge_commit_sha.as_deref() {
        Some(sha) if !sha.is_empty() => Some(parse_sha(sha, "merge commit")?),
        _ => None,
    };

    Ok(PrData {
        number,
        html_url: pull
            .html_url
            .map(|u| u.to_string())
            .unwrap_or_else(|| pr_html_url(repo, number)),
        title: pull.title.unwrap_or_default(),
        head_ref: pull.head.ref_field,
        head_sha,
        base_ref: pull.base.ref_field,
        merge_commit_sha,
        merged: pull.merged_at.is_some() || pull.merged.unwrap_or(false),
    })
}

async fn get_pull_request(
    client: &OctocrabClient,
    repo: RepoId,
    number: PrNumber,
) -> Result<GitHubResponse, GitHubApiError> {
    let pull = client
        .inner()
        .pulls(&repo.owner, &repo.repo)
        .get(number.0)
        .await
        .map_err(GitHubApiError::from_octocrab)?;
    Ok(GitHubResponse::PullRequest(pr_data(&repo, pull)?))
}

async fn find_open_pull_request(
    client: &OctocrabClient,
    repo: RepoId,
    head_owner: String,
    branch: String,
) -> Result<GitHubResponse, GitHubApiError> {
    let page = client
        .inner()
        .pulls(&repo.owner, &repo.repo)
        .list()
        .state(octocrab::params::State::Open)
        .head(format!("{}:{}", head_owner, branch))
        .per_page(10)
        .send()
        .await
        .map_err(GitHubApiError::from_octocrab)?;

    let found = page
        .items
        .into_iter()
        .find(|pull| pull.head.ref_field == branch)
        .map(|pull| pr_data(&repo, pull))
        .transpose()?;
    Ok(GitHubResponse::OpenPullRequest(found))
}

async fn create_pull_request(
    client: &OctocrabClient,
    repo: RepoId,
    head: String,
    base: String,
    title: String,
    body: String,
) -> Result<GitHubResponse, GitHubApiError> {
    let pull = client
        .inner()
        .pulls(&repo.owner, &repo.repo)
        .create(title, head, base)
        .body(body)
        .send()
        .await
        .map_err(GitHubApiError::from_octocrab)?;
    Ok(GitHubResponse::PullRequest(pr_data(&repo, pull)?))
}
