//! Per-type operation handlers.
//!
//! Handlers never retry. An error fails the operation; it only runs again if
//! an operator re-enqueues it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::SharedClock;
use super::processor::OperationDispatcher;
use super::store::{NewFork, NewPr, OperationStore, StoreError};
use crate::effects::{GitEffect, GitHubInterpreter, GitInterpreter};
use crate::github::ops::{self, NewPullRequest};
use crate::github::{GitHubApiError, UrlError, parse_pr_url, parse_repo_url};
use crate::recreate::{
    ProgressEvent, ProgressSink, RecreateError, RecreateMode, RecreationRequest, Recreator,
};
use crate::types::{
    CreateForkPayload, CreatePrPayload, DeleteBranchPayload, DeleteForkPayload, Operation,
    OperationPayload, SimulatePrPayload,
};

/// Remote name of the cached clones' origin.
const CACHE_REMOTE: &str = "origin";

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    GitHub(#[from] GitHubApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The recreation pipeline failed; `last_status` is the final progress
    /// message it reported.
    #[error("{}", recreate_message(.source, .last_status.as_deref()))]
    Recreate {
        #[source]
        source: RecreateError,
        last_status: Option<String>,
    },
}

fn recreate_message(source: &RecreateError, last_status: Option<&str>) -> String {
    match last_status {
        Some(status) => format!("{source} (last status: {status})"),
        None => source.to_string(),
    }
}

impl From<UrlError> for HandlerError {
    fn from(err: UrlError) -> Self {
        HandlerError::InvalidPayload(err.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct HandlerConfig {
    /// Organization forks land in when a `create_fork` payload names none.
    pub fork_organization: Option<String>,
    /// Directory of cached clones, one `<owner>-<repo>` directory each.
    pub clone_cache: PathBuf,
}

/// Dispatches operations to the handler for their type.
pub struct OperationHandlers<H, G, S> {
    recreator: Arc<Recreator<H, G>>,
    store: Arc<S>,
    clock: SharedClock,
    config: HandlerConfig,
}

impl<H, G, S> OperationHandlers<H, G, S>
where
    H: GitHubInterpreter,
    G: GitInterpreter,
    S: OperationStore,
{
    pub fn new(
        recreator: Arc<Recreator<H, G>>,
        store: Arc<S>,
        clock: SharedClock,
        config: HandlerConfig,
    ) -> Self {
        OperationHandlers {
            recreator,
            store,
            clock,
            config,
        }
    }

    fn github(&self) -> &H {
        self.recreator.github().as_ref()
    }

    async fn create_fork(
        &self,
        payload: &CreateForkPayload,
    ) -> Result<serde_json::Value, HandlerError> {
        let organization = payload
            .organization
            .clone()
            .or_else(|| self.config.fork_organization.clone());
        let owner = match &organization {
            Some(org) => org.clone(),
            None => ops::authenticated_user(self.github()).await?,
        };
        let candidate = payload.upstream.with_owner(&owner);

        let (data, already_existed) = match ops::get_repository(self.github(), &candidate).await? {
            Some(data) => {
                info!(fork = %data.id, "Fork already exists");
                (data, true)
            }
            None => {
                let data =
                    ops::create_fork(self.github(), &payload.upstream, organization.as_deref())
                        .await?;
                info!(fork = %data.id, upstream = %payload.upstream, "Created fork");
                (data, false)
            }
        };

        let actions_disabled = match ops::disable_actions(self.github(), &data.id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(fork = %data.id, error = %e, "Could not disable Actions on fork");
                false
            }
        };

        let record = self
            .store
            .save_fork(
                NewFork {
                    upstream: Some(payload.upstream.clone()),
                    fork: data.id.clone(),
                    fork_url: data.html_url.clone(),
                },
                None,
                self.clock.utc(),
            )
            .await?;

        Ok(json!({
            "forkUrl": data.html_url,
            "fork": data.id,
            "alreadyExisted": already_existed,
            "actionsDisabled": actions_disabled,
            "forkRecordId": record.id,
        }))
    }

    async fn create_pr(&self, payload: &CreatePrPayload) -> Result<serde_json::Value, HandlerError> {
        let created = ops::create_pull_request(
            self.github(),
            NewPullRequest {
                repo: &payload.fork,
                head: payload.head.clone(),
                base: &payload.base,
                title: &payload.title,
                body: &payload.body,
            },
        )
        .await;

        let (pr, already_existed) = match created {
            Ok(pr) => (pr, false),
            Err(e) if e.is_already_exists() => {
                let existing = ops::find_open_pull_request(
                    self.github(),
                    &payload.fork,
                    &payload.fork.owner,
                    &payload.head,
                )
                .await?
                .ok_or(e)?;
                info!(pr = %existing.html_url, "PR already open for head");
                (existing, true)
            }
            Err(e) => return Err(e.into()),
        };

        let fork_id = self
            .store
            .find_fork(payload.fork.clone())
            .await?
            .map(|f| f.id);
        let record = self
            .store
            .save_pr(
                NewPr {
                    source_pr_url: None,
                    fork_id,
                    pr_url: Some(pr.html_url.clone()),
                    title: Some(pr.title.clone()),
                    head_branch: Some(payload.head.clone()),
                    status: "open".to_string(),
                },
                None,
                self.clock.utc(),
            )
            .await?;

        Ok(json!({
            "prUrl": pr.html_url,
            "prNumber": pr.number.0,
            "alreadyExisted": already_existed,
            "prRecordId": record.id,
        }))
    }

    async fn delete_fork(
        &self,
        payload: &DeleteForkPayload,
    ) -> Result<serde_json::Value, HandlerError> {
        ops::delete_repository(self.github(), &payload.fork).await?;
        info!(fork = %payload.fork, "Deleted fork");
        Ok(json!({ "deleted": payload.fork.to_string() }))
    }

    fn cached_clone(&self, payload: &DeleteBranchPayload) -> Option<PathBuf> {
        let dir = self
            .config
            .clone_cache
            .join(format!("{}-{}", payload.fork.owner, payload.fork.repo));
        dir.join(".git").exists().then_some(dir)
    }

    async fn delete_branch(
        &self,
        payload: &DeleteBranchPayload,
    ) -> Result<serde_json::Value, HandlerError> {
        if let Some(clone) = self.cached_clone(payload) {
            match self.delete_branch_with_git(&clone, &payload.branch).await {
                Ok(()) => {
                    info!(fork = %payload.fork, branch = %payload.branch, "Deleted branch via cached clone");
                    return Ok(json!({ "deleted": payload.branch, "method": "git" }));
                }
                Err(e) => warn!(
                    fork = %payload.fork,
                    branch = %payload.branch,
                    error = %e,
                    "Git deletion failed; falling back to the API"
                ),
            }
        } else {
            debug!(fork = %payload.fork, "No cached clone");
        }

        ops::delete_branch_ref(self.github(), &payload.fork, &payload.branch).await?;
        info!(fork = %payload.fork, branch = %payload.branch, "Deleted branch via API");
        Ok(json!({ "deleted": payload.branch, "method": "api" }))
    }

    async fn delete_branch_with_git(
        &self,
        clone: &Path,
        branch: &str,
    ) -> Result<(), crate::git::GitError> {
        self.recreator
            .git()
            .interpret(
                clone,
                GitEffect::DeleteRemoteBranch {
                    remote: CACHE_REMOTE.to_string(),
                    branch: branch.to_string(),
                },
            )
            .await
            .map(|_| ())
    }

    async fn simulate_pr(
        &self,
        payload: &SimulatePrPayload,
    ) -> Result<serde_json::Value, HandlerError> {
        let (upstream, number) = parse_pr_url(&payload.pr_url)?;
        let pr = ops::get_pull_request(self.github(), &upstream, number).await?;

        let commit = if pr.merged {
            pr.merge_commit_sha.clone()
        } else {
            pr.head_sha.clone()
        }
        .ok_or_else(|| {
            HandlerError::InvalidPayload(format!("{} has no commit to recreate", payload.pr_url))
        })?;
        debug!(%commit, merged = pr.merged, "Resolved PR commit");

        let request = RecreationRequest {
            mode: RecreateMode::Auto,
            repo_url: upstream.html_url(),
            commit_hash: Some(commit.to_string()),
            parent_commit_hash: None,
            upstream_refspecs: vec![format!(
                "+refs/pull/{number}/head:refs/remotes/upstream/pr/{number}"
            )],
        };

        let (sink, mut events) = ProgressSink::channel();
        let outcome = self.recreator.recreate(request, &sink).await;
        drop(sink);

        let mut messages = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ProgressEvent::Status { message, .. } = event {
                messages.push(message);
            }
        }

        let result = outcome.map_err(|source| HandlerError::Recreate {
            source,
            last_status: messages.last().cloned(),
        })?;

        let now = self.clock.utc();
        let fork = self
            .store
            .save_fork(
                NewFork {
                    upstream: Some(upstream.clone()),
                    fork: parse_repo_url(&result.fork_url)?,
                    fork_url: result.fork_url.clone(),
                },
                payload.fork_record_id,
                now,
            )
            .await?;
        let pr_record = self
            .store
            .save_pr(
                NewPr {
                    source_pr_url: Some(payload.pr_url.clone()),
                    fork_id: Some(fork.id),
                    pr_url: Some(result.pr_url.clone()),
                    title: Some(result.title.clone()),
                    head_branch: Some(result.branch_name.clone()),
                    status: "open".to_string(),
                },
                payload.pr_record_id,
                now,
            )
            .await?;

        Ok(json!({
            "prUrl": result.pr_url,
            "prNumber": result.pr_number,
            "forkUrl": result.fork_url,
            "commitHash": result.commit_hash,
            "branchName": result.branch_name,
            "title": result.title,
            "alreadyExisted": result.already_existed,
            "sourcePrUrl": payload.pr_url,
            "forkRecordId": fork.id,
            "prRecordId": pr_record.id,
            "messages": messages,
        }))
    }
}

impl<H, G, S> OperationDispatcher for OperationHandlers<H, G, S>
where
    H: GitHubInterpreter,
    G: GitInterpreter,
    S: OperationStore,
{
    type Error = HandlerError;

    async fn dispatch(&self, operation: &Operation) -> Result<serde_json::Value, HandlerError> {
        match &operation.payload {
            OperationPayload::CreateFork(p) => self.create_fork(p).await,
            OperationPayload::CreatePr(p) => self.create_pr(p).await,
            OperationPayload::DeleteFork(p) => self.delete_fork(p).await,
            OperationPayload::DeleteBranch(p) => self.delete_branch(p).await,
            OperationPayload::SimulatePr(p) => self.simulate_pr(p).await,
        }
    }
}
