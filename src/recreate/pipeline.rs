//! The recreation pipeline.
//!
//! Steps run strictly in order; each consumes the previous step's output:
//!
//! 1. resolve the fork (auto mode: find or create it under the caller)
//! 2. resolve the target commit (default: tip of `main`, else `master`)
//! 3. resolve the parent and whether the target is a merge
//! 4. return early if an open PR already exists for the review branch
//! 5. clone the fork into a fresh temporary directory
//! 6. create (or reset) the review branch at the parent
//! 7. cherry-pick the target, with `-m` for merges
//! 8. force-push the branch
//! 9. open the PR, adopting a concurrently created one
//! 10. remove the clone
//!
//! Nothing is mutated before step 5 except fork creation in auto mode.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::effects::{CommitData, GitEffect, GitHubInterpreter, GitInterpreter, GitResponse, PrData, RemoteUrl};
use crate::git::{CherryPickResult, GitError, PushResult};
use crate::github::ops::{self, NewPullRequest};
use crate::github::{commit_subject, looks_like_commit_hash, parse_repo_url, review_branch_name};
use crate::types::{RepoId, Sha};

use super::progress::{ProgressSink, Stage};
use super::{RecreateError, RecreateMode, RecreationRequest, RecreationResult, RecreatorConfig};

/// Remote name for the upstream repository in auto mode.
const UPSTREAM_REMOTE: &str = "upstream";

/// Branches tried, in order, when a default branch is needed.
const BASE_BRANCH_CANDIDATES: [&str; 2] = ["main", "master"];

/// Recreates commits as pull requests.
pub struct Recreator<H, G> {
    github: Arc<H>,
    git: Arc<G>,
    config: RecreatorConfig,
}

/// The repository a recreation works in.
#[derive(Debug, Clone)]
struct ForkTarget {
    fork: RepoId,
    fork_url: String,
    default_branch: Option<String>,
    /// Set in auto mode when the fork is distinct from the upstream.
    upstream: Option<RepoId>,
}

impl ForkTarget {
    /// The repository the change originally came from.
    fn source(&self) -> &RepoId {
        self.upstream.as_ref().unwrap_or(&self.fork)
    }
}

/// The commit to replay and where to replay it.
#[derive(Debug, Clone)]
struct ReplayPlan {
    commit: CommitData,
    parent: Sha,
    /// `-m` parent number; only set for merge commits.
    mainline: Option<u32>,
    branch: String,
    title: String,
}

impl ReplayPlan {
    fn is_merge(&self) -> bool {
        self.commit.parents.len() > 1
    }
}

impl<H: GitHubInterpreter, G: GitInterpreter> Recreator<H, G> {
    pub fn new(github: Arc<H>, git: Arc<G>, config: RecreatorConfig) -> Self {
        Recreator {
            github,
            git,
            config,
        }
    }

    pub fn github(&self) -> &Arc<H> {
        &self.github
    }

    pub fn git(&self) -> &Arc<G> {
        &self.git
    }

    pub fn config(&self) -> &RecreatorConfig {
        &self.config
    }

    /// Check everything that can be checked without touching the network.
    ///
    /// Returns the repository named by the request.
    pub fn validate(&self, request: &RecreationRequest) -> Result<RepoId, RecreateError> {
        self.token()?;
        let repo = parse_repo_url(&request.repo_url)?;

        if request.mode == RecreateMode::Manual {
            if request.commit_hash.is_none() {
                return Err(RecreateError::InvalidInput(
                    "commitHash is required".to_string(),
                ));
            }
            if request.parent_commit_hash.is_none() {
                return Err(RecreateError::InvalidInput(
                    "parentCommitHash is required".to_string(),
                ));
            }
        }

        for (field, value) in [
            ("commitHash", &request.commit_hash),
            ("parentCommitHash", &request.parent_commit_hash),
        ] {
            if let Some(hash) = value
                && !looks_like_commit_hash(hash)
            {
                return Err(RecreateError::InvalidInput(format!(
                    "{} is not a commit hash: {:?}",
                    field, hash
                )));
            }
        }

        Ok(repo)
    }

    fn token(&self) -> Result<&str, RecreateError> {
        self.config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RecreateError::Configuration("no GitHub token configured".to_string()))
    }

    /// Recreate a commit as a pull request.
    ///
    /// Emits status events to `progress` and always finishes with exactly one
    /// result event.
    #[instrument(skip_all, fields(mode = ?request.mode, repo = %request.repo_url))]
    pub async fn recreate(
        &self,
        request: RecreationRequest,
        progress: &ProgressSink,
    ) -> Result<RecreationResult, RecreateError> {
        let outcome = self.run(&request, progress).await;
        match &outcome {
            Ok(result) => info!(
                pr_url = %result.pr_url,
                already_existed = result.already_existed,
                "Recreation finished"
            ),
            Err(e) => warn!(error = %e, kind = e.kind(), "Recreation failed"),
        }
        progress.finish(&outcome);
        outcome
    }

    async fn run(
        &self,
        request: &RecreationRequest,
        progress: &ProgressSink,
    ) -> Result<RecreationResult, RecreateError> {
        let repo = self.validate(request)?;

        let target = match request.mode {
            RecreateMode::Manual => self.resolve_manual(&repo, progress).await?,
            RecreateMode::Auto => self.resolve_auto(&repo, progress).await?,
        };

        let plan = self.plan(&target, request, progress).await?;

        progress.info(
            Stage::CheckExisting,
            format!("Checking for an open PR from {}", plan.branch),
        );
        if let Some(existing) = self.existing_pr(&target, &plan.branch).await {
            progress.info(
                Stage::CheckExisting,
                format!("PR already exists: {}", existing.html_url),
            );
            return Ok(result(&target, &plan, existing, true));
        }

        let workspace = self.create_workspace().await?;
        let outcome = match self
            .replay(&workspace.path().join("repo"), &target, &plan, request, progress)
            .await
        {
            Ok(()) => self.open_pr(&target, &plan, progress).await,
            Err(e) => Err(e),
        };

        progress.info(Stage::Cleanup, "Removing working clone");
        remove_workspace(workspace).await;
        outcome
    }

    // ─── Resolution ───────────────────────────────────────────────────────────

    async fn resolve_manual(
        &self,
        fork: &RepoId,
        progress: &ProgressSink,
    ) -> Result<ForkTarget, RecreateError> {
        progress.info(Stage::ResolveRepository, format!("Looking up {}", fork));
        let data = ops::get_repository(self.github.as_ref(), fork)
            .await?
            .ok_or_else(|| RecreateError::NotFound(format!("repository {} not found", fork)))?;

        Ok(ForkTarget {
            fork: data.id,
            fork_url: data.html_url,
            default_branch: data.default_branch,
            upstream: None,
        })
    }

    async fn resolve_auto(
        &self,
        upstream: &RepoId,
        progress: &ProgressSink,
    ) -> Result<ForkTarget, RecreateError> {
        progress.info(Stage::ResolveRepository, "Resolving authenticated identity");
        let login = ops::authenticated_user(self.github.as_ref()).await?;

        if upstream.owner.eq_ignore_ascii_case(&login) {
            // The caller owns the repository; it is its own fork.
            return self.resolve_manual(upstream, progress).await;
        }

        let candidate = upstream.with_owner(&login);
        let existing = ops::get_repository(self.github.as_ref(), &candidate).await?;
        let data = match existing {
            Some(data) => {
                if !data.is_fork {
                    warn!(repo = %data.id, "Repository under the caller is not a fork; using it anyway");
                }
                progress.info(
                    Stage::ResolveRepository,
                    format!("Using existing fork {}", data.id),
                );
                data
            }
            None => {
                progress.info(
                    Stage::ResolveRepository,
                    format!("Forking {} into {}", upstream, login),
                );
                let data = ops::create_fork(self.github.as_ref(), upstream, None).await?;
                info!(fork = %data.id, "Created fork");
                if !self.config.fork_settle_delay.is_zero() {
                    progress.info(Stage::ResolveRepository, "Waiting for the fork to become ready");
                    tokio::time::sleep(self.config.fork_settle_delay).await;
                }
                data
            }
        };

        Ok(ForkTarget {
            fork: data.id,
            fork_url: data.html_url,
            default_branch: data.default_branch,
            upstream: Some(upstream.clone()),
        })
    }

    /// Resolve the target commit, its parent and the review branch.
    async fn plan(
        &self,
        target: &ForkTarget,
        request: &RecreationRequest,
        progress: &ProgressSink,
    ) -> Result<ReplayPlan, RecreateError> {
        let commit_ref = match &request.commit_hash {
            Some(hash) => hash.clone(),
            None => {
                let (branch, tip) = self.base_branch(target).await?;
                let tip = tip.ok_or_else(|| {
                    RecreateError::NotFound(format!("{} has no main or master branch", target.fork))
                })?;
                progress.info(
                    Stage::ResolveCommit,
                    format!("No commit given; using tip of {} ({})", branch, tip.short()),
                );
                tip.to_string()
            }
        };

        progress.info(Stage::ResolveCommit, format!("Resolving commit {}", commit_ref));
        let commit = self
            .lookup_commit(target, &commit_ref)
            .await?
            .ok_or_else(|| RecreateError::NotFound(format!("commit {} not found", commit_ref)))?;

        progress.info(Stage::ResolveParent, "Resolving parent commit");
        let (parent, mainline) = match &request.parent_commit_hash {
            Some(given) => self.chosen_parent(target, &commit, given).await?,
            None => {
                let parent = commit.parents.first().cloned().ok_or_else(|| no_parent(&commit))?;
                (parent, 1)
            }
        };
        let is_merge = commit.parents.len() > 1;
        if is_merge {
            progress.info(
                Stage::ResolveParent,
                format!(
                    "{} is a merge commit; replaying against parent {}",
                    commit.sha.short(),
                    mainline
                ),
            );
        }

        Ok(ReplayPlan {
            branch: review_branch_name(&commit.sha),
            title: commit_subject(&commit.message, &commit.sha),
            mainline: is_merge.then_some(mainline),
            parent,
            commit,
        })
    }

    /// Match a caller-supplied parent against the commit's parents.
    ///
    /// A listed parent selects the mainline by position. An unlisted one is
    /// resolved on its own and the first parent is used as mainline.
    async fn chosen_parent(
        &self,
        target: &ForkTarget,
        commit: &CommitData,
        given: &str,
    ) -> Result<(Sha, u32), RecreateError> {
        if commit.parents.is_empty() {
            return Err(no_parent(commit));
        }

        let given_lower = given.to_ascii_lowercase();
        if let Some(index) = commit
            .parents
            .iter()
            .position(|p| p.as_str().starts_with(&given_lower))
        {
            return Ok((commit.parents[index].clone(), index as u32 + 1));
        }

        let parent = self
            .lookup_commit(target, given)
            .await?
            .ok_or_else(|| RecreateError::NotFound(format!("parent commit {} not found", given)))?;
        debug!(parent = %parent.sha, "Parent is not a direct parent of the commit");
        Ok((parent.sha, 1))
    }

    /// Look up a commit in the fork, then in the upstream.
    async fn lookup_commit(
        &self,
        target: &ForkTarget,
        rev: &str,
    ) -> Result<Option<CommitData>, RecreateError> {
        if let Some(commit) = ops::get_commit(self.github.as_ref(), &target.fork, rev).await? {
            return Ok(Some(commit));
        }
        match &target.upstream {
            Some(upstream) => Ok(ops::get_commit(self.github.as_ref(), upstream, rev).await?),
            None => Ok(None),
        }
    }

    /// The fork's base branch and its tip: `main`, else `master`, else the
    /// repository's default branch.
    async fn base_branch(&self, target: &ForkTarget) -> Result<(String, Option<Sha>), RecreateError> {
        for candidate in BASE_BRANCH_CANDIDATES {
            if let Some(tip) = ops::get_branch_head(self.github.as_ref(), &target.fork, candidate).await? {
                return Ok((candidate.to_string(), Some(tip)));
            }
        }

        match &target.default_branch {
            Some(branch) if !BASE_BRANCH_CANDIDATES.contains(&branch.as_str()) => {
                let tip = ops::get_branch_head(self.github.as_ref(), &target.fork, branch).await?;
                Ok((branch.clone(), tip))
            }
            _ => Ok((BASE_BRANCH_CANDIDATES[0].to_string(), None)),
        }
    }

    /// Best-effort lookup of an open PR from `branch`. Failures are logged.
    async fn existing_pr(&self, target: &ForkTarget, branch: &str) -> Option<PrData> {
        match ops::find_open_pull_request(self.github.as_ref(), &target.fork, &target.fork.owner, branch)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, branch, "Could not check for an existing PR; continuing");
                None
            }
        }
    }

    // ─── Replay ───────────────────────────────────────────────────────────────

    async fn create_workspace(&self) -> Result<tempfile::TempDir, RecreateError> {
        tokio::fs::create_dir_all(&self.config.workspace_root).await?;
        let workspace = tempfile::Builder::new()
            .prefix("recreate-")
            .tempdir_in(&self.config.workspace_root)?;
        Ok(workspace)
    }

    async fn run_git(&self, workdir: &Path, effect: GitEffect) -> Result<GitResponse, GitError> {
        self.git.interpret(workdir, effect).await
    }

    async fn replay(
        &self,
        clone_dir: &Path,
        target: &ForkTarget,
        plan: &ReplayPlan,
        request: &RecreationRequest,
        progress: &ProgressSink,
    ) -> Result<(), RecreateError> {
        let token = self.token()?;

        progress.info(Stage::Clone, format!("Cloning {}", target.fork));
        self.run_git(
            clone_dir,
            GitEffect::Clone {
                url: RemoteUrl::with_token(&target.fork, token),
            },
        )
        .await?;

        if let Some(upstream) = &target.upstream {
            progress.info(Stage::Clone, format!("Fetching {}", upstream));
            self.run_git(
                clone_dir,
                GitEffect::AddRemote {
                    name: UPSTREAM_REMOTE.to_string(),
                    url: RemoteUrl::with_token(upstream, token),
                },
            )
            .await?;

            let mut refspecs = vec![format!(
                "+refs/heads/*:refs/remotes/{}/*",
                UPSTREAM_REMOTE
            )];
            refspecs.extend(request.upstream_refspecs.iter().cloned());
            self.run_git(
                clone_dir,
                GitEffect::Fetch {
                    remote: UPSTREAM_REMOTE.to_string(),
                    refspecs,
                },
            )
            .await?;
        }

        progress.info(
            Stage::CreateBranch,
            format!("Creating {} at {}", plan.branch, plan.parent.short()),
        );
        let branched = self
            .run_git(
                clone_dir,
                GitEffect::CreateBranch {
                    branch: plan.branch.clone(),
                    start_point: plan.parent.clone(),
                },
            )
            .await;
        match branched {
            Ok(GitResponse::Branch(outcome)) => debug!(?outcome, branch = %plan.branch, "Review branch ready"),
            Ok(other) => return Err(unexpected("create_branch", other).into()),
            Err(GitError::RefNotFound { .. }) => {
                return Err(RecreateError::NotFound(format!(
                    "parent commit {} is not reachable in {}",
                    plan.parent, target.fork
                )));
            }
            Err(e) => return Err(e.into()),
        }

        progress.info(
            Stage::CherryPick,
            format!("Cherry-picking {}", plan.commit.sha.short()),
        );
        let picked = self
            .run_git(
                clone_dir,
                GitEffect::CherryPick {
                    commit: plan.commit.sha.clone(),
                    mainline: plan.mainline,
                },
            )
            .await?;
        match picked {
            GitResponse::CherryPick(CherryPickResult::Applied { commit_sha }) => {
                debug!(%commit_sha, "Cherry-pick applied");
            }
            GitResponse::CherryPick(CherryPickResult::Conflict { conflicting_files }) => {
                progress.error(
                    Stage::CherryPick,
                    format!("Conflicts in {}", conflicting_files.join(", ")),
                );
                return Err(RecreateError::Conflict {
                    commit: plan.commit.sha.clone(),
                    files: conflicting_files,
                });
            }
            GitResponse::CherryPick(CherryPickResult::Empty) => {
                return Err(RecreateError::InvalidInput(format!(
                    "commit {} introduces no changes on top of {}",
                    plan.commit.sha.short(),
                    plan.parent.short()
                )));
            }
            other => return Err(unexpected("cherry_pick", other).into()),
        }

        progress.info(Stage::Push, format!("Pushing {}", plan.branch));
        let pushed = self
            .run_git(
                clone_dir,
                GitEffect::Push {
                    remote: "origin".to_string(),
                    branch: plan.branch.clone(),
                    force: true,
                },
            )
            .await;
        match pushed {
            Ok(GitResponse::Push(PushResult::Success { .. } | PushResult::AlreadyUpToDate)) => Ok(()),
            Ok(GitResponse::Push(PushResult::Rejected { details })) => {
                progress.error(Stage::Push, "Push rejected");
                Err(RecreateError::Push(details))
            }
            Ok(other) => Err(unexpected("push", other).into()),
            Err(e) => {
                progress.error(Stage::Push, "Push failed");
                Err(RecreateError::Push(e.to_string()))
            }
        }
    }

    // ─── Pull request ─────────────────────────────────────────────────────────

    async fn open_pr(
        &self,
        target: &ForkTarget,
        plan: &ReplayPlan,
        progress: &ProgressSink,
    ) -> Result<RecreationResult, RecreateError> {
        let (base, _) = self.base_branch(target).await?;
        progress.info(
            Stage::CreatePr,
            format!("Opening PR {} -> {}", plan.branch, base),
        );

        let body = pr_body(target, plan);
        let created = ops::create_pull_request(
            self.github.as_ref(),
            NewPullRequest {
                repo: &target.fork,
                head: plan.branch.clone(),
                base: &base,
                title: &plan.title,
                body: &body,
            },
        )
        .await;

        match created {
            Ok(pr) => {
                progress.info(Stage::CreatePr, format!("Opened {}", pr.html_url));
                Ok(result(target, plan, pr, false))
            }
            Err(e) if e.is_already_exists() => {
                info!(branch = %plan.branch, "PR was created concurrently; adopting it");
                let existing = ops::find_open_pull_request(
                    self.github.as_ref(),
                    &target.fork,
                    &target.fork.owner,
                    &plan.branch,
                )
                .await?;
                match existing {
                    Some(pr) => Ok(result(target, plan, pr, true)),
                    None => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn no_parent(commit: &CommitData) -> RecreateError {
    RecreateError::InvalidInput(format!(
        "commit {} has no parent and cannot be cherry-picked",
        commit.sha.short()
    ))
}

fn unexpected(effect: &str, response: GitResponse) -> GitError {
    GitError::CommandFailed {
        command: effect.to_string(),
        stderr: format!("unexpected response: {:?}", response),
    }
}

async fn remove_workspace(workspace: tempfile::TempDir) {
    let path: PathBuf = workspace.path().to_path_buf();
    match tokio::task::spawn_blocking(move || workspace.close()).await {
        Ok(Ok(())) => debug!(path = %path.display(), "Removed working clone"),
        Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Failed to remove working clone"),
        Err(e) => warn!(path = %path.display(), error = %e, "Cleanup task failed"),
    }
}

fn result(target: &ForkTarget, plan: &ReplayPlan, pr: PrData, already_existed: bool) -> RecreationResult {
    RecreationResult {
        pr_url: pr.html_url,
        fork_url: target.fork_url.clone(),
        commit_hash: plan.commit.sha.to_string(),
        already_existed,
        title: if pr.title.is_empty() {
            plan.title.clone()
        } else {
            pr.title
        },
        branch_name: plan.branch.clone(),
        pr_number: pr.number.0,
    }
}

fn pr_body(target: &ForkTarget, plan: &ReplayPlan) -> String {
    let source = target.source();
    let mut body = format!(
        "Recreated from {}/commit/{} for review.\n\n\
         - Original commit: `{}`\n\
         - Parent commit: `{}`\n\
         - Upstream: {}\n",
        source.html_url(),
        plan.commit.sha,
        plan.commit.sha,
        plan.parent,
        source,
    );
    if plan.is_merge() {
        body.push_str(&format!(
            "\n> **Note:** the original commit is a merge commit. This PR contains its changes \
             relative to parent {} (`{}`).\n",
            plan.mainline.unwrap_or(1),
            plan.parent.short()
        ));
    }
    body
}
