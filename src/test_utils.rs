//! Shared test fakes and arbitrary generators for property-based testing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Utc};
use proptest::prelude::*;
use tokio::sync::Notify;

use crate::effects::{
    CommitData, GitEffect, GitHubEffect, GitHubInterpreter, GitHubResponse, GitInterpreter,
    GitResponse, PrData, RepoData,
};
use crate::git::{BranchOutcome, CherryPickResult, GitError, GitResult, PushResult};
use crate::github::{GitHubApiError, GitHubErrorKind, pr_html_url};
use crate::recreate::RecreatorConfig;
use crate::types::{PrNumber, RepoId, Sha};

// ─── Generators ───────────────────────────────────────────────────────────────

pub fn arb_sha() -> impl Strategy<Value = Sha> {
    "[0-9a-f]{40}".prop_map(|s| Sha::parse(s).unwrap())
}

/// A SHA made of one repeated hex digit.
pub fn sha(digit: char) -> Sha {
    Sha::parse(digit.to_string().repeat(40)).unwrap()
}

pub fn recreator_config(workspace: &Path) -> RecreatorConfig {
    RecreatorConfig {
        token: Some("ghp_test".to_string()),
        workspace_root: workspace.to_path_buf(),
        fork_settle_delay: Duration::ZERO,
    }
}

// ─── Clock ────────────────────────────────────────────────────────────────────

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct TestClock {
    now: Mutex<DateTime<Utc>>,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        TestClock {
            now: Mutex::new(start),
        }
    }

    /// 2024-01-01T00:00:00Z.
    pub fn fixed() -> Self {
        Self::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl mockable::Clock for TestClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ─── GitHub fake ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FakePull {
    pub data: PrData,
    pub body: String,
    pub open: bool,
}

#[derive(Default)]
struct FakeGitHubState {
    login: String,
    repos: HashMap<RepoId, RepoData>,
    commits: HashMap<RepoId, Vec<CommitData>>,
    branches: HashMap<(RepoId, String), Sha>,
    pulls: HashMap<RepoId, Vec<FakePull>>,
    actions_disabled: HashSet<RepoId>,
    next_pr_number: u64,
    failures: HashMap<&'static str, VecDeque<(GitHubErrorKind, String)>>,
    effects: Vec<GitHubEffect>,
}

/// In-memory GitHub with just enough behaviour for the pipeline and queue.
pub struct FakeGitHub {
    state: Mutex<FakeGitHubState>,
}

impl FakeGitHub {
    pub fn new(login: &str) -> Self {
        FakeGitHub {
            state: Mutex::new(FakeGitHubState {
                login: login.to_string(),
                next_pr_number: 1,
                ..Default::default()
            }),
        }
    }

    pub fn add_repo(&self, repo: &RepoId) {
        let mut state = self.state.lock().unwrap();
        state.repos.insert(
            repo.clone(),
            RepoData {
                id: repo.clone(),
                html_url: repo.html_url(),
                default_branch: Some("main".to_string()),
                is_fork: false,
            },
        );
    }

    pub fn add_commit(&self, repo: &RepoId, sha: &Sha, message: &str, parents: &[Sha]) {
        let mut state = self.state.lock().unwrap();
        state.commits.entry(repo.clone()).or_default().push(CommitData {
            sha: sha.clone(),
            message: message.to_string(),
            parents: parents.to_vec(),
        });
    }

    pub fn set_branch(&self, repo: &RepoId, branch: &str, sha: &Sha) {
        let mut state = self.state.lock().unwrap();
        state
            .branches
            .insert((repo.clone(), branch.to_string()), sha.clone());
    }

    pub fn add_pull(&self, repo: &RepoId, data: PrData, open: bool) {
        let mut state = self.state.lock().unwrap();
        state.next_pr_number = state.next_pr_number.max(data.number.0 + 1);
        state.pulls.entry(repo.clone()).or_default().push(FakePull {
            data,
            body: String::new(),
            open,
        });
    }

    /// Fail the next effect named `effect` with the given error.
    pub fn fail_next(&self, effect: &'static str, kind: GitHubErrorKind, message: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .failures
            .entry(effect)
            .or_default()
            .push_back((kind, message.to_string()));
    }

    pub fn effects(&self) -> Vec<GitHubEffect> {
        self.state.lock().unwrap().effects.clone()
    }

    pub fn count(&self, effect: &str) -> usize {
        self.effects().iter().filter(|e| e.name() == effect).count()
    }

    pub fn pulls(&self, repo: &RepoId) -> Vec<FakePull> {
        let state = self.state.lock().unwrap();
        state.pulls.get(repo).cloned().unwrap_or_default()
    }

    pub fn repo(&self, repo: &RepoId) -> Option<RepoData> {
        self.state.lock().unwrap().repos.get(repo).cloned()
    }

    pub fn branch(&self, repo: &RepoId, branch: &str) -> Option<Sha> {
        let state = self.state.lock().unwrap();
        state.branches.get(&(repo.clone(), branch.to_string())).cloned()
    }

    pub fn actions_disabled(&self, repo: &RepoId) -> bool {
        self.state.lock().unwrap().actions_disabled.contains(repo)
    }

    fn apply(&self, effect: GitHubEffect) -> Result<GitHubResponse, GitHubApiError> {
        let mut state = self.state.lock().unwrap();
        state.effects.push(effect.clone());

        if let Some((kind, message)) = state
            .failures
            .get_mut(effect.name())
            .and_then(VecDeque::pop_front)
        {
            let status = match kind {
                GitHubErrorKind::NotFound => Some(404),
                GitHubErrorKind::AlreadyExists => Some(422),
                GitHubErrorKind::Unauthorized => Some(401),
                GitHubErrorKind::RateLimited => Some(429),
                GitHubErrorKind::Other => Some(500),
            };
            return Err(GitHubApiError::new(kind, status, message));
        }

        match effect {
            GitHubEffect::GetAuthenticatedUser => Ok(GitHubResponse::User(state.login.clone())),

            GitHubEffect::GetRepository { repo } => {
                Ok(GitHubResponse::Repository(state.repos.get(&repo).cloned()))
            }

            GitHubEffect::CreateFork {
                upstream,
                organization,
            } => {
                let Some(source) = state.repos.get(&upstream).cloned() else {
                    return Err(GitHubApiError::not_found(format!("{} not found", upstream)));
                };
                let owner = organization.unwrap_or_else(|| state.login.clone());
                let fork = upstream.with_owner(owner);
                if let Some(existing) = state.repos.get(&fork) {
                    return Ok(GitHubResponse::Repository(Some(existing.clone())));
                }

                let data = RepoData {
                    id: fork.clone(),
                    html_url: fork.html_url(),
                    default_branch: source.default_branch.clone(),
                    is_fork: true,
                };
                state.repos.insert(fork.clone(), data.clone());
                let commits = state.commits.get(&upstream).cloned().unwrap_or_default();
                state.commits.insert(fork.clone(), commits);
                let branches: Vec<_> = state
                    .branches
                    .iter()
                    .filter(|((repo, _), _)| *repo == upstream)
                    .map(|((_, branch), sha)| ((fork.clone(), branch.clone()), sha.clone()))
                    .collect();
                state.branches.extend(branches);
                Ok(GitHubResponse::Repository(Some(data)))
            }

            GitHubEffect::DeleteRepository { repo } => match state.repos.remove(&repo) {
                Some(_) => Ok(GitHubResponse::Deleted),
                None => Err(GitHubApiError::not_found(format!("{} not found", repo))),
            },

            GitHubEffect::DisableActions { repo } => {
                if !state.repos.contains_key(&repo) {
                    return Err(GitHubApiError::not_found(format!("{} not found", repo)));
                }
                state.actions_disabled.insert(repo);
                Ok(GitHubResponse::ActionsDisabled)
            }

            GitHubEffect::GetCommit { repo, sha } => {
                let wanted = sha.to_ascii_lowercase();
                let found = state.commits.get(&repo).and_then(|commits| {
                    commits
                        .iter()
                        .find(|c| c.sha.as_str().starts_with(&wanted))
                        .cloned()
                });
                Ok(GitHubResponse::Commit(found))
            }

            GitHubEffect::GetBranchHead { repo, branch } => Ok(GitHubResponse::BranchHead(
                state.branches.get(&(repo, branch)).cloned(),
            )),

            GitHubEffect::DeleteBranchRef { repo, branch } => {
                match state.branches.remove(&(repo, branch)) {
                    Some(_) => Ok(GitHubResponse::Deleted),
                    None => Err(GitHubApiError::new(
                        GitHubErrorKind::Other,
                        Some(422),
                        "Reference does not exist",
                    )),
                }
            }

            GitHubEffect::GetPullRequest { repo, number } => state
                .pulls
                .get(&repo)
                .and_then(|pulls| pulls.iter().find(|p| p.data.number == number))
                .map(|p| GitHubResponse::PullRequest(p.data.clone()))
                .ok_or_else(|| GitHubApiError::not_found(format!("{} {} not found", repo, number))),

            GitHubEffect::FindOpenPullRequest { repo, branch, .. } => {
                let found = state.pulls.get(&repo).and_then(|pulls| {
                    pulls
                        .iter()
                        .find(|p| p.open && p.data.head_ref == branch)
                        .map(|p| p.data.clone())
                });
                Ok(GitHubResponse::OpenPullRequest(found))
            }

            GitHubEffect::CreatePullRequest {
                repo,
                head,
                base,
                title,
                body,
            } => {
                let head_ref = head.rsplit(':').next().unwrap_or(&head).to_string();
                let exists = state
                    .pulls
                    .get(&repo)
                    .is_some_and(|pulls| pulls.iter().any(|p| p.open && p.data.head_ref == head_ref));
                if exists {
                    return Err(GitHubApiError::already_exists(format!(
                        "Validation Failed: A pull request already exists for {}:{}.",
                        repo.owner, head_ref
                    )));
                }

                let number = PrNumber(state.next_pr_number);
                state.next_pr_number += 1;
                let data = PrData {
                    number,
                    html_url: pr_html_url(&repo, number),
                    title,
                    head_ref,
                    head_sha: None,
                    base_ref: base,
                    merge_commit_sha: None,
                    merged: false,
                };
                state.pulls.entry(repo).or_default().push(FakePull {
                    data: data.clone(),
                    body,
                    open: true,
                });
                Ok(GitHubResponse::PullRequest(data))
            }
        }
    }
}

impl GitHubInterpreter for FakeGitHub {
    async fn interpret(&self, effect: GitHubEffect) -> Result<GitHubResponse, GitHubApiError> {
        self.apply(effect)
    }
}

// ─── Git fake ─────────────────────────────────────────────────────────────────

/// A scripted git failure.
#[derive(Debug, Clone)]
pub enum FakeGitFailure {
    CommandFailed(String),
    RefNotFound,
}

struct FakeGitState {
    calls: Vec<(PathBuf, GitEffect)>,
    cherry_pick: CherryPickResult,
    push: PushResult,
    failures: HashMap<&'static str, FakeGitFailure>,
    hold: Option<Hold>,
}

/// Parks the first matching effect until released.
struct Hold {
    effect: &'static str,
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

/// Records git effects. `Clone` creates the target directory so cleanup can
/// be observed; everything else answers from the script.
pub struct FakeGit {
    state: Mutex<FakeGitState>,
}

impl Default for FakeGit {
    fn default() -> Self {
        FakeGit {
            state: Mutex::new(FakeGitState {
                calls: Vec::new(),
                cherry_pick: CherryPickResult::Applied {
                    commit_sha: sha('c'),
                },
                push: PushResult::Success {
                    pushed_sha: sha('c'),
                },
                failures: HashMap::new(),
                hold: None,
            }),
        }
    }
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cherry_pick(&self, result: CherryPickResult) {
        self.state.lock().unwrap().cherry_pick = result;
    }

    pub fn set_push(&self, result: PushResult) {
        self.state.lock().unwrap().push = result;
    }

    /// Fail every effect named `effect`.
    pub fn fail(&self, effect: &'static str, failure: FakeGitFailure) {
        self.state.lock().unwrap().failures.insert(effect, failure);
    }

    /// Park the next effect named `effect`. The first handle is notified once
    /// it is reached; notifying the second lets it run.
    pub fn hold(&self, effect: &'static str) -> (Arc<Notify>, Arc<Notify>) {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        self.state.lock().unwrap().hold = Some(Hold {
            effect,
            reached: Arc::clone(&reached),
            release: Arc::clone(&release),
        });
        (reached, release)
    }

    pub fn calls(&self) -> Vec<(PathBuf, GitEffect)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn effects(&self) -> Vec<GitEffect> {
        self.calls().into_iter().map(|(_, e)| e).collect()
    }

    fn apply(&self, workdir: &Path, effect: GitEffect) -> GitResult<GitResponse> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((workdir.to_path_buf(), effect.clone()));

        if let Some(failure) = state.failures.get(effect.name()) {
            return Err(match failure {
                FakeGitFailure::CommandFailed(stderr) => GitError::CommandFailed {
                    command: format!("git {}", effect.name()),
                    stderr: stderr.clone(),
                },
                FakeGitFailure::RefNotFound => GitError::RefNotFound {
                    refspec: effect.name().to_string(),
                },
            });
        }

        match effect {
            GitEffect::Clone { .. } => {
                std::fs::create_dir_all(workdir)?;
                std::fs::write(workdir.join("README.md"), "# cloned\n")?;
                Ok(GitResponse::Ok)
            }
            GitEffect::CreateBranch { .. } => Ok(GitResponse::Branch(BranchOutcome::Created)),
            GitEffect::CherryPick { .. } => Ok(GitResponse::CherryPick(state.cherry_pick.clone())),
            GitEffect::Push { .. } => Ok(GitResponse::Push(state.push.clone())),
            GitEffect::AddRemote { .. }
            | GitEffect::Fetch { .. }
            | GitEffect::DeleteRemoteBranch { .. } => Ok(GitResponse::Ok),
        }
    }
}

impl GitInterpreter for FakeGit {
    async fn interpret(&self, workdir: &Path, effect: GitEffect) -> GitResult<GitResponse> {
        let held = {
            let mut state = self.state.lock().unwrap();
            if state.hold.as_ref().is_some_and(|h| h.effect == effect.name()) {
                state.hold.take()
            } else {
                None
            }
        };
        if let Some(hold) = held {
            hold.reached.notify_one();
            hold.release.notified().await;
        }
        self.apply(workdir, effect)
    }
}
