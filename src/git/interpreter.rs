//! Git interpreter backed by the `git` CLI.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::effects::{GitEffect, GitInterpreter, GitResponse};

use super::{
    CommitIdentity, GitError, GitResult, add_remote, cherry_pick, clone_repo,
    create_or_reset_branch, delete_remote_branch, fetch_remote, push_branch,
};

/// Runs git effects as blocking `git` subprocesses on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct LocalGit {
    identity: CommitIdentity,
}

impl LocalGit {
    pub fn new(identity: CommitIdentity) -> Self {
        LocalGit { identity }
    }
}

/// Execute one effect synchronously.
pub fn execute(workdir: &Path, effect: GitEffect, identity: &CommitIdentity) -> GitResult<GitResponse> {
    match effect {
        GitEffect::Clone { url } => {
            clone_repo(workdir, &url)?;
            Ok(GitResponse::Ok)
        }
        GitEffect::AddRemote { name, url } => {
            add_remote(workdir, &name, &url)?;
            Ok(GitResponse::Ok)
        }
        GitEffect::Fetch { remote, refspecs } => {
            fetch_remote(workdir, &remote, &refspecs)?;
            Ok(GitResponse::Ok)
        }
        GitEffect::CreateBranch {
            branch,
            start_point,
        } => create_or_reset_branch(workdir, &branch, &start_point).map(GitResponse::Branch),
        GitEffect::CherryPick { commit, mainline } => {
            cherry_pick(workdir, &commit, mainline, identity).map(GitResponse::CherryPick)
        }
        GitEffect::Push {
            remote,
            branch,
            force,
        } => push_branch(workdir, &remote, &branch, force).map(GitResponse::Push),
        GitEffect::DeleteRemoteBranch { remote, branch } => {
            delete_remote_branch(workdir, &remote, &branch)?;
            Ok(GitResponse::Ok)
        }
    }
}

impl GitInterpreter for LocalGit {
    async fn interpret(&self, workdir: &Path, effect: GitEffect) -> GitResult<GitResponse> {
        debug!(effect = effect.name(), workdir = %workdir.display(), "running git effect");
        let workdir: PathBuf = workdir.to_path_buf();
        let identity = self.identity.clone();
        tokio::task::spawn_blocking(move || execute(&workdir, effect, &identity))
            .await
            .map_err(|e| GitError::TaskFailed(e.to_string()))?
    }
}
