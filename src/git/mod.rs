//! Local git operations for commit recreation.
//!
//! This module implements the git operations the recreation pipeline and the
//! queue need:
//! - Clone and remote management (disposable per-attempt clones)
//! - Review branch creation (create, or reset an existing branch)
//! - Cherry-pick with mainline selection and guaranteed abort on failure
//! - Force push and remote branch deletion
//!
//! Every command runs with system and user git config disabled and terminal
//! prompts off, so behaviour does not depend on the host and never blocks on
//! credentials.

pub mod branch;
pub mod cherry_pick;
pub mod clone;
pub mod interpreter;
pub mod push;

use std::path::Path;
use std::process::Output;

use thiserror::Error;

use crate::types::Sha;

pub use branch::{BranchOutcome, create_or_reset_branch};
pub use cherry_pick::{CherryPickResult, abort_cherry_pick, cherry_pick};
pub use clone::{add_remote, clone_repo, fetch_remote};
pub use interpreter::LocalGit;
pub use push::{PushResult, delete_remote_branch, push_branch};

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// A commit or ref could not be resolved.
    #[error("ref not found: {refspec}")]
    RefNotFound { refspec: String },

    /// Invalid SHA format.
    #[error("invalid SHA: {0}")]
    InvalidSha(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking task running git panicked or was cancelled.
    #[error("git task failed: {0}")]
    TaskFailed(String),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Identity used for creating commits.
///
/// This is passed via `-c` flags to git commands, ensuring commits can be
/// created even when global/system git config is disabled. This avoids
/// relying on per-repo `.git/config` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    /// The committer name (git `user.name`).
    pub name: String,

    /// The committer email (git `user.email`).
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        CommitIdentity {
            name: "Code Review Studio".to_string(),
            email: "studio@users.noreply.github.com".to_string(),
        }
    }
}

/// Create a git Command with clean environment (no system/user config).
///
/// This ensures consistent behavior across different machines by ignoring
/// system and user git configuration (e.g., rerere, hooks, aliases).
pub(crate) fn git_command(workdir: &Path) -> std::process::Command {
    use std::process::Command;

    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);

    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    cmd
}

/// Create a git Command configured for commit operations.
///
/// This extends [`git_command`] with identity configuration passed via `-c` flags.
/// The committer identity is synthetic; cherry-picks keep the original author.
pub(crate) fn git_commit_command(
    workdir: &Path,
    identity: &CommitIdentity,
) -> std::process::Command {
    let mut cmd = git_command(workdir);

    cmd.arg("-c");
    cmd.arg(format!("user.name={}", identity.name));
    cmd.arg("-c");
    cmd.arg(format!("user.email={}", identity.email));

    cmd
}

/// Run a git command, reporting failures under `display` instead of the raw
/// arguments. Used when the arguments carry credentials.
pub(crate) fn run_git_displayed(workdir: &Path, args: &[&str], display: &str) -> GitResult<Output> {
    let output = git_command(workdir).args(args).output()?;

    if output.status.success() {
        Ok(output)
    } else {
        Err(GitError::CommandFailed {
            command: display.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Run a git command in the given working directory.
///
/// Returns the command output on success, or a GitError on failure.
pub fn run_git_sync(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    run_git_displayed(workdir, args, &format!("git {}", args.join(" ")))
}

/// Run a git command and return stdout as a string.
pub fn run_git_stdout(workdir: &Path, args: &[&str]) -> GitResult<String> {
    let output = run_git_sync(workdir, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Get the SHA of a revision.
pub fn rev_parse(workdir: &Path, rev: &str) -> GitResult<Sha> {
    let sha_str = run_git_stdout(workdir, &["rev-parse", rev])?;
    Sha::parse(&sha_str).map_err(|_| GitError::InvalidSha(sha_str))
}

/// Resolve `rev` to a commit, or `None` if no such commit is reachable.
pub fn resolve_commit(workdir: &Path, rev: &str) -> GitResult<Option<Sha>> {
    let spec = format!("{}^{{commit}}", rev);
    let output = git_command(workdir)
        .args(["rev-parse", "--quiet", "--verify", &spec])
        .output()?;
    if !output.status.success() {
        return Ok(None);
    }
    let sha_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Sha::parse(&sha_str)
        .map(Some)
        .map_err(|_| GitError::InvalidSha(sha_str))
}

/// Get the parent SHA(s) for a commit.
#[cfg(test)]
pub(crate) fn get_parents(workdir: &Path, commit: &str) -> GitResult<Vec<Sha>> {
    let output = run_git_stdout(workdir, &["rev-parse", &format!("{}^@", commit)])?;
    if output.is_empty() {
        return Ok(vec![]);
    }
    output
        .lines()
        .map(|line| Sha::parse(line).map_err(|_| GitError::InvalidSha(line.to_string())))
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Real-git fixture repositories shared by the git tests.

    use std::path::{Path, PathBuf};

    use tempfile::TempDir;

    use super::{run_git_stdout, run_git_sync};
    use crate::types::Sha;

    /// A bare "remote" plus a scratch working clone used to author commits.
    pub struct FixtureRemote {
        pub dir: TempDir,
        pub bare: PathBuf,
        pub work: PathBuf,
    }

    impl FixtureRemote {
        /// Creates a bare remote whose `main` holds a single README commit.
        pub fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let bare = dir.path().join("remote.git");
            let work = dir.path().join("author");
            std::fs::create_dir_all(&bare).unwrap();
            std::fs::create_dir_all(&work).unwrap();

            run_git_sync(&bare, &["init", "--bare", "--initial-branch=main"]).unwrap();
            run_git_sync(&work, &["init", "--initial-branch=main"]).unwrap();
            run_git_sync(&work, &["config", "user.email", "test@test.com"]).unwrap();
            run_git_sync(&work, &["config", "user.name", "Test"]).unwrap();
            run_git_sync(&work, &["remote", "add", "origin", bare.to_str().unwrap()]).unwrap();

            let fixture = FixtureRemote { dir, bare, work };
            fixture.commit_file("README.md", "# Widgets\n", "Initial commit");
            fixture.push("main");
            fixture
        }

        pub fn commit_file(&self, name: &str, content: &str, message: &str) -> Sha {
            std::fs::write(self.work.join(name), content).unwrap();
            run_git_sync(&self.work, &["add", name]).unwrap();
            run_git_sync(&self.work, &["commit", "-m", message]).unwrap();
            self.head()
        }

        pub fn head(&self) -> Sha {
            Sha::parse(run_git_stdout(&self.work, &["rev-parse", "HEAD"]).unwrap()).unwrap()
        }

        pub fn git(&self, args: &[&str]) -> String {
            run_git_stdout(&self.work, args).unwrap()
        }

        pub fn push(&self, branch: &str) {
            run_git_sync(
                &self.work,
                &["push", "--force", "origin", &format!("HEAD:refs/heads/{}", branch)],
            )
            .unwrap();
        }

        pub fn remote_url(&self) -> crate::effects::RemoteUrl {
            crate::effects::RemoteUrl::new(self.bare.to_str().unwrap())
        }

        /// A fresh path (not yet created) for a clone.
        pub fn clone_dest(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        pub fn remote_branch_sha(&self, branch: &str) -> Option<Sha> {
            let out = run_git_stdout(
                &self.bare,
                &["for-each-ref", "--format=%(objectname)", &format!("refs/heads/{}", branch)],
            )
            .unwrap();
            if out.is_empty() {
                None
            } else {
                Some(Sha::parse(out).unwrap())
            }
        }
    }

    pub fn file_exists(workdir: &Path, name: &str) -> bool {
        workdir.join(name).exists()
    }
}
