//! Push operations.
//!
//! Review branches are disposable, so they are always force-pushed: a retried
//! recreation replaces whatever an earlier attempt left on the fork.

use std::path::Path;

use crate::types::Sha;

use super::{GitError, GitResult, rev_parse};

/// Result of a push operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushResult {
    /// Push succeeded.
    Success {
        /// The SHA that was pushed.
        pushed_sha: Sha,
    },

    /// Push was rejected by the remote (non-fast-forward, protected branch,
    /// or missing permission).
    Rejected {
        /// Details about why the push was rejected.
        details: String,
    },

    /// Push was a no-op (remote already has this commit).
    AlreadyUpToDate,
}

impl PushResult {
    /// Returns true if the remote now holds the local branch tip.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            PushResult::Success { .. } | PushResult::AlreadyUpToDate
        )
    }
}

/// Push local `branch` to `refs/heads/<branch>` on `remote`.
pub fn push_branch(workdir: &Path, remote: &str, branch: &str, force: bool) -> GitResult<PushResult> {
    let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
    let head_sha = rev_parse(workdir, &format!("refs/heads/{}", branch))?;

    let mut args = vec!["push"];
    if force {
        args.push("--force");
    }
    args.push(remote);
    args.push(&refspec);

    let output = super::git_command(workdir).args(&args).output()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if output.status.success() {
        if stdout.contains("Everything up-to-date") || stderr.contains("Everything up-to-date") {
            return Ok(PushResult::AlreadyUpToDate);
        }
        return Ok(PushResult::Success {
            pushed_sha: head_sha,
        });
    }

    if stderr.contains("non-fast-forward")
        || stderr.contains("rejected")
        || stderr.contains("failed to push")
        || stderr.contains("denied")
        || stderr.contains("403")
        || stderr.contains("Authentication failed")
    {
        return Ok(PushResult::Rejected {
            details: stderr.trim().to_string(),
        });
    }

    Err(GitError::CommandFailed {
        command: format!("git {}", args.join(" ")),
        stderr: stderr.to_string(),
    })
}

/// Delete `branch` on `remote`. Deleting a branch the remote does not have
/// succeeds.
pub fn delete_remote_branch(workdir: &Path, remote: &str, branch: &str) -> GitResult<()> {
    let output = super::git_command(workdir)
        .args(["push", remote, "--delete", branch])
        .output()?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("remote ref does not exist") {
        return Ok(());
    }

    Err(GitError::CommandFailed {
        command: format!("git push {} --delete {}", remote, branch),
        stderr: stderr.to_string(),
    })
}
