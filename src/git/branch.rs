//! Review branch creation.

use std::path::Path;

use crate::types::Sha;

use super::{GitError, GitResult, git_command, resolve_commit, run_git_sync};

/// How a review branch was prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOutcome {
    /// The branch did not exist and was created at the start point.
    Created,

    /// The branch already existed; it was checked out and hard-reset to the
    /// start point.
    Reset,
}

/// Create `branch` at `start_point` and check it out.
///
/// If the branch already exists locally it is checked out and hard-reset to
/// `start_point`, discarding whatever it held before. The start point must be
/// reachable in the clone.
pub fn create_or_reset_branch(
    workdir: &Path,
    branch: &str,
    start_point: &Sha,
) -> GitResult<BranchOutcome> {
    if resolve_commit(workdir, start_point.as_str())?.is_none() {
        return Err(GitError::RefNotFound {
            refspec: start_point.to_string(),
        });
    }

    let output = git_command(workdir)
        .args(["checkout", "--quiet", "-b", branch, start_point.as_str()])
        .output()?;

    if output.status.success() {
        return Ok(BranchOutcome::Created);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.contains("already exists") {
        return Err(GitError::CommandFailed {
            command: format!("git checkout -b {} {}", branch, start_point),
            stderr: stderr.to_string(),
        });
    }

    run_git_sync(workdir, &["checkout", "--quiet", branch])?;
    run_git_sync(workdir, &["reset", "--quiet", "--hard", start_point.as_str()])?;
    Ok(BranchOutcome::Reset)
}
