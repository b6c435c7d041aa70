//! Cherry-pick with mainline selection.
//!
//! A cherry-pick either lands cleanly or leaves the working tree exactly as it
//! was before the attempt: on any failure the in-progress pick is aborted
//! before returning.

use std::path::Path;

use tracing::warn;

use crate::types::Sha;

use super::{CommitIdentity, GitError, GitResult, git_command, git_commit_command, rev_parse};

/// Result of a cherry-pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CherryPickResult {
    /// The commit was applied on top of HEAD.
    Applied {
        /// The new commit's SHA.
        commit_sha: Sha,
    },

    /// The commit conflicts with HEAD. The pick has been aborted.
    Conflict {
        /// Files with conflicts.
        conflicting_files: Vec<String>,
    },

    /// Applying the commit on top of HEAD changes nothing. The pick has been
    /// aborted.
    Empty,
}

/// Cherry-pick `commit` onto HEAD.
///
/// `mainline` is the 1-based parent number passed as `-m`; it must be set for
/// merge commits and left unset otherwise.
pub fn cherry_pick(
    workdir: &Path,
    commit: &Sha,
    mainline: Option<u32>,
    identity: &CommitIdentity,
) -> GitResult<CherryPickResult> {
    let mainline_arg = mainline.map(|m| m.to_string());
    let mut args = vec!["cherry-pick", "--allow-empty-message"];
    if let Some(m) = mainline_arg.as_deref() {
        args.push("-m");
        args.push(m);
    }
    args.push(commit.as_str());

    let output = git_commit_command(workdir, identity).args(&args).output()?;

    if output.status.success() {
        let commit_sha = rev_parse(workdir, "HEAD")?;
        return Ok(CherryPickResult::Applied { commit_sha });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = format!("{}{}", stdout, stderr);

    if combined.contains("CONFLICT") || combined.contains("could not apply") {
        return report_conflict(workdir, get_conflicting_files(workdir));
    }

    if combined.contains("is now empty") || combined.contains("nothing to commit") {
        abort_cherry_pick(workdir)?;
        return Ok(CherryPickResult::Empty);
    }

    if let Err(e) = abort_cherry_pick(workdir) {
        warn!(error = %e, "failed to abort cherry-pick after error");
    }
    Err(GitError::CommandFailed {
        command: format!("git {}", args.join(" ")),
        stderr: stderr.to_string(),
    })
}

/// Abort an in-progress cherry-pick, if there is one.
pub fn abort_cherry_pick(workdir: &Path) -> GitResult<()> {
    let in_progress = git_command(workdir)
        .args(["rev-parse", "--quiet", "--verify", "CHERRY_PICK_HEAD"])
        .output()?
        .status
        .success();
    if !in_progress {
        return Ok(());
    }

    let output = git_command(workdir)
        .args(["cherry-pick", "--abort"])
        .output()?;
    if !output.status.success() {
        return Err(GitError::CommandFailed {
            command: "git cherry-pick --abort".to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(())
}

/// Abort the conflicted pick, then report the conflict or the error from
/// listing the conflicting files.
fn report_conflict(
    workdir: &Path,
    conflicting_files: GitResult<Vec<String>>,
) -> GitResult<CherryPickResult> {
    abort_cherry_pick(workdir)?;
    Ok(CherryPickResult::Conflict {
        conflicting_files: conflicting_files?,
    })
}

/// Get the list of files with unresolved conflicts.
fn get_conflicting_files(workdir: &Path) -> GitResult<Vec<String>> {
    let output = git_command(workdir)
        .args(["diff", "--name-only", "--diff-filter=U"])
        .output()?;
    if !output.status.success() {
        return Err(GitError::CommandFailed {
            command: "git diff --name-only --diff-filter=U".to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
        .collect())
}
