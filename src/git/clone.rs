//! Clone and remote management.
//!
//! Recreation clones are disposable: each attempt clones from scratch into a
//! directory it exclusively owns. Clones keep full history on every branch so
//! both the target commit and its parent are reachable.

use std::path::Path;

use crate::effects::RemoteUrl;

use super::{GitError, GitResult, git_command, run_git_displayed, run_git_sync};

/// Clone `url` into `dest`. `dest` must not exist or must be empty.
pub fn clone_repo(dest: &Path, url: &RemoteUrl) -> GitResult<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let dest_str = dest.to_string_lossy();
    run_git_displayed(
        parent,
        &["clone", "--quiet", "--no-tags", url.expose(), &dest_str],
        &format!("git clone {} {}", url, dest_str),
    )?;
    Ok(())
}

/// Register a remote, repointing it if a remote of that name already exists.
pub fn add_remote(workdir: &Path, name: &str, url: &RemoteUrl) -> GitResult<()> {
    let exists = git_command(workdir)
        .args(["remote", "get-url", name])
        .output()?
        .status
        .success();

    let verb = if exists { "set-url" } else { "add" };
    run_git_displayed(
        workdir,
        &["remote", verb, name, url.expose()],
        &format!("git remote {} {} {}", verb, name, url),
    )?;
    Ok(())
}

/// Fetch from a remote.
///
/// A refspec the remote does not have is reported as `RefNotFound`.
pub fn fetch_remote(workdir: &Path, remote: &str, refspecs: &[String]) -> GitResult<()> {
    let mut args = vec!["fetch", "--quiet", "--no-tags", remote];
    args.extend(refspecs.iter().map(String::as_str));

    run_git_sync(workdir, &args).map_err(|e| {
        if let GitError::CommandFailed { stderr, .. } = &e
            && stderr.contains("couldn't find remote ref")
        {
            let refspec = refspecs
                .iter()
                .find(|r| stderr.contains(r.trim_start_matches('+').split(':').next().unwrap_or("")))
                .cloned()
                .unwrap_or_else(|| refspecs.join(" "));
            return GitError::RefNotFound { refspec };
        }
        e
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::fixtures::FixtureRemote;
    use crate::git::{resolve_commit, run_git_stdout};

    #[test]
    fn clone_brings_full_history() {
        let remote = FixtureRemote::new();
        let first = remote.commit_file("a.txt", "a", "Add a");
        let second = remote.commit_file("b.txt", "b", "Add b");
        remote.push("main");

        let dest = remote.clone_dest("clone");
        clone_repo(&dest, &remote.remote_url()).unwrap();

        assert_eq!(resolve_commit(&dest, first.as_str()).unwrap(), Some(first));
        assert_eq!(resolve_commit(&dest, second.as_str()).unwrap(), Some(second));
    }

    #[test]
    fn clone_into_non_empty_dir_fails() {
        let remote = FixtureRemote::new();
        let dest = remote.clone_dest("occupied");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("file"), "x").unwrap();

        let err = clone_repo(&dest, &remote.remote_url()).unwrap_err();
        assert!(matches!(err, GitError::CommandFailed { .. }));
    }

    #[test]
    fn add_remote_is_repeatable() {
        let remote = FixtureRemote::new();
        let dest = remote.clone_dest("clone");
        clone_repo(&dest, &remote.remote_url()).unwrap();

        add_remote(&dest, "upstream", &remote.remote_url()).unwrap();
        add_remote(&dest, "upstream", &remote.remote_url()).unwrap();

        let url = run_git_stdout(&dest, &["remote", "get-url", "upstream"]).unwrap();
        assert_eq!(url, remote.bare.to_str().unwrap());
    }

    #[test]
    fn fetch_reaches_commits_only_on_other_remote() {
        let upstream = FixtureRemote::new();
        let fork = FixtureRemote::new();
        let only_upstream = upstream.commit_file("up.txt", "up", "Upstream only");
        upstream.push("main");

        let dest = fork.clone_dest("clone");
        clone_repo(&dest, &fork.remote_url()).unwrap();
        assert_eq!(resolve_commit(&dest, only_upstream.as_str()).unwrap(), None);

        add_remote(&dest, "upstream", &upstream.remote_url()).unwrap();
        fetch_remote(&dest, "upstream", &[]).unwrap();
        assert_eq!(
            resolve_commit(&dest, only_upstream.as_str()).unwrap(),
            Some(only_upstream)
        );
    }

    #[test]
    fn fetch_of_missing_ref_is_ref_not_found() {
        let remote = FixtureRemote::new();
        let dest = remote.clone_dest("clone");
        clone_repo(&dest, &remote.remote_url()).unwrap();

        let err = fetch_remote(
            &dest,
            "origin",
            &["+refs/pull/9/head:refs/remotes/origin/pr/9".to_string()],
        )
        .unwrap_err();
        match err {
            GitError::RefNotFound { refspec } => assert!(refspec.contains("refs/pull/9/head")),
            other => panic!("expected RefNotFound, got {other:?}"),
        }
    }
}
