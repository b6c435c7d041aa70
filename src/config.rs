//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::git::CommitIdentity;
use crate::queue::{HandlerConfig, QueueConfig};
use crate::recreate::RecreatorConfig;

/// Recreates commits as review pull requests and runs the GitHub operation queue.
#[derive(Debug, Clone, Parser)]
#[command(name = "review-studio", version, about)]
pub struct Config {
    /// HTTP bind address.
    #[arg(long, env = "STUDIO_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// SQLite database for operations, forks and pull requests.
    #[arg(long, env = "STUDIO_DATABASE", default_value = "data/studio.db")]
    pub database: PathBuf,

    /// GitHub token used for the API, clone and push.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Organization that `create_fork` operations fork into by default.
    #[arg(long, env = "STUDIO_FORK_ORG")]
    pub fork_organization: Option<String>,

    /// Directory of cached clones, one `<owner>-<repo>` directory each.
    #[arg(long, env = "STUDIO_CLONE_CACHE", default_value = "data/clones")]
    pub clone_cache: PathBuf,

    /// Parent directory for disposable recreation clones [default: system temp dir]
    #[arg(long, env = "STUDIO_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Minimum seconds between two queued operations.
    #[arg(long, default_value_t = 60)]
    pub min_delay_secs: u64,

    /// Seconds after which a `processing` operation is returned to the queue.
    #[arg(long, default_value_t = 600)]
    pub stale_after_secs: u64,

    /// Seconds to wait after creating a fork before cloning it.
    #[arg(long, default_value_t = 5)]
    pub fork_settle_secs: u64,

    /// Committer name for cherry-picked commits.
    #[arg(long, default_value = "Code Review Studio")]
    pub commit_name: String,

    /// Committer email for cherry-picked commits.
    #[arg(long, default_value = "studio@users.noreply.github.com")]
    pub commit_email: String,
}

impl Config {
    pub fn recreator(&self) -> RecreatorConfig {
        RecreatorConfig {
            token: self.github_token.clone().filter(|t| !t.is_empty()),
            workspace_root: self
                .workspace
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            fork_settle_delay: Duration::from_secs(self.fork_settle_secs),
        }
    }

    pub fn queue(&self) -> QueueConfig {
        QueueConfig {
            min_delay: Duration::from_secs(self.min_delay_secs),
            stale_after: Duration::from_secs(self.stale_after_secs),
        }
    }

    pub fn handlers(&self) -> HandlerConfig {
        HandlerConfig {
            fork_organization: self.fork_organization.clone(),
            clone_cache: self.clone_cache.clone(),
        }
    }

    pub fn identity(&self) -> CommitIdentity {
        CommitIdentity {
            name: self.commit_name.clone(),
            email: self.commit_email.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("review-studio").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn queue_defaults() {
        let config = parse(&[]);
        assert_eq!(config.queue(), QueueConfig::default());
        assert_eq!(config.identity(), CommitIdentity::default());
        assert_eq!(config.listen, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--min-delay-secs",
            "5",
            "--stale-after-secs",
            "30",
            "--fork-organization",
            "review-forks",
            "--workspace",
            "/srv/studio/work",
        ]);
        assert_eq!(config.queue().min_delay, Duration::from_secs(5));
        assert_eq!(config.queue().stale_after, Duration::from_secs(30));
        assert_eq!(
            config.handlers().fork_organization.as_deref(),
            Some("review-forks")
        );
        assert_eq!(
            config.recreator().workspace_root,
            PathBuf::from("/srv/studio/work")
        );
    }

    #[test]
    fn empty_token_counts_as_absent() {
        let config = parse(&["--github-token", ""]);
        assert_eq!(config.recreator().token, None);
    }
}
