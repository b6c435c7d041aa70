//! GitHub URL and commit helpers.
//!
//! Accepted repository forms:
//! - `https://github.com/<owner>/<repo>` (optionally with `.git`, a trailing
//!   slash, or further path segments such as `/tree/main`)
//! - `git@github.com:<owner>/<repo>.git`
//!
//! Pull request URLs look like `https://github.com/<owner>/<repo>/pull/<n>`,
//! commit URLs like `https://github.com/<owner>/<repo>/commit/<sha>`.

use thiserror::Error;
use url::Url;

use crate::types::{PrNumber, RepoId, Sha};

/// Prefix of every review branch.
pub const REVIEW_BRANCH_PREFIX: &str = "review-";

/// Errors from parsing GitHub URLs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("not a URL: {0:?}")]
    Malformed(String),

    #[error("not a github.com URL: {0:?}")]
    WrongHost(String),

    #[error("URL does not name an owner and repository: {0:?}")]
    MissingRepo(String),

    #[error("not a pull request URL: {0:?}")]
    NotPullRequest(String),
}

/// Splits a GitHub URL into its path segments after validating the host.
fn path_segments(input: &str) -> Result<Vec<String>, UrlError> {
    let trimmed = input.trim();

    // scp-like SSH form has no scheme; rewrite it so `Url` can parse it.
    let normalized = match trimmed.strip_prefix("git@github.com:") {
        Some(rest) => format!("https://github.com/{}", rest),
        None => trimmed.to_string(),
    };

    let url = Url::parse(&normalized).map_err(|_| UrlError::Malformed(input.to_string()))?;
    match url.host_str() {
        Some("github.com") | Some("www.github.com") => {}
        _ => return Err(UrlError::WrongHost(input.to_string())),
    }

    Ok(url
        .path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default())
}

fn is_valid_name(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn repo_from_segments(input: &str, segments: &[String]) -> Result<RepoId, UrlError> {
    let (Some(owner), Some(repo)) = (segments.first(), segments.get(1)) else {
        return Err(UrlError::MissingRepo(input.to_string()));
    };
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if !is_valid_name(owner) || !is_valid_name(repo) {
        return Err(UrlError::MissingRepo(input.to_string()));
    }
    Ok(RepoId::new(owner.as_str(), repo))
}

/// Parses a repository URL into its owner and name.
pub fn parse_repo_url(input: &str) -> Result<RepoId, UrlError> {
    let segments = path_segments(input)?;
    repo_from_segments(input, &segments)
}

/// Parses a pull request URL into its repository and number.
pub fn parse_pr_url(input: &str) -> Result<(RepoId, PrNumber), UrlError> {
    let segments = path_segments(input)?;
    let repo = repo_from_segments(input, &segments)?;
    match (segments.get(2).map(String::as_str), segments.get(3)) {
        (Some("pull"), Some(number)) => number
            .parse::<u64>()
            .ok()
            .filter(|n| *n > 0)
            .map(|n| (repo, PrNumber(n)))
            .ok_or_else(|| UrlError::NotPullRequest(input.to_string())),
        _ => Err(UrlError::NotPullRequest(input.to_string())),
    }
}

/// Returns true if `s` could name a commit (abbreviated or full hex hash).
pub fn looks_like_commit_hash(s: &str) -> bool {
    (4..=40).contains(&s.len()) && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// The deterministic review branch for a commit: `review-<short sha>`.
///
/// Re-running recreation for the same commit always lands on the same branch,
/// which is what makes the pipeline idempotent.
pub fn review_branch_name(commit: &Sha) -> String {
    format!("{}{}", REVIEW_BRANCH_PREFIX, commit.short())
}

/// The first line of a commit message, trimmed; falls back to the short SHA
/// for empty messages.
pub fn commit_subject(message: &str, commit: &Sha) -> String {
    message
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Commit {}", commit.short()))
}

/// The web URL of a pull request.
pub fn pr_html_url(repo: &RepoId, number: PrNumber) -> String {
    format!("{}/pull/{}", repo.html_url(), number.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use crate::test_utils::arb_sha;

    fn sha(c: char) -> Sha {
        Sha::parse(c.to_string().repeat(40)).unwrap()
    }

    #[test]
    fn parses_https_repo_urls() {
        let expected = RepoId::new("acme", "widgets");
        for input in [
            "https://github.com/acme/widgets",
            "https://github.com/acme/widgets/",
            "https://github.com/acme/widgets.git",
            "https://github.com/acme/widgets/tree/main/src",
            "  https://www.github.com/acme/widgets  ",
            "git@github.com:acme/widgets.git",
        ] {
            assert_eq!(parse_repo_url(input).unwrap(), expected, "input: {input}");
        }
    }

    #[test]
    fn rejects_malformed_repo_urls() {
        assert!(matches!(
            parse_repo_url("not a url"),
            Err(UrlError::Malformed(_))
        ));
        assert!(matches!(
            parse_repo_url("https://gitlab.com/acme/widgets"),
            Err(UrlError::WrongHost(_))
        ));
        assert!(matches!(
            parse_repo_url("https://github.com/acme"),
            Err(UrlError::MissingRepo(_))
        ));
        assert!(matches!(
            parse_repo_url("https://github.com/acme/wid gets"),
            Err(UrlError::MissingRepo(_))
        ));
    }

    #[test]
    fn parses_pr_urls() {
        let (repo, pr) = parse_pr_url("https://github.com/acme/widgets/pull/42").unwrap();
        assert_eq!(repo, RepoId::new("acme", "widgets"));
        assert_eq!(pr, PrNumber(42));

        let (_, pr) = parse_pr_url("https://github.com/acme/widgets/pull/7/files").unwrap();
        assert_eq!(pr, PrNumber(7));
    }

    #[test]
    fn rejects_non_pr_urls() {
        for input in [
            "https://github.com/acme/widgets",
            "https://github.com/acme/widgets/issues/42",
            "https://github.com/acme/widgets/pull/abc",
            "https://github.com/acme/widgets/pull/0",
        ] {
            assert!(
                matches!(parse_pr_url(input), Err(UrlError::NotPullRequest(_))),
                "input: {input}"
            );
        }
    }

    #[test]
    fn commit_hash_shapes() {
        assert!(looks_like_commit_hash("abc1234"));
        assert!(looks_like_commit_hash(&"f".repeat(40)));
        assert!(!looks_like_commit_hash("abc"));
        assert!(!looks_like_commit_hash("main"));
        assert!(!looks_like_commit_hash(&"f".repeat(41)));
    }

    #[test]
    fn subject_is_first_non_empty_line() {
        let commit = sha('b');
        assert_eq!(
            commit_subject("\n  Fix overflow in parser  \n\nLonger body", &commit),
            "Fix overflow in parser"
        );
        assert_eq!(commit_subject("", &commit), "Commit bbbbbbb");
    }

    #[test]
    fn pr_url_formatting() {
        assert_eq!(
            pr_html_url(&RepoId::new("bot", "widgets"), PrNumber(5)),
            "https://github.com/bot/widgets/pull/5"
        );
    }

    proptest! {
        #[test]
        fn branch_name_is_deterministic(commit in arb_sha()) {
            let first = review_branch_name(&commit);
            let second = review_branch_name(&Sha::parse(commit.as_str()).unwrap());
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first, format!("review-{}", &commit.as_str()[..7]));
        }

        #[test]
        fn repo_urls_round_trip(
            owner in "[a-zA-Z][a-zA-Z0-9-]{0,20}",
            repo in "[a-zA-Z][a-zA-Z0-9_-]{0,20}"
        ) {
            let id = RepoId::new(&owner, &repo);
            prop_assert_eq!(parse_repo_url(&id.html_url()).unwrap(), id);
        }
    }
}
