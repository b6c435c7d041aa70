//! GitHub API error types.
//!
//! Errors are categorized by what the caller can do about them:
//!
//! - **NotFound** (HTTP 404): lookups turn this into `None`
//! - **AlreadyExists** (HTTP 422 "already exists"): creation races, where the
//!   caller fetches the existing object instead
//! - **Unauthorized** (HTTP 401, 403 without rate limiting): bad or
//!   under-scoped token
//! - **RateLimited** (HTTP 429, 403 with rate limit message)
//! - **Other**: everything else, surfaced verbatim
//!
//! There is no automatic retry. Queue operations that fail are recorded as
//! failed and can be re-enqueued.

use std::fmt;
use thiserror::Error;

/// The kind of GitHub API error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    /// The resource does not exist (or the token cannot see it).
    NotFound,

    /// Creation failed because the resource already exists.
    ///
    /// GitHub reports this as a 422 validation failure, e.g.
    /// "A pull request already exists for owner:branch."
    AlreadyExists,

    /// Authentication or authorization failure.
    Unauthorized,

    /// Primary or secondary rate limit.
    RateLimited,

    /// Anything else.
    Other,
}

impl GitHubErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitHubErrorKind::NotFound => "not_found",
            GitHubErrorKind::AlreadyExists => "already_exists",
            GitHubErrorKind::Unauthorized => "unauthorized",
            GitHubErrorKind::RateLimited => "rate_limited",
            GitHubErrorKind::Other => "other",
        }
    }
}

/// A categorized GitHub API error.
#[derive(Debug, Error)]
pub struct GitHubApiError {
    /// The kind of error.
    pub kind: GitHubErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying octocrab error, if available.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl GitHubApiError {
    /// Creates an error without an octocrab source.
    pub fn new(kind: GitHubErrorKind, status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code,
            message: message.into(),
            source: None,
        }
    }

    /// Creates an uncategorized error without an octocrab source.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::Other, None, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::NotFound, Some(404), message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::AlreadyExists, Some(422), message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == GitHubErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == GitHubErrorKind::AlreadyExists
    }

    /// Categorizes an octocrab error.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let (status_code, message) = match &err {
            octocrab::Error::GitHub { source, .. } => {
                let mut message = source.message.clone();
                if let Some(errors) = &source.errors {
                    for detail in errors {
                        let text = detail
                            .get("message")
                            .and_then(|m| m.as_str())
                            .map(str::to_string)
                            .unwrap_or_else(|| detail.to_string());
                        message.push_str(": ");
                        message.push_str(&text);
                    }
                }
                (Some(source.status_code.as_u16()), message)
            }
            other => (extract_status_code(&other.to_string()), other.to_string()),
        };

        Self {
            kind: categorize(status_code, &message),
            status_code,
            message,
            source: Some(err),
        }
    }
}

/// Categorizes by status code, refined by message for the ambiguous codes.
fn categorize(status_code: Option<u16>, message: &str) -> GitHubErrorKind {
    match status_code {
        Some(404) => GitHubErrorKind::NotFound,
        Some(422) if is_already_exists_message(message) => GitHubErrorKind::AlreadyExists,
        Some(429) => GitHubErrorKind::RateLimited,
        Some(403) if is_rate_limit_error(message) => GitHubErrorKind::RateLimited,
        Some(401) | Some(403) => GitHubErrorKind::Unauthorized,
        _ => GitHubErrorKind::Other,
    }
}

/// Extracts the HTTP status code from an error message, if present.
///
/// Only used for octocrab errors that did not come with a parsed GitHub
/// response body.
fn extract_status_code(err_str: &str) -> Option<u16> {
    if let Some(idx) = err_str.find("status: ") {
        let rest = &err_str[idx + 8..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if let Ok(code) = rest[..end].parse() {
            return Some(code);
        }
    }

    if err_str.contains("404") && err_str.to_lowercase().contains("not found") {
        return Some(404);
    }
    [422, 403, 401, 429]
        .into_iter()
        .find(|code| err_str.contains(&code.to_string()))
}

fn is_already_exists_message(message: &str) -> bool {
    message.to_lowercase().contains("already exists")
}

/// Checks if an error message indicates a rate limit.
fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}
