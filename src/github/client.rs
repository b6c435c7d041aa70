//! Octocrab client wrapper.
//!
//! Unlike a repository-scoped client, `OctocrabClient` serves every repository
//! the token can reach: each `GitHubEffect` names its target repository.

use octocrab::Octocrab;

/// A GitHub API client authenticated with a single token.
#[derive(Clone)]
pub struct OctocrabClient {
    /// The underlying octocrab client.
    client: Octocrab,
}

impl OctocrabClient {
    pub fn new(client: Octocrab) -> Self {
        Self { client }
    }

    /// Creates a client from a GitHub token.
    pub fn from_token(token: impl Into<String>) -> Result<Self, octocrab::Error> {
        let client = Octocrab::builder().personal_token(token.into()).build()?;
        Ok(Self::new(client))
    }

    /// Creates an unauthenticated client. Only public read endpoints work.
    pub fn anonymous() -> Result<Self, octocrab::Error> {
        let client = Octocrab::builder().build()?;
        Ok(Self::new(client))
    }

    /// Returns a reference to the underlying octocrab client.
    pub fn inner(&self) -> &Octocrab {
        &self.client
    }
}

impl std::fmt::Debug for OctocrabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabClient").finish_non_exhaustive()
    }
}
