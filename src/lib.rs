//! Review Studio - recreates commits as review pull requests inside forks and
//! runs GitHub-mutating work through a rate-limited operation queue.
//!
//! This library provides the domain types, the recreation pipeline, the queue
//! and the HTTP surface; the binary wires them to GitHub, git and SQLite.

pub mod config;
pub mod effects;
pub mod git;
pub mod github;
pub mod queue;
pub mod recreate;
pub mod server;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;
