//! Queued operation data model.
//!
//! An operation is a single GitHub-mutating side effect waiting its turn in the
//! queue. The payload is a tagged variant with one strongly-typed shape per
//! operation type; the row stores the type tag and the payload JSON separately.
//!
//! # State machine
//!
//! ```text
//! queued --lease--> processing --ok--> completed
//!                       |
//!                       +--err--> failed
//! processing --stale lease swept--> queued
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{LeaseOwner, OperationId, RepoId};

/// Lifecycle status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Queued => "queued",
            OperationStatus::Processing => "processing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        }
    }

    /// Returns true for `completed` and `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A string did not name a known status or operation type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for OperationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(OperationStatus::Queued),
            "processing" => Ok(OperationStatus::Processing),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            other => Err(UnknownVariant {
                kind: "operation status",
                value: other.to_string(),
            }),
        }
    }
}

/// The operation type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    CreateFork,
    CreatePr,
    DeleteFork,
    DeleteBranch,
    SimulatePr,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::CreateFork => "create_fork",
            OperationType::CreatePr => "create_pr",
            OperationType::DeleteFork => "delete_fork",
            OperationType::DeleteBranch => "delete_branch",
            OperationType::SimulatePr => "simulate_pr",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_fork" => Ok(OperationType::CreateFork),
            "create_pr" => Ok(OperationType::CreatePr),
            "delete_fork" => Ok(OperationType::DeleteFork),
            "delete_branch" => Ok(OperationType::DeleteBranch),
            "simulate_pr" => Ok(OperationType::SimulatePr),
            other => Err(UnknownVariant {
                kind: "operation type",
                value: other.to_string(),
            }),
        }
    }
}

/// Fork `upstream` into `organization` (or the authenticated account).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateForkPayload {
    pub upstream: RepoId,
    #[serde(default)]
    pub organization: Option<String>,
}

/// Open a PR inside an existing fork.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrPayload {
    pub fork: RepoId,
    pub head: String,
    pub base: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

/// Delete a repository outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteForkPayload {
    pub fork: RepoId,
}

/// Delete a branch from a fork.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBranchPayload {
    pub fork: RepoId,
    pub branch: String,
}

/// Recreate an upstream PR's change as a review PR in a fork.
///
/// `fork_record_id` and `pr_record_id` name placeholder rows written by the
/// caller before enqueueing; they are filled in with the real URLs once the
/// recreation succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatePrPayload {
    pub pr_url: String,
    #[serde(default)]
    pub fork_record_id: Option<i64>,
    #[serde(default)]
    pub pr_record_id: Option<i64>,
}

/// A typed operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OperationPayload {
    CreateFork(CreateForkPayload),
    CreatePr(CreatePrPayload),
    DeleteFork(DeleteForkPayload),
    DeleteBranch(DeleteBranchPayload),
    SimulatePr(SimulatePrPayload),
}

impl OperationPayload {
    pub fn operation_type(&self) -> OperationType {
        match self {
            OperationPayload::CreateFork(_) => OperationType::CreateFork,
            OperationPayload::CreatePr(_) => OperationType::CreatePr,
            OperationPayload::DeleteFork(_) => OperationType::DeleteFork,
            OperationPayload::DeleteBranch(_) => OperationType::DeleteBranch,
            OperationPayload::SimulatePr(_) => OperationType::SimulatePr,
        }
    }

    /// Serializes only the inner payload (the type tag lives in its own column).
    pub fn to_payload_json(&self) -> serde_json::Result<String> {
        match self {
            OperationPayload::CreateFork(p) => serde_json::to_string(p),
            OperationPayload::CreatePr(p) => serde_json::to_string(p),
            OperationPayload::DeleteFork(p) => serde_json::to_string(p),
            OperationPayload::DeleteBranch(p) => serde_json::to_string(p),
            OperationPayload::SimulatePr(p) => serde_json::to_string(p),
        }
    }

    /// Rebuilds a payload from its stored type tag and payload JSON.
    pub fn from_parts(operation_type: OperationType, json: &str) -> serde_json::Result<Self> {
        Ok(match operation_type {
            OperationType::CreateFork => OperationPayload::CreateFork(serde_json::from_str(json)?),
            OperationType::CreatePr => OperationPayload::CreatePr(serde_json::from_str(json)?),
            OperationType::DeleteFork => OperationPayload::DeleteFork(serde_json::from_str(json)?),
            OperationType::DeleteBranch => {
                OperationPayload::DeleteBranch(serde_json::from_str(json)?)
            }
            OperationType::SimulatePr => OperationPayload::SimulatePr(serde_json::from_str(json)?),
        })
    }
}

/// A consumer's claim on a `processing` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub owner: LeaseOwner,
    pub expires_at: DateTime<Utc>,
}

/// A persisted operation row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: OperationId,
    #[serde(flatten)]
    pub payload: OperationPayload,
    pub status: OperationStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub lease: Option<Lease>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Operation {
    pub fn operation_type(&self) -> OperationType {
        self.payload.operation_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            OperationStatus::Queued,
            OperationStatus::Processing,
            OperationStatus::Completed,
            OperationStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<OperationStatus>().unwrap(), status);
        }
        assert!("stuck".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!OperationStatus::Queued.is_terminal());
        assert!(!OperationStatus::Processing.is_terminal());
        assert!(OperationStatus::Completed.is_terminal());
        assert!(OperationStatus::Failed.is_terminal());
    }

    #[test]
    fn type_tag_matches_serde_name() {
        let payload = OperationPayload::DeleteBranch(DeleteBranchPayload {
            fork: RepoId::new("bot", "widgets"),
            branch: "review-abc1234".to_string(),
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], payload.operation_type().as_str());
        assert_eq!(json["payload"]["branch"], "review-abc1234");
    }

    #[test]
    fn payload_parts_rebuild_the_variant() {
        let payload = OperationPayload::SimulatePr(SimulatePrPayload {
            pr_url: "https://github.com/acme/widgets/pull/42".to_string(),
            fork_record_id: Some(3),
            pr_record_id: None,
        });
        let json = payload.to_payload_json().unwrap();
        assert!(json.contains("\"prUrl\""));
        let rebuilt = OperationPayload::from_parts(OperationType::SimulatePr, &json).unwrap();
        assert_eq!(rebuilt, payload);
    }

    #[test]
    fn payload_of_wrong_shape_is_rejected() {
        let result = OperationPayload::from_parts(OperationType::CreatePr, r#"{"prUrl":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_type_names_the_value() {
        let err = "launch_rockets".parse::<OperationType>().unwrap_err();
        assert_eq!(err.to_string(), "unknown operation type: \"launch_rockets\"");
    }
}
