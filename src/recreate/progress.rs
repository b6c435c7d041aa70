//! Progress-event protocol.
//!
//! A recreation emits any number of status events followed by exactly one
//! result event. Status events are advisory; only the result event carries
//! the outcome.
//!
//! On the wire each event is one JSON object:
//!
//! ```json
//! {"eventType":"status","step":5,"statusType":"info","message":"Cloning bot/widgets"}
//! {"eventType":"result","success":true,"prUrl":"https://github.com/bot/widgets/pull/3", ...}
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{RecreateError, RecreationResult};

/// Pipeline stages, numbered in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    ResolveRepository = 1,
    ResolveCommit = 2,
    ResolveParent = 3,
    CheckExisting = 4,
    Clone = 5,
    CreateBranch = 6,
    CherryPick = 7,
    Push = 8,
    CreatePr = 9,
    Cleanup = 10,
}

impl Stage {
    pub fn step(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusType {
    Info,
    Error,
}

/// Terminal event of a recreation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEvent {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fork_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_existed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error class, see [`RecreateError::kind`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ResultEvent {
    pub fn from_outcome(outcome: &Result<RecreationResult, RecreateError>) -> Self {
        match outcome {
            Ok(result) => ResultEvent {
                success: true,
                pr_url: Some(result.pr_url.clone()),
                fork_url: Some(result.fork_url.clone()),
                commit_hash: Some(result.commit_hash.clone()),
                already_existed: Some(result.already_existed),
                title: Some(result.title.clone()),
                branch_name: Some(result.branch_name.clone()),
                pr_number: Some(result.pr_number),
                error: None,
                kind: None,
            },
            Err(e) => ResultEvent {
                success: false,
                pr_url: None,
                fork_url: None,
                commit_hash: None,
                already_existed: None,
                title: None,
                branch_name: None,
                pr_number: None,
                error: Some(e.to_string()),
                kind: Some(e.kind().to_string()),
            },
        }
    }
}

/// One event of the progress stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "lowercase")]
pub enum ProgressEvent {
    Status {
        step: u8,
        #[serde(rename = "statusType")]
        status_type: StatusType,
        message: String,
    },
    Result(ResultEvent),
}

/// Where the pipeline reports progress.
///
/// Sending never fails: a consumer that went away (closed SSE connection)
/// must not interrupt the pipeline.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// A sink that drops every event.
    pub fn discard() -> Self {
        ProgressSink { tx: None }
    }

    /// A sink feeding an unbounded channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ProgressSink { tx: Some(tx) }, rx)
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn info(&self, stage: Stage, message: impl Into<String>) {
        self.send(ProgressEvent::Status {
            step: stage.step(),
            status_type: StatusType::Info,
            message: message.into(),
        });
    }

    pub fn error(&self, stage: Stage, message: impl Into<String>) {
        self.send(ProgressEvent::Status {
            step: stage.step(),
            status_type: StatusType::Error,
            message: message.into(),
        });
    }

    /// Emit the terminal result event.
    pub fn finish(&self, outcome: &Result<RecreationResult, RecreateError>) {
        self.send(ProgressEvent::Result(ResultEvent::from_outcome(outcome)));
    }
}
