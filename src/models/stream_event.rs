//! Stream Events
//!
//! Events emitted by the orchestrator for one request, framed as NDJSON on
//! the wire. Progress is non-decreasing and exactly one terminal event
//! (`complete` or `error`) ends every stream.

use serde::{Deserialize, Serialize};

use super::analysis_result::NormalizedResult;

/// Machine-readable failure category carried by `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Every provider in the chain failed
    ProviderExhausted,
    /// The request budget ran out before any provider succeeded
    Timeout,
    /// The caller cancelled or disconnected
    Cancelled,
    /// The request itself was rejected
    InvalidRequest,
    /// Unexpected internal failure
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ProviderExhausted => "provider_exhausted",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// One event in an analysis stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Progress {
        progress: u8,
        message: String,
        /// Present on the first progress event only
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    Sentence { content: String, section: String },
    Complete { data: Box<NormalizedResult> },
    Error { message: String, kind: ErrorKind },
}

impl StreamEvent {
    pub fn progress(progress: u8, message: impl Into<String>) -> Self {
        Self::Progress {
            progress,
            message: message.into(),
            task_id: None,
        }
    }

    /// Attach the request's task id to a progress event.
    pub fn with_task_id(self, id: impl Into<String>) -> Self {
        match self {
            Self::Progress {
                progress, message, ..
            } => Self::Progress {
                progress,
                message,
                task_id: Some(id.into()),
            },
            other => other,
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            kind,
        }
    }

    pub fn complete(result: NormalizedResult) -> Self {
        Self::Complete {
            data: Box::new(result),
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }

    /// Serialize as one NDJSON line, newline included.
    pub fn to_ndjson_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(mut line) => {
                line.push('\n');
                line
            }
            Err(e) => format!(
                "{{\"type\":\"error\",\"message\":\"failed to encode event: {}\",\"kind\":\"internal\"}}\n",
                e.to_string().replace('"', "'")
            ),
        }
    }
}
