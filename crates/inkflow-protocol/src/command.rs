//! Commands written to the sidecar worker.
//!
//! Every invocation of the worker is one JSON document on its stdin with an
//! `action` field selecting the handler. The generation payload carries its
//! own `action` discriminant, so the enum serializes by hand rather than
//! through an internally-tagged derive.

use crate::request::GenerationRequest;
use serde_json::{Value, json};

/// A single command for the sidecar worker.
#[derive(Debug, Clone, PartialEq)]
pub enum SidecarCommand {
    /// Start a generation run (plain or agentic, per the request's action).
    Generate(GenerationRequest),
    /// Read the textual content of a produced artifact.
    ReadFile {
        /// Path reference returned by a successful result event.
        path: String,
    },
    /// Read the tail of the worker's log file.
    ReadLogs {
        /// Number of trailing lines to return.
        lines: u32,
    },
    /// Cancel the in-flight generation. Payload-free.
    Stop,
}

impl SidecarCommand {
    /// Returns the `action` value this command dispatches under.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::Generate(request) => match request.action {
                crate::request::GenerationAction::Generate => "generate",
                crate::request::GenerationAction::Agent => "agent",
            },
            Self::ReadFile { .. } => "read_file",
            Self::ReadLogs { .. } => "read_logs",
            Self::Stop => "stop",
        }
    }

    /// Builds the JSON payload written to the worker's stdin.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::Generate(request) => {
                serde_json::to_value(request).unwrap_or_else(|_| json!({"action": self.action()}))
            }
            Self::ReadFile { path } => json!({"action": "read_file", "path": path}),
            Self::ReadLogs { lines } => json!({"action": "read_logs", "lines": lines}),
            Self::Stop => json!({"action": "stop"}),
        }
    }

    /// Serializes the payload to the single-line JSON string the worker
    /// expects on stdin.
    #[must_use]
    pub fn to_json(&self) -> String {
        self.payload().to_string()
    }
}
