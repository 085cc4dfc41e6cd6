//! Events emitted by the sidecar worker.
//!
//! The worker writes one JSON object per stdout line. Each object carries a
//! `type` discriminant (`progress`, `error`, or `result`) plus a loose set
//! of fields that has grown over time; the documented fields are typed here
//! and everything else is preserved in a flattened extension bag so an event
//! survives a round trip unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The `status` value a `result` event uses to signal success.
pub const STATUS_SUCCESS: &str = "success";

/// A single event received from the sidecar worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarEvent {
    /// Progress update. `percent` is 0-100 when present, but is neither
    /// guaranteed to be present nor to be monotonic.
    Progress {
        /// Pipeline stage identifier (e.g. "searching", "generating", "log").
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        /// Human-readable progress message.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        /// Completion percentage, 0-100.
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<u32>,
        /// Undocumented fields, preserved verbatim.
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    /// The worker reports a failure. Whether this ends the run is a policy
    /// decision of the consumer; some worker flows keep emitting afterwards.
    Error {
        /// Human-readable error message.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        /// Machine-readable error code (e.g. "MISSING_PARAMS").
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Undocumented fields, preserved verbatim.
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    /// Terminal outcome of a command. On success, `article_path` references
    /// the produced artifact.
    Result {
        /// Outcome status; [`STATUS_SUCCESS`] on success.
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        /// Path to the produced artifact.
        #[serde(skip_serializing_if = "Option::is_none")]
        article_path: Option<String>,
        /// Title of the produced article.
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        /// Path to a generated cover image.
        #[serde(skip_serializing_if = "Option::is_none")]
        cover_path: Option<String>,
        /// Artifact file type (e.g. "html").
        #[serde(skip_serializing_if = "Option::is_none")]
        file_type: Option<String>,
        /// Path to a companion metadata file.
        #[serde(skip_serializing_if = "Option::is_none")]
        meta_path: Option<String>,
        /// Undocumented fields, preserved verbatim.
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

impl SidecarEvent {
    /// Creates a `progress` event with `stage = "log"`, used by transports
    /// to forward raw worker output lines into the event stream.
    #[must_use]
    pub fn log(message: impl Into<String>) -> Self {
        Self::Progress {
            stage: Some("log".to_string()),
            message: Some(message.into()),
            percent: None,
            extra: Map::new(),
        }
    }

    /// Creates an `error` event carrying only a message.
    #[must_use]
    pub fn error_message(message: impl Into<String>) -> Self {
        Self::Error { message: Some(message.into()), code: None, extra: Map::new() }
    }

    /// Returns `true` for `error` events.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Returns `true` for a `result` event with `status == "success"`.
    #[must_use]
    pub fn is_success_result(&self) -> bool {
        matches!(self, Self::Result { status: Some(s), .. } if s == STATUS_SUCCESS)
    }

    /// Returns the artifact path of a successful `result` event, if any.
    #[must_use]
    pub fn article_path(&self) -> Option<&str> {
        match self {
            Self::Result { article_path, .. } => article_path.as_deref(),
            _ => None,
        }
    }
}
