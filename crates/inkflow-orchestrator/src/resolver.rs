//! Artifact content resolution.
//!
//! A successful run reports its artifact as a path reference; the actual
//! HTML is fetched with a `read_file` command over the same channel. The
//! worker frames the response either as newline-delimited JSON records or
//! as a bare string, and this fetch runs on the orchestrator's event path,
//! so every failure degrades to a placeholder instead of propagating.

use crate::transport::CommandDispatcher;
use inkflow_protocol::SidecarCommand;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Placeholder content for a result event that carried an empty path.
pub const EMPTY_PATH_PLACEHOLDER: &str = "<p>Article path is empty</p>";

/// Placeholder content when the response contained no readable content.
pub const UNREADABLE_PLACEHOLDER: &str = "<p>Unable to read article content</p>";

/// Placeholder content when the read command itself failed.
pub const READ_FAILED_PLACEHOLDER: &str = "<p>Failed to read article</p>";

/// Fetches artifact content by path reference.
pub struct ArtifactResolver {
    dispatcher: Arc<dyn CommandDispatcher>,
}

impl std::fmt::Debug for ArtifactResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactResolver").finish_non_exhaustive()
    }
}

impl ArtifactResolver {
    /// Creates a resolver over the given command channel.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Resolves the textual content behind `path`.
    ///
    /// Never fails: an empty path, a transport failure, or an unreadable
    /// response each produce a distinct human-readable placeholder.
    pub async fn resolve(&self, path: &str) -> String {
        if path.trim().is_empty() {
            return EMPTY_PATH_PLACEHOLDER.to_string();
        }

        let command = SidecarCommand::ReadFile { path: path.to_string() };
        match self.dispatcher.dispatch(&command).await {
            Ok(response) => Self::extract_content(&response),
            Err(e) => {
                warn!(path = %path, error = %e, "Artifact read command failed");
                READ_FAILED_PLACEHOLDER.to_string()
            }
        }
    }

    /// Scans the response framing for content.
    ///
    /// JSON records are scanned in order and the first non-empty `content`
    /// field wins. A response without any JSON records is taken verbatim as
    /// direct-string framing.
    fn extract_content(response: &str) -> String {
        let mut saw_record = false;
        for line in response.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(record) = serde_json::from_str::<Map<String, Value>>(line) else {
                continue;
            };
            saw_record = true;
            if let Some(content) = record.get("content").and_then(Value::as_str) {
                if !content.is_empty() {
                    return content.to_string();
                }
            }
        }

        if !saw_record && !response.trim().is_empty() {
            debug!("artifact response carried no records, using it verbatim");
            return response.to_string();
        }
        UNREADABLE_PLACEHOLDER.to_string()
    }
}
