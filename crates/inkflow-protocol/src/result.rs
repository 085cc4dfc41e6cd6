//! The resolved outcome of a successful run.

use serde::{Deserialize, Serialize};

/// Title used when a successful result event carries none.
pub const DEFAULT_TITLE: &str = "Untitled Article";

/// The final artifact of a run, available only after the artifact content
/// has been fetched. Until then the run's externally visible result stays
/// empty even though the terminal event was already received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Article title; [`DEFAULT_TITLE`] when the worker reported none.
    pub title: String,
    /// Full HTML content of the article.
    pub html_content: String,
    /// Path to a generated cover image, when one was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_path: Option<String>,
    /// Path the artifact was resolved from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    /// Artifact file type; defaults to "html".
    pub file_type: String,
    /// Path to a companion metadata file, when one was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_path: Option<String>,
}

impl GenerationResult {
    /// Creates a result from resolved HTML content, defaulting the title
    /// and file type where the worker reported none.
    #[must_use]
    pub fn new(title: Option<String>, html_content: String) -> Self {
        Self {
            title: title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            html_content,
            cover_path: None,
            artifact_path: None,
            file_type: "html".to_string(),
            meta_path: None,
        }
    }

    /// Sets the artifact path.
    #[must_use]
    pub fn with_artifact_path(mut self, path: impl Into<String>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }

    /// Sets the cover image path.
    #[must_use]
    pub fn with_cover_path(mut self, path: impl Into<String>) -> Self {
        self.cover_path = Some(path.into());
        self
    }

    /// Sets the file type.
    #[must_use]
    pub fn with_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = file_type.into();
        self
    }

    /// Sets the metadata file path.
    #[must_use]
    pub fn with_meta_path(mut self, path: impl Into<String>) -> Self {
        self.meta_path = Some(path.into());
        self
    }
}
