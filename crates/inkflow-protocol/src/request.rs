//! Generation request construction and validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while building or validating a [`GenerationRequest`].
///
/// These are the only failures surfaced synchronously to callers; everything
/// that happens after dispatch is reported through the event log instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Topic mode was selected but no topic was provided.
    #[error("a topic is required for topic mode")]
    MissingTopic,

    /// Video mode was selected but no video URL was provided.
    #[error("a video URL is required for video mode")]
    MissingVideoUrl,

    /// No provider was selected.
    #[error("no model provider selected")]
    MissingProvider,

    /// The configuration holds no API key for the selected provider.
    #[error("no API key configured for provider '{0}'")]
    MissingApiKey(String),
}

/// Discriminates the plain generation pipeline from the agentic one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationAction {
    /// Single-pass generation pipeline.
    #[default]
    Generate,
    /// Iterative agent loop (search, draft, revise).
    Agent,
}

/// Content source mode selected in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Daily digest; needs no user-supplied source.
    #[default]
    Daily,
    /// Article on a user-supplied topic.
    Topic,
    /// Article derived from a video URL.
    Video,
}

/// The immutable request value a run is started from.
///
/// Serializes to the flat JSON document the worker reads from stdin: the
/// `action` discriminant, the mode and its source parameter, provider and
/// credential fields, and any opaque configuration keys carried in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Pipeline variant to run.
    pub action: GenerationAction,
    /// Content source mode.
    pub mode: GenerationMode,
    /// Prompt template to apply, when not the built-in default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Topic for [`GenerationMode::Topic`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Source URL for [`GenerationMode::Video`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    /// Provider identifier (e.g. "deepseek").
    pub provider: String,
    /// Credential for the selected provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model override for the selected provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Reference file contents keyed by file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_files: Option<BTreeMap<String, String>>,
    /// Style/template HTML fragment applied to the output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_template: Option<String>,
    /// Output directory override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    /// Additional configuration keys forwarded to the worker verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GenerationRequest {
    /// Creates a request for the given mode with everything else defaulted.
    #[must_use]
    pub fn new(mode: GenerationMode) -> Self {
        Self { mode, ..Self::default() }
    }

    /// Sets the pipeline variant.
    #[must_use]
    pub fn with_action(mut self, action: GenerationAction) -> Self {
        self.action = action;
        self
    }

    /// Sets the topic for topic mode.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Sets the source URL for video mode.
    #[must_use]
    pub fn with_video_url(mut self, url: impl Into<String>) -> Self {
        self.video_url = Some(url.into());
        self
    }

    /// Sets the provider identifier.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Sets the provider credential.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the model override.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the prompt template.
    #[must_use]
    pub fn with_template_id(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    /// Sets the style/template HTML fragment.
    #[must_use]
    pub fn with_style_template(mut self, html: impl Into<String>) -> Self {
        self.style_template = Some(html.into());
        self
    }

    /// Sets the output directory override.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<String>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Adds a reference file by name.
    #[must_use]
    pub fn with_ref_file(mut self, name: impl Into<String>, contents: impl Into<String>) -> Self {
        self.ref_files.get_or_insert_with(BTreeMap::new).insert(name.into(), contents.into());
        self
    }

    /// Checks the mode/parameter invariants.
    ///
    /// Topic mode requires a non-blank topic, video mode a non-blank URL,
    /// and every mode a non-blank provider. Runs must not be dispatched
    /// from a request that fails this check.
    ///
    /// # Errors
    /// Returns the first violated [`RequestError`].
    pub fn validate(&self) -> Result<(), RequestError> {
        match self.mode {
            GenerationMode::Topic if is_blank(self.topic.as_deref()) => {
                return Err(RequestError::MissingTopic);
            }
            GenerationMode::Video if is_blank(self.video_url.as_deref()) => {
                return Err(RequestError::MissingVideoUrl);
            }
            _ => {}
        }
        if self.provider.trim().is_empty() {
            return Err(RequestError::MissingProvider);
        }
        Ok(())
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}
