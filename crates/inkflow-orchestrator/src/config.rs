//! Configuration capability for request construction.
//!
//! Credentials and output settings live in whatever store the host
//! application uses; the orchestrator only sees this read-only capability,
//! injected at the call site, so request construction stays testable
//! without a persistence layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Read-only view of the configuration consulted while building a request.
pub trait ConfigSource: Send + Sync {
    /// API key for `provider`, if one is configured.
    fn api_key(&self, provider: &str) -> Option<String>;

    /// Model override for `provider`, if one is configured.
    fn model(&self, provider: &str) -> Option<String>;

    /// Output directory override, if one is configured.
    fn output_dir(&self) -> Option<String>;

    /// Opaque configuration keys forwarded to the worker verbatim.
    fn extras(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// Per-provider settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Credential for the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model override for the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// An in-memory [`ConfigSource`], deserializable from the host's config
/// file. Used directly by the CLI and by tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticConfig {
    /// Settings keyed by provider identifier.
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
    /// Output directory override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    /// Opaque keys forwarded to the worker verbatim.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extras: Map<String, Value>,
}

impl StaticConfig {
    /// Adds or replaces a provider entry.
    #[must_use]
    pub fn with_provider(
        mut self,
        provider: impl Into<String>,
        settings: ProviderSettings,
    ) -> Self {
        self.providers.insert(provider.into(), settings);
        self
    }

    /// Sets the output directory override.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<String>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }
}

impl ConfigSource for StaticConfig {
    fn api_key(&self, provider: &str) -> Option<String> {
        self.providers.get(provider).and_then(|p| p.api_key.clone())
    }

    fn model(&self, provider: &str) -> Option<String> {
        self.providers.get(provider).and_then(|p| p.model.clone())
    }

    fn output_dir(&self) -> Option<String> {
        self.output_dir.clone()
    }

    fn extras(&self) -> Map<String, Value> {
        self.extras.clone()
    }
}
