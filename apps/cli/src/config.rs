//! CLI configuration file.
//!
//! One TOML file covers both halves of the setup: how to launch the sidecar
//! worker, and the generation settings (provider credentials, output
//! directory, opaque worker keys) that feed request construction.
//!
//! ```toml
//! [sidecar]
//! program = "bin/inkflow-sidecar"
//! script = "scripts/sidecar_main.py"
//!
//! output_dir = "out/articles"
//!
//! [providers.deepseek]
//! api_key = "sk-..."
//! ```

use anyhow::{Context, Result};
use inkflow_orchestrator::{SidecarConfig, StaticConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level configuration file contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
    /// Sidecar launch settings.
    #[serde(default)]
    pub sidecar: SidecarSettings,
    /// Generation settings consumed during request construction.
    #[serde(flatten)]
    pub generation: StaticConfig,
}

/// How to launch the sidecar worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SidecarSettings {
    /// Packaged sidecar binary.
    pub program: PathBuf,
    /// Arguments passed to the binary.
    pub args: Vec<String>,
    /// Interpreter for the script fallback.
    pub interpreter: String,
    /// Worker script used when the packaged binary is absent.
    pub script: Option<PathBuf>,
}

impl Default for SidecarSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("inkflow-sidecar"),
            args: Vec::new(),
            interpreter: "python3".to_string(),
            script: Some(PathBuf::from("scripts/sidecar_main.py")),
        }
    }
}

impl CliConfig {
    /// Loads the configuration file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        debug!(path = %path.display(), "Config file loaded");
        Ok(config)
    }

    /// Builds the sidecar transport configuration.
    #[must_use]
    pub fn sidecar_config(&self) -> SidecarConfig {
        let mut config = SidecarConfig::new(self.sidecar.program.clone())
            .with_args(self.sidecar.args.clone())
            .with_interpreter(self.sidecar.interpreter.clone());
        if let Some(script) = &self.sidecar.script {
            config = config.with_fallback_script(script.clone());
        }
        config
    }
}
