//! Generation orchestration for Inkflow.
//!
//! This crate owns the lifecycle of a content-generation run: building the
//! request, dispatching it to the external sidecar worker, folding the
//! worker's event stream into run state, resolving the final artifact, and
//! exposing read-only snapshots to UI-layer consumers.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod resolver;
pub mod sidecar;
pub mod transport;

pub use config::{ConfigSource, ProviderSettings, StaticConfig};
pub use error::TransportError;
pub use lifecycle::RunPhase;
pub use orchestrator::{
    ErrorPolicy, GenerationOrchestrator, OrchestratorConfig, RunSnapshot, Selection,
};
pub use resolver::{
    ArtifactResolver, EMPTY_PATH_PLACEHOLDER, READ_FAILED_PLACEHOLDER, UNREADABLE_PLACEHOLDER,
};
pub use sidecar::{SidecarConfig, SidecarProcess};
pub use transport::{CommandDispatcher, EventChannel, EventSubscription, SIDECAR_EVENT};
