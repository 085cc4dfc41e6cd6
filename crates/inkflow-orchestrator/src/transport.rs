//! Transport seam between the orchestrator and the worker host.
//!
//! The worker is reached over two independent channels: a command channel
//! that carries one request and resolves with a single acknowledgment, and
//! a push-based event stream the worker emits while it works. Both are
//! traits so the orchestrator can be driven by the real process-backed
//! transport or by a scripted one in tests.

use crate::error::TransportError;
use async_trait::async_trait;
use inkflow_protocol::{SidecarCommand, SidecarEvent};
use tokio::sync::mpsc;
use tracing::debug;

/// Name of the event stream the worker host emits generation events under.
pub const SIDECAR_EVENT: &str = "sidecar-event";

/// Sends a single command to the worker and awaits its acknowledgment.
///
/// The acknowledgment only signals that the worker invocation returned
/// control; domain-level success or failure is reported through the event
/// stream. Implementations reject on transport failure (worker unreachable,
/// serialization failure) and nothing else.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// Dispatches `command` and resolves with the worker's acknowledgment
    /// value once the invocation has returned control.
    async fn dispatch(&self, command: &SidecarCommand) -> Result<String, TransportError>;
}

/// Subscribes to a named event stream emitted by the worker host.
///
/// Delivery is push-based, in emission order, without loss for the duration
/// of the subscription, and without deduplication.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Opens a subscription to the stream named `event_name`.
    async fn subscribe(&self, event_name: &str) -> Result<EventSubscription, TransportError>;
}

/// A live subscription handle.
///
/// Holds the receiving end of the stream plus the unsubscribe capability.
/// After [`EventSubscription::unsubscribe`] (or drop) the provider stops
/// delivering; events already buffered can still be drained with
/// [`EventSubscription::try_recv`] beforehand.
pub struct EventSubscription {
    receiver: mpsc::UnboundedReceiver<SidecarEvent>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription").finish_non_exhaustive()
    }
}

impl EventSubscription {
    /// Creates a subscription from a receiver and the provider's
    /// unsubscribe hook.
    #[must_use]
    pub fn new(
        receiver: mpsc::UnboundedReceiver<SidecarEvent>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self { receiver, unsubscribe: Some(Box::new(unsubscribe)) }
    }

    /// Receives the next event, or `None` once the provider has closed the
    /// stream and the buffer is drained.
    pub async fn recv(&mut self) -> Option<SidecarEvent> {
        self.receiver.recv().await
    }

    /// Takes an already-buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<SidecarEvent> {
        self.receiver.try_recv().ok()
    }

    /// Detaches from the provider. No further events are delivered.
    pub fn unsubscribe(mut self) {
        self.run_unsubscribe();
    }

    fn run_unsubscribe(&mut self) {
        if let Some(hook) = self.unsubscribe.take() {
            debug!("event subscription closed");
            hook();
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.run_unsubscribe();
    }
}
