// Error types for the sidecar transport layer

use thiserror::Error;

/// Transport-level failures.
///
/// These cover the channel itself (spawning the worker, reaching its pipes,
/// framing); domain-level success or failure travels in the event stream
/// and is never represented here.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The worker process could not be spawned.
    #[error("failed to spawn sidecar: {0}")]
    Spawn(String),

    /// The command could not be delivered to the worker's stdin.
    #[error("failed to write command to sidecar stdin: {0}")]
    Stdin(String),

    /// The worker exited with a non-zero status.
    #[error("sidecar exited with code {code:?}")]
    WorkerExit {
        /// Process exit code, if one was reported.
        code: Option<i32>,
    },

    /// A stop was requested but no generation is in flight.
    #[error("no active generation to stop")]
    NoActiveWorker,

    /// The event channel was closed by the provider.
    #[error("event channel closed")]
    ChannelClosed,

    /// JSON serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error on a worker pipe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
