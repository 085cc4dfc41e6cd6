//! Generation run orchestration.
//!
//! The orchestrator is the single authority over "is a generation running",
//! the accumulated event log, and the resolved result. It builds the
//! request, guards against concurrent runs, subscribes the event channel,
//! dispatches the generate command, and folds the interleaved event stream
//! into run state that UI-layer consumers read through snapshots.

use crate::config::ConfigSource;
use crate::lifecycle::RunPhase;
use crate::resolver::ArtifactResolver;
use crate::transport::{CommandDispatcher, EventChannel, EventSubscription, SIDECAR_EVENT};
use inkflow_protocol::{
    GenerationAction, GenerationMode, GenerationRequest, GenerationResult, RequestError,
    SidecarCommand, SidecarEvent,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Policy for worker-reported `error` events.
///
/// The worker does not document whether an `error` event always ends the
/// run; some flows keep emitting progress afterwards. The policy is
/// therefore explicit rather than guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// An `error` event is recorded but the run ends only when the
    /// dispatch acknowledgment resolves. Matches the observed worker host.
    #[default]
    Advisory,
    /// The first `error` event moves the run to `Failed` immediately.
    /// Later events are still logged.
    Terminal,
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Name of the event stream to subscribe per run.
    pub event_name: String,
    /// Policy for worker-reported `error` events.
    pub error_policy: ErrorPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { event_name: SIDECAR_EVENT.to_string(), error_policy: ErrorPolicy::default() }
    }
}

/// UI-facing selection state that feeds request construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Pipeline variant to run.
    pub action: GenerationAction,
    /// Content source mode.
    pub mode: GenerationMode,
    /// Prompt template to apply.
    pub template_id: Option<String>,
    /// Topic for topic mode.
    pub topic: Option<String>,
    /// Source URL for video mode.
    pub video_url: Option<String>,
    /// Provider identifier.
    pub provider: String,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            action: GenerationAction::default(),
            mode: GenerationMode::default(),
            template_id: None,
            topic: None,
            video_url: None,
            provider: "deepseek".to_string(),
        }
    }
}

impl Selection {
    /// Builds a validated request from the selection plus the injected
    /// configuration capability.
    ///
    /// # Errors
    /// Returns a [`RequestError`] when a mode-required parameter is blank
    /// or the configuration holds no API key for the selected provider.
    pub fn build_request(
        &self,
        config: &dyn ConfigSource,
    ) -> Result<GenerationRequest, RequestError> {
        let mut request = GenerationRequest::new(self.mode)
            .with_action(self.action)
            .with_provider(self.provider.clone());
        if let Some(template_id) = &self.template_id {
            request = request.with_template_id(template_id.clone());
        }
        if let Some(topic) = &self.topic {
            request = request.with_topic(topic.clone());
        }
        if let Some(video_url) = &self.video_url {
            request = request.with_video_url(video_url.clone());
        }
        request.validate()?;

        let api_key = config
            .api_key(&self.provider)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| RequestError::MissingApiKey(self.provider.clone()))?;
        request = request.with_api_key(api_key);
        if let Some(model) = config.model(&self.provider) {
            request = request.with_model(model);
        }
        if let Some(output_dir) = config.output_dir() {
            request = request.with_output_dir(output_dir);
        }
        request.extra = config.extras();
        Ok(request)
    }
}

/// Which terminal event was observed first for the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TerminalKind {
    Error,
    Success,
}

/// Mutable state of the current (or most recent) run.
#[derive(Debug, Default)]
struct RunState {
    /// Faithful transcript of received events, in arrival order.
    events: Vec<SidecarEvent>,
    /// Current phase of the run state machine.
    phase: RunPhase,
    /// Resolved result, installed by the artifact fetch.
    result: Option<GenerationResult>,
    /// First terminal event observed, if any.
    terminal: Option<TerminalKind>,
    /// Set by `stop_run` for the completion path.
    stop_requested: bool,
    /// Bumped by each `start_run`; stale artifact fetches check it.
    epoch: u64,
}

/// Read-only view of the run state handed to UI-layer consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    /// Event transcript in arrival order.
    pub events: Vec<SidecarEvent>,
    /// Whether a run is currently active.
    pub is_running: bool,
    /// Resolved result, once the artifact fetch has completed.
    pub result: Option<GenerationResult>,
    /// Current run phase.
    pub phase: RunPhase,
}

/// Orchestrates generation runs against a worker transport.
pub struct GenerationOrchestrator {
    dispatcher: Arc<dyn CommandDispatcher>,
    channel: Arc<dyn EventChannel>,
    resolver: Arc<ArtifactResolver>,
    config: OrchestratorConfig,
    /// Single-flight guard. Compare-and-set so two concurrent `start_run`
    /// calls cannot both win.
    active: Arc<AtomicBool>,
    state: Arc<Mutex<RunState>>,
    selection: Mutex<Selection>,
}

impl std::fmt::Debug for GenerationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationOrchestrator")
            .field("config", &self.config)
            .field("is_running", &self.active.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl GenerationOrchestrator {
    /// Creates an orchestrator with the default configuration.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn CommandDispatcher>, channel: Arc<dyn EventChannel>) -> Self {
        Self::with_config(dispatcher, channel, OrchestratorConfig::default())
    }

    /// Creates an orchestrator with a custom configuration.
    #[must_use]
    pub fn with_config(
        dispatcher: Arc<dyn CommandDispatcher>,
        channel: Arc<dyn EventChannel>,
        config: OrchestratorConfig,
    ) -> Self {
        let resolver = Arc::new(ArtifactResolver::new(Arc::clone(&dispatcher)));
        Self {
            dispatcher,
            channel,
            resolver,
            config,
            active: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(RunState::default())),
            selection: Mutex::new(Selection::default()),
        }
    }

    /// Whether a run is currently active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns a read-only snapshot of the run state.
    #[must_use]
    pub fn snapshot(&self) -> RunSnapshot {
        let state = self.state.lock().unwrap();
        RunSnapshot {
            events: state.events.clone(),
            is_running: self.active.load(Ordering::SeqCst),
            result: state.result.clone(),
            phase: state.phase,
        }
    }

    /// Sets the content source mode.
    pub fn set_mode(&self, mode: GenerationMode) {
        self.selection.lock().unwrap().mode = mode;
    }

    /// Sets the pipeline variant.
    pub fn set_action(&self, action: GenerationAction) {
        self.selection.lock().unwrap().action = action;
    }

    /// Sets the provider identifier.
    pub fn set_provider(&self, provider: impl Into<String>) {
        self.selection.lock().unwrap().provider = provider.into();
    }

    /// Sets or clears the prompt template.
    pub fn set_template(&self, template_id: Option<String>) {
        self.selection.lock().unwrap().template_id = template_id;
    }

    /// Sets the topic for topic mode.
    pub fn set_topic(&self, topic: impl Into<String>) {
        self.selection.lock().unwrap().topic = Some(topic.into());
    }

    /// Sets the source URL for video mode.
    pub fn set_video_url(&self, url: impl Into<String>) {
        self.selection.lock().unwrap().video_url = Some(url.into());
    }

    /// Returns a copy of the current selection.
    #[must_use]
    pub fn selection(&self) -> Selection {
        self.selection.lock().unwrap().clone()
    }

    /// Builds a request from the current selection and starts a run.
    ///
    /// # Errors
    /// Returns a [`RequestError`] when the selection or configuration is
    /// incomplete; see [`Selection::build_request`].
    pub async fn start_selected(&self, config: &dyn ConfigSource) -> Result<(), RequestError> {
        let request = self.selection.lock().unwrap().build_request(config)?;
        self.start_run(request).await
    }

    /// Runs a generation to completion.
    ///
    /// Resets the previous run's log and result, subscribes the event
    /// channel, dispatches the generate command, and folds the event stream
    /// into run state until the dispatch acknowledgment resolves. A second
    /// call while a run is active is a logged no-op; the primary guard is
    /// callers disabling the triggering action while `is_running`.
    ///
    /// # Errors
    /// Returns a [`RequestError`] when the request fails validation.
    /// Transport failures never escape; they become synthetic `error`
    /// entries in the log.
    pub async fn start_run(&self, request: GenerationRequest) -> Result<(), RequestError> {
        request.validate()?;

        if self.active.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            warn!("a generation is already running, ignoring start request");
            return Ok(());
        }

        let run_id = uuid::Uuid::new_v4();
        {
            let mut state = self.state.lock().unwrap();
            state.events.clear();
            state.result = None;
            state.terminal = None;
            state.stop_requested = false;
            state.epoch += 1;
            if state.phase.is_terminal() {
                state.phase.advance(RunPhase::Idle);
            }
            state.phase.advance(RunPhase::Starting);
        }
        info!(run_id = %run_id, provider = %request.provider, "Generation run starting");

        let subscription = match self.channel.subscribe(&self.config.event_name).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Event subscription failed");
                let mut state = self.state.lock().unwrap();
                state.events.push(SidecarEvent::error_message(e.to_string()));
                state.phase.advance(RunPhase::Failed);
                drop(state);
                self.active.store(false, Ordering::SeqCst);
                return Ok(());
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let pump = tokio::spawn(pump_events(
            subscription,
            Arc::clone(&self.state),
            Arc::clone(&self.resolver),
            self.config.error_policy,
            shutdown_rx,
        ));

        self.state.lock().unwrap().phase.advance(RunPhase::Running);

        let outcome = self.dispatcher.dispatch(&SidecarCommand::Generate(request)).await;

        // Stop the pump; it drains already-buffered events before
        // detaching, so a terminal event racing the acknowledgment is not
        // lost.
        let _ = shutdown_tx.send(());
        if pump.await.is_err() {
            warn!(run_id = %run_id, "Event pump task panicked");
        }

        let mut state = self.state.lock().unwrap();
        if let Err(e) = &outcome {
            warn!(run_id = %run_id, error = %e, "Generate dispatch failed");
            state.events.push(SidecarEvent::error_message(e.to_string()));
        }
        let final_phase = if state.stop_requested {
            RunPhase::Cancelled
        } else if outcome.is_err() || state.terminal == Some(TerminalKind::Error) {
            RunPhase::Failed
        } else if state.terminal == Some(TerminalKind::Success) {
            // Succeeded is installed by the artifact fetch when it
            // completes; the phase may legitimately still be Running here.
            state.phase
        } else {
            warn!(run_id = %run_id, "Run ended without a terminal event");
            RunPhase::Failed
        };
        state.phase.advance(final_phase);
        drop(state);

        self.active.store(false, Ordering::SeqCst);
        info!(run_id = %run_id, "Generation run finished");
        Ok(())
    }

    /// Requests cancellation of the active run.
    ///
    /// Sends the payload-free stop command out-of-band and notes the
    /// interruption in the log. Does not clear the running flag itself:
    /// the dispatch-completion path does, so the worker's own shutdown
    /// events are still captured. A call with no active run is a no-op.
    pub async fn stop_run(&self) {
        if !self.active.load(Ordering::SeqCst) {
            debug!("stop requested with no active run");
            return;
        }

        {
            let mut state = self.state.lock().unwrap();
            state.stop_requested = true;
            state.events.push(SidecarEvent::Progress {
                stage: Some("interrupt".to_string()),
                message: Some("Generation interrupted by user".to_string()),
                percent: None,
                extra: serde_json::Map::new(),
            });
        }
        info!("Stopping generation run");

        if let Err(e) = self.dispatcher.dispatch(&SidecarCommand::Stop).await {
            warn!(error = %e, "Failed to deliver stop command");
        }
    }

    /// Clears the log and result without affecting an in-progress run.
    pub fn clear_result(&self) {
        let mut state = self.state.lock().unwrap();
        state.events.clear();
        state.result = None;
        if !self.active.load(Ordering::SeqCst) {
            state.terminal = None;
            state.phase.advance(RunPhase::Idle);
        }
        debug!("run state cleared");
    }
}

/// Forwards subscription events into run state until shutdown, then drains
/// the buffer and detaches.
async fn pump_events(
    mut subscription: EventSubscription,
    state: Arc<Mutex<RunState>>,
    resolver: Arc<ArtifactResolver>,
    policy: ErrorPolicy,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            received = subscription.recv() => match received {
                Some(event) => apply_event(&state, &resolver, policy, event),
                // Provider closed the stream; nothing left to drain.
                None => return,
            },
        }
    }
    while let Some(event) = subscription.try_recv() {
        apply_event(&state, &resolver, policy, event);
    }
    subscription.unsubscribe();
}

/// Applies one received event to run state.
///
/// The transcript grows unconditionally; the state machine reacts only to
/// the first terminal event. A successful result kicks off the artifact
/// fetch as a detached task so event handling never blocks on it.
fn apply_event(
    state: &Arc<Mutex<RunState>>,
    resolver: &Arc<ArtifactResolver>,
    policy: ErrorPolicy,
    event: SidecarEvent,
) {
    let mut guard = state.lock().unwrap();
    guard.events.push(event.clone());

    if guard.terminal.is_some() {
        debug!("event after terminal event, logged only");
        return;
    }

    match &event {
        SidecarEvent::Error { message, code, .. } => {
            warn!(code = ?code, message = ?message, "Worker reported an error");
            guard.terminal = Some(TerminalKind::Error);
            if policy == ErrorPolicy::Terminal {
                guard.phase.advance(RunPhase::Failed);
            }
        }
        SidecarEvent::Result { article_path, title, cover_path, file_type, meta_path, .. }
            if event.is_success_result() =>
        {
            guard.terminal = Some(TerminalKind::Success);
            let epoch = guard.epoch;
            let path = article_path.clone().unwrap_or_default();
            let title = title.clone();
            let cover_path = cover_path.clone();
            let file_type = file_type.clone();
            let meta_path = meta_path.clone();
            drop(guard);

            debug!(path = %path, "Terminal success event, fetching artifact");
            let state = Arc::clone(state);
            let resolver = Arc::clone(resolver);
            tokio::spawn(async move {
                let html = resolver.resolve(&path).await;
                let mut result = GenerationResult::new(title, html);
                if !path.is_empty() {
                    result = result.with_artifact_path(path);
                }
                if let Some(cover) = cover_path {
                    result = result.with_cover_path(cover);
                }
                if let Some(file_type) = file_type {
                    result = result.with_file_type(file_type);
                }
                if let Some(meta) = meta_path {
                    result = result.with_meta_path(meta);
                }

                let mut guard = state.lock().unwrap();
                if guard.epoch != epoch {
                    debug!("stale artifact fetch discarded");
                    return;
                }
                guard.result = Some(result);
                guard.phase.advance(RunPhase::Succeeded);
            });
        }
        _ => {}
    }
}
