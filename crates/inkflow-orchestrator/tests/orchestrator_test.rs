//! Integration tests for the generation orchestrator against a scripted
//! in-memory transport.

use async_trait::async_trait;
use inkflow_orchestrator::{
    CommandDispatcher, EMPTY_PATH_PLACEHOLDER, ErrorPolicy, EventChannel, EventSubscription,
    GenerationOrchestrator, OrchestratorConfig, RunPhase, SIDECAR_EVENT, TransportError,
};
use inkflow_protocol::{
    DEFAULT_TITLE, GenerationMode, GenerationRequest, SidecarCommand, SidecarEvent,
};
use serde_json::Map;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Scripted behavior for one dispatch call, consumed in call order.
enum Behavior {
    /// Emit the events to subscribers, then resolve with the ack.
    EmitThenAck(Vec<SidecarEvent>, &'static str),
    /// Emit the events, sleep, then resolve with the ack.
    EmitThenDelay(Vec<SidecarEvent>, Duration, &'static str),
    /// Sleep, then resolve with the ack.
    DelayThenAck(Duration, &'static str),
    /// Reject with a spawn error carrying the message.
    Fail(&'static str),
    /// Plain acknowledgment (read_file / stop responses).
    Ack(&'static str),
}

/// In-memory transport driven by a behavior script.
struct MockTransport {
    behaviors: Mutex<VecDeque<Behavior>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SidecarEvent>>>,
    dispatched: Mutex<Vec<SidecarCommand>>,
    subscriptions: AtomicU32,
    unsubscriptions: Arc<AtomicU32>,
}

impl MockTransport {
    fn new(behaviors: Vec<Behavior>) -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(behaviors.into()),
            subscribers: Mutex::new(Vec::new()),
            dispatched: Mutex::new(Vec::new()),
            subscriptions: AtomicU32::new(0),
            unsubscriptions: Arc::new(AtomicU32::new(0)),
        })
    }

    fn emit(&self, event: SidecarEvent) {
        for tx in self.subscribers.lock().unwrap().iter() {
            let _ = tx.send(event.clone());
        }
    }

    fn dispatched(&self) -> Vec<SidecarCommand> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandDispatcher for MockTransport {
    async fn dispatch(&self, command: &SidecarCommand) -> Result<String, TransportError> {
        self.dispatched.lock().unwrap().push(command.clone());
        let behavior = self.behaviors.lock().unwrap().pop_front();
        match behavior {
            Some(Behavior::EmitThenAck(events, ack)) => {
                for event in events {
                    self.emit(event);
                }
                tokio::task::yield_now().await;
                Ok(ack.to_string())
            }
            Some(Behavior::EmitThenDelay(events, delay, ack)) => {
                for event in events {
                    self.emit(event);
                }
                tokio::time::sleep(delay).await;
                Ok(ack.to_string())
            }
            Some(Behavior::DelayThenAck(delay, ack)) => {
                tokio::time::sleep(delay).await;
                Ok(ack.to_string())
            }
            Some(Behavior::Fail(message)) => Err(TransportError::Spawn(message.to_string())),
            Some(Behavior::Ack(ack)) => Ok(ack.to_string()),
            None => Ok(String::new()),
        }
    }
}

#[async_trait]
impl EventChannel for MockTransport {
    async fn subscribe(&self, event_name: &str) -> Result<EventSubscription, TransportError> {
        assert_eq!(event_name, SIDECAR_EVENT);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        let unsubscriptions = Arc::clone(&self.unsubscriptions);
        Ok(EventSubscription::new(rx, move || {
            unsubscriptions.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

fn orchestrator(transport: &Arc<MockTransport>) -> Arc<GenerationOrchestrator> {
    Arc::new(GenerationOrchestrator::new(
        Arc::clone(transport) as Arc<dyn CommandDispatcher>,
        Arc::clone(transport) as Arc<dyn EventChannel>,
    ))
}

fn topic_request() -> GenerationRequest {
    GenerationRequest::new(GenerationMode::Topic)
        .with_topic("rust async")
        .with_provider("deepseek")
}

fn progress(percent: u32) -> SidecarEvent {
    SidecarEvent::Progress {
        stage: Some("generating".to_string()),
        message: None,
        percent: Some(percent),
        extra: Map::new(),
    }
}

fn success_result(path: &str) -> SidecarEvent {
    SidecarEvent::Result {
        status: Some("success".to_string()),
        article_path: Some(path.to_string()),
        title: None,
        cover_path: None,
        file_type: None,
        meta_path: None,
        extra: Map::new(),
    }
}

const READ_FILE_ACK: &str = "{\"type\":\"result\",\"content\":\"<p>hi</p>\"}";

/// Polls until the resolved result appears or the deadline passes.
async fn wait_for_result(orchestrator: &GenerationOrchestrator) {
    for _ in 0..100 {
        if orchestrator.snapshot().result.is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("result was not resolved in time");
}

#[tokio::test]
async fn test_missing_topic_is_rejected_before_dispatch() {
    let transport = MockTransport::new(vec![]);
    let orchestrator = orchestrator(&transport);

    let request = GenerationRequest::new(GenerationMode::Topic).with_provider("deepseek");
    assert!(orchestrator.start_run(request).await.is_err());

    let snapshot = orchestrator.snapshot();
    assert!(!snapshot.is_running);
    assert!(snapshot.events.is_empty());
    assert_eq!(snapshot.phase, RunPhase::Idle);
    assert!(transport.dispatched().is_empty());
    assert_eq!(transport.subscriptions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_blank_video_url_is_rejected_before_dispatch() {
    let transport = MockTransport::new(vec![]);
    let orchestrator = orchestrator(&transport);

    let request = GenerationRequest::new(GenerationMode::Video)
        .with_video_url("")
        .with_provider("deepseek");
    assert!(orchestrator.start_run(request).await.is_err());
    assert!(orchestrator.snapshot().events.is_empty());
    assert!(transport.dispatched().is_empty());
}

#[tokio::test]
async fn test_event_log_is_a_faithful_transcript() {
    let events = vec![
        progress(10),
        SidecarEvent::log("searching sources"),
        SidecarEvent::error_message("rate limited"),
        // The worker kept emitting after its error; the transcript keeps
        // growing even though the state machine is done.
        progress(90),
        success_result("/tmp/a.html"),
    ];
    let transport = MockTransport::new(vec![Behavior::EmitThenAck(events.clone(), "")]);
    let orchestrator = orchestrator(&transport);

    orchestrator.start_run(topic_request()).await.unwrap();

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.events, events);
    assert!(!snapshot.is_running);
}

#[tokio::test]
async fn test_successful_run_resolves_artifact() {
    let transport = MockTransport::new(vec![
        Behavior::EmitThenAck(
            vec![progress(10), progress(55), success_result("/tmp/a.html")],
            "",
        ),
        Behavior::Ack(READ_FILE_ACK),
    ]);
    let orchestrator = orchestrator(&transport);

    orchestrator.start_run(topic_request()).await.unwrap();
    wait_for_result(&orchestrator).await;

    let snapshot = orchestrator.snapshot();
    assert!(!snapshot.is_running);
    assert_eq!(snapshot.events.len(), 3);
    assert_eq!(snapshot.phase, RunPhase::Succeeded);

    let result = snapshot.result.unwrap();
    assert_eq!(result.html_content, "<p>hi</p>");
    assert_eq!(result.artifact_path.as_deref(), Some("/tmp/a.html"));
    assert_eq!(result.file_type, "html");
    assert_eq!(result.title, DEFAULT_TITLE);

    let dispatched = transport.dispatched();
    assert_eq!(dispatched.len(), 2);
    assert!(matches!(&dispatched[0], SidecarCommand::Generate(_)));
    assert_eq!(dispatched[1], SidecarCommand::ReadFile { path: "/tmp/a.html".to_string() });
}

#[tokio::test]
async fn test_second_start_while_running_is_a_noop() {
    let transport =
        MockTransport::new(vec![Behavior::DelayThenAck(Duration::from_millis(200), "")]);
    let orchestrator = orchestrator(&transport);

    let background = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.start_run(topic_request()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(orchestrator.is_running());

    // The defensive guard swallows the call without a second dispatch.
    orchestrator.start_run(topic_request()).await.unwrap();
    assert_eq!(transport.dispatched().len(), 1);
    assert!(orchestrator.is_running());

    background.await.unwrap().unwrap();
    assert!(!orchestrator.is_running());
    assert_eq!(transport.dispatched().len(), 1);
}

#[tokio::test]
async fn test_dispatch_failure_becomes_a_synthetic_error_entry() {
    let transport = MockTransport::new(vec![Behavior::Fail("boom")]);
    let orchestrator = orchestrator(&transport);

    orchestrator.start_run(topic_request()).await.unwrap();

    let snapshot = orchestrator.snapshot();
    assert!(!snapshot.is_running);
    assert!(snapshot.result.is_none());
    assert_eq!(snapshot.phase, RunPhase::Failed);
    assert_eq!(snapshot.events.len(), 1);
    match &snapshot.events[0] {
        SidecarEvent::Error { message, .. } => {
            assert!(message.as_deref().unwrap().contains("boom"));
        }
        other => panic!("expected error entry, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_artifact_path_resolves_to_placeholder() {
    let transport = MockTransport::new(vec![Behavior::EmitThenAck(vec![success_result("")], "")]);
    let orchestrator = orchestrator(&transport);

    orchestrator.start_run(topic_request()).await.unwrap();
    wait_for_result(&orchestrator).await;

    let snapshot = orchestrator.snapshot();
    let result = snapshot.result.unwrap();
    assert_eq!(result.html_content, EMPTY_PATH_PLACEHOLDER);
    assert_eq!(result.artifact_path, None);
    assert_eq!(snapshot.phase, RunPhase::Succeeded);
    // The resolver never dispatched a read command for the empty path.
    assert_eq!(transport.dispatched().len(), 1);
}

#[tokio::test]
async fn test_stop_run_without_active_run_is_a_noop() {
    let transport = MockTransport::new(vec![]);
    let orchestrator = orchestrator(&transport);

    orchestrator.stop_run().await;

    let snapshot = orchestrator.snapshot();
    assert!(snapshot.events.is_empty());
    assert!(!snapshot.is_running);
    assert!(transport.dispatched().is_empty());
}

#[tokio::test]
async fn test_stop_run_cancels_the_active_run() {
    let transport = MockTransport::new(vec![
        Behavior::DelayThenAck(Duration::from_millis(200), ""),
        Behavior::Ack("stopped"),
    ]);
    let orchestrator = orchestrator(&transport);

    let background = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.start_run(topic_request()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    orchestrator.stop_run().await;
    let dispatched = transport.dispatched();
    assert_eq!(dispatched[1], SidecarCommand::Stop);

    // The interruption is noted in the log; the flag stays up until the
    // dispatch acknowledgment resolves.
    let snapshot = orchestrator.snapshot();
    assert!(snapshot.is_running);
    assert!(snapshot.events.iter().any(|event| matches!(
        event,
        SidecarEvent::Progress { stage: Some(stage), .. } if stage == "interrupt"
    )));

    background.await.unwrap().unwrap();
    let snapshot = orchestrator.snapshot();
    assert!(!snapshot.is_running);
    assert_eq!(snapshot.phase, RunPhase::Cancelled);
}

#[tokio::test]
async fn test_clear_result_during_run_leaves_it_running() {
    let transport =
        MockTransport::new(vec![Behavior::DelayThenAck(Duration::from_millis(200), "")]);
    let orchestrator = orchestrator(&transport);

    let background = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.start_run(topic_request()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    orchestrator.clear_result();
    assert!(orchestrator.is_running());
    assert!(orchestrator.snapshot().events.is_empty());

    background.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_clear_result_resets_a_finished_run() {
    let transport = MockTransport::new(vec![
        Behavior::EmitThenAck(vec![success_result("/tmp/a.html")], ""),
        Behavior::Ack(READ_FILE_ACK),
    ]);
    let orchestrator = orchestrator(&transport);

    orchestrator.start_run(topic_request()).await.unwrap();
    wait_for_result(&orchestrator).await;

    orchestrator.clear_result();
    let snapshot = orchestrator.snapshot();
    assert!(snapshot.events.is_empty());
    assert!(snapshot.result.is_none());
    assert_eq!(snapshot.phase, RunPhase::Idle);
}

#[tokio::test]
async fn test_advisory_error_fails_the_run_only_at_completion() {
    let transport = MockTransport::new(vec![Behavior::EmitThenDelay(
        vec![SidecarEvent::error_message("model unavailable"), progress(70)],
        Duration::from_millis(100),
        "",
    )]);
    let orchestrator = orchestrator(&transport);

    let background = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.start_run(topic_request()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Advisory policy: the error is logged but the run is still going.
    let snapshot = orchestrator.snapshot();
    assert!(snapshot.is_running);
    assert_eq!(snapshot.phase, RunPhase::Running);
    assert_eq!(snapshot.events.len(), 2);

    background.await.unwrap().unwrap();
    assert_eq!(orchestrator.snapshot().phase, RunPhase::Failed);
}

#[tokio::test]
async fn test_terminal_error_policy_fails_immediately() {
    let transport = MockTransport::new(vec![Behavior::EmitThenDelay(
        vec![SidecarEvent::error_message("model unavailable")],
        Duration::from_millis(100),
        "",
    )]);
    let orchestrator = Arc::new(GenerationOrchestrator::with_config(
        Arc::clone(&transport) as Arc<dyn CommandDispatcher>,
        Arc::clone(&transport) as Arc<dyn EventChannel>,
        OrchestratorConfig { error_policy: ErrorPolicy::Terminal, ..OrchestratorConfig::default() },
    ));

    let background = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.start_run(topic_request()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = orchestrator.snapshot();
    assert!(snapshot.is_running);
    assert_eq!(snapshot.phase, RunPhase::Failed);

    background.await.unwrap().unwrap();
    assert_eq!(orchestrator.snapshot().phase, RunPhase::Failed);
}

#[tokio::test]
async fn test_success_after_error_does_not_fetch() {
    let transport = MockTransport::new(vec![Behavior::EmitThenAck(
        vec![SidecarEvent::error_message("out of quota"), success_result("/tmp/a.html")],
        "",
    )]);
    let orchestrator = orchestrator(&transport);

    orchestrator.start_run(topic_request()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.events.len(), 2);
    assert!(snapshot.result.is_none());
    assert_eq!(snapshot.phase, RunPhase::Failed);
    // Only the generate command went out; the post-terminal result did not
    // trigger a read.
    assert_eq!(transport.dispatched().len(), 1);
}

#[tokio::test]
async fn test_duplicate_success_results_fetch_once() {
    let transport = MockTransport::new(vec![
        Behavior::EmitThenAck(
            vec![success_result("/tmp/a.html"), success_result("/tmp/b.html")],
            "",
        ),
        Behavior::Ack(READ_FILE_ACK),
    ]);
    let orchestrator = orchestrator(&transport);

    orchestrator.start_run(topic_request()).await.unwrap();
    wait_for_result(&orchestrator).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let dispatched = transport.dispatched();
    let reads = dispatched
        .iter()
        .filter(|command| matches!(command, SidecarCommand::ReadFile { .. }))
        .count();
    assert_eq!(reads, 1);
    let result = orchestrator.snapshot().result.unwrap();
    assert_eq!(result.artifact_path.as_deref(), Some("/tmp/a.html"));
}

#[tokio::test]
async fn test_exactly_one_subscription_pair_per_run() {
    let transport = MockTransport::new(vec![
        Behavior::EmitThenAck(vec![progress(10)], ""),
        Behavior::EmitThenAck(vec![progress(20)], ""),
    ]);
    let orchestrator = orchestrator(&transport);

    orchestrator.start_run(topic_request()).await.unwrap();
    assert_eq!(transport.subscriptions.load(Ordering::SeqCst), 1);
    assert_eq!(transport.unsubscriptions.load(Ordering::SeqCst), 1);

    orchestrator.start_run(topic_request()).await.unwrap();
    assert_eq!(transport.subscriptions.load(Ordering::SeqCst), 2);
    assert_eq!(transport.unsubscriptions.load(Ordering::SeqCst), 2);

    // The second run reset the log before appending its own events.
    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.events, vec![progress(20)]);
}

#[tokio::test]
async fn test_result_metadata_is_carried_through() {
    let event = SidecarEvent::Result {
        status: Some("success".to_string()),
        article_path: Some("/tmp/a.html".to_string()),
        title: Some("AI Weekly".to_string()),
        cover_path: Some("/tmp/a.png".to_string()),
        file_type: Some("html".to_string()),
        meta_path: Some("/tmp/a.meta.json".to_string()),
        extra: Map::new(),
    };
    let transport = MockTransport::new(vec![
        Behavior::EmitThenAck(vec![event], ""),
        Behavior::Ack(READ_FILE_ACK),
    ]);
    let orchestrator = orchestrator(&transport);

    orchestrator.start_run(topic_request()).await.unwrap();
    wait_for_result(&orchestrator).await;

    let result = orchestrator.snapshot().result.unwrap();
    assert_eq!(result.title, "AI Weekly");
    assert_eq!(result.cover_path.as_deref(), Some("/tmp/a.png"));
    assert_eq!(result.meta_path.as_deref(), Some("/tmp/a.meta.json"));
}
