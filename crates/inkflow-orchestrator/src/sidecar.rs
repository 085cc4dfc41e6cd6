//! Child-process transport for the sidecar worker.
//!
//! Each command spawns one worker process: the serialized command goes to
//! its stdin (closed immediately so the worker's blocking read returns),
//! stdout is parsed line-by-line into [`SidecarEvent`]s for subscribers,
//! and the collected stdout transcript becomes the acknowledgment value.
//! Non-JSON stdout and all stderr lines are forwarded as `stage="log"`
//! progress events so raw worker output still reaches the UI.

use crate::error::TransportError;
use crate::transport::{CommandDispatcher, EventChannel, EventSubscription, SIDECAR_EVENT};
use async_trait::async_trait;
use inkflow_protocol::{SidecarCommand, SidecarEvent};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How the sidecar executable is located and launched.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Packaged sidecar binary, preferred when present.
    pub program: PathBuf,
    /// Arguments passed to the packaged binary.
    pub args: Vec<String>,
    /// Interpreter for the script fallback.
    pub interpreter: String,
    /// Worker script launched through the interpreter when the packaged
    /// binary is absent. Keeps development setups working without a build.
    pub fallback_script: Option<PathBuf>,
}

impl SidecarConfig {
    /// Creates a config for the given sidecar binary.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            interpreter: "python3".to_string(),
            fallback_script: None,
        }
    }

    /// Sets the arguments passed to the packaged binary.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the script fallback.
    #[must_use]
    pub fn with_fallback_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.fallback_script = Some(script.into());
        self
    }

    /// Sets the fallback interpreter.
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }
}

type SubscriberMap = HashMap<String, Vec<(u64, mpsc::UnboundedSender<SidecarEvent>)>>;

/// Process-backed implementation of both transport traits.
pub struct SidecarProcess {
    config: SidecarConfig,
    subscribers: Arc<Mutex<SubscriberMap>>,
    next_subscriber_id: AtomicU64,
    /// Child of the in-flight generation, kept so `stop` can reach it.
    generation_child: Arc<tokio::sync::Mutex<Option<Child>>>,
}

impl std::fmt::Debug for SidecarProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarProcess").field("config", &self.config).finish_non_exhaustive()
    }
}

impl SidecarProcess {
    /// Creates a transport with the given launch configuration.
    #[must_use]
    pub fn new(config: SidecarConfig) -> Self {
        Self {
            config,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscriber_id: AtomicU64::new(0),
            generation_child: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Spawns the worker process, preferring the packaged binary and
    /// falling back to the interpreter + script pair.
    fn spawn_worker(&self) -> Result<Child, TransportError> {
        let mut command = if self.config.program.exists() {
            let mut command = Command::new(&self.config.program);
            command.args(&self.config.args);
            command
        } else if let Some(script) =
            self.config.fallback_script.as_ref().filter(|script| script.exists())
        {
            debug!(script = %script.display(), "Packaged sidecar missing, using script fallback");
            let mut command = Command::new(&self.config.interpreter);
            command.arg(script);
            command
        } else {
            return Err(TransportError::Spawn(format!(
                "sidecar binary {} not found and no usable fallback script",
                self.config.program.display()
            )));
        };

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn(e.to_string()))
    }

    /// Kills the in-flight generation process, if any. The dispatch that
    /// owns the process still observes its exit, so the completion path
    /// stays with the dispatcher.
    async fn stop_generation(&self) -> Result<String, TransportError> {
        let mut guard = self.generation_child.lock().await;
        match guard.as_mut() {
            Some(child) => {
                info!("Killing in-flight sidecar process");
                child.start_kill()?;
                Ok("stopped".to_string())
            }
            None => Err(TransportError::NoActiveWorker),
        }
    }
}

/// Delivers an event to every subscriber of the sidecar stream.
fn broadcast(subscribers: &Arc<Mutex<SubscriberMap>>, event: &SidecarEvent) {
    let map = subscribers.lock().unwrap();
    if let Some(list) = map.get(SIDECAR_EVENT) {
        for (_, tx) in list {
            let _ = tx.send(event.clone());
        }
    }
}

#[async_trait]
impl CommandDispatcher for SidecarProcess {
    async fn dispatch(&self, command: &SidecarCommand) -> Result<String, TransportError> {
        if matches!(command, SidecarCommand::Stop) {
            return self.stop_generation().await;
        }

        let mut child = self.spawn_worker()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Stdin("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Spawn("stderr not captured".to_string()))?;

        stdin
            .write_all(command.to_json().as_bytes())
            .await
            .map_err(|e| TransportError::Stdin(e.to_string()))?;
        // Closing the pipe sends EOF so the worker's stdin read returns.
        drop(stdin);

        let is_generation = matches!(command, SidecarCommand::Generate(_));
        let mut local_child = Some(child);
        if is_generation {
            *self.generation_child.lock().await = local_child.take();
        }

        let stderr_task = tokio::spawn({
            let subscribers = Arc::clone(&self.subscribers);
            async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    warn!(line = %line, "Sidecar stderr");
                    broadcast(&subscribers, &SidecarEvent::log(format!("[stderr] {line}")));
                }
            }
        });

        let mut output_lines = Vec::new();
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match serde_json::from_str::<SidecarEvent>(&line) {
                Ok(event) => broadcast(&self.subscribers, &event),
                Err(_) if !line.trim().is_empty() => {
                    // Raw worker output still reaches the UI as a log line.
                    broadcast(&self.subscribers, &SidecarEvent::log(line.clone()));
                }
                Err(_) => {}
            }
            output_lines.push(line);
        }
        let _ = stderr_task.await;

        let child_back = if is_generation {
            self.generation_child.lock().await.take()
        } else {
            local_child.take()
        };
        let Some(mut child) = child_back else {
            return Err(TransportError::Spawn("sidecar process handle lost".to_string()));
        };
        let status = child.wait().await?;

        if !status.success() {
            return Err(TransportError::WorkerExit { code: status.code() });
        }
        Ok(output_lines.join("\n"))
    }
}

#[async_trait]
impl EventChannel for SidecarProcess {
    async fn subscribe(&self, event_name: &str) -> Result<EventSubscription, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .unwrap()
            .entry(event_name.to_string())
            .or_default()
            .push((id, tx));
        debug!(event = %event_name, subscriber = id, "Event subscription opened");

        let subscribers = Arc::clone(&self.subscribers);
        let name = event_name.to_string();
        Ok(EventSubscription::new(rx, move || {
            let mut map = subscribers.lock().unwrap();
            if let Some(list) = map.get_mut(&name) {
                list.retain(|(subscriber_id, _)| *subscriber_id != id);
            }
        }))
    }
}
