//! Inkflow command-line driver.
//!
//! Wires the process-backed sidecar transport to the generation
//! orchestrator so a run can be started, watched, and cancelled from a
//! terminal. Ctrl-C requests cooperative cancellation; the run still ends
//! through the worker's own completion path.

mod config;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use config::CliConfig;
use inkflow_orchestrator::{
    CommandDispatcher, EventChannel, GenerationOrchestrator, RunPhase, SidecarProcess,
};
use inkflow_protocol::{GenerationAction, GenerationMode, SidecarCommand, SidecarEvent};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "inkflow", about = "Drive the Inkflow content-generation sidecar", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "inkflow.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a generation and stream its progress.
    Generate {
        /// Content source mode.
        #[arg(long, value_enum, default_value_t = ModeArg::Daily)]
        mode: ModeArg,
        /// Topic for topic mode.
        #[arg(long)]
        topic: Option<String>,
        /// Video URL for video mode.
        #[arg(long)]
        video_url: Option<String>,
        /// Provider identifier.
        #[arg(long, default_value = "deepseek")]
        provider: String,
        /// Prompt template identifier.
        #[arg(long)]
        template: Option<String>,
        /// Use the agentic pipeline instead of single-pass generation.
        #[arg(long)]
        agent: bool,
    },
    /// Print the tail of the worker's log file.
    Logs {
        /// Number of trailing lines to fetch.
        #[arg(long, default_value_t = 200)]
        lines: u32,
    },
}

/// Content source mode, as a CLI argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Daily,
    Topic,
    Video,
}

impl From<ModeArg> for GenerationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Daily => GenerationMode::Daily,
            ModeArg::Topic => GenerationMode::Topic,
            ModeArg::Video => GenerationMode::Video,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CliConfig::load(&cli.config)?;
    let transport = Arc::new(SidecarProcess::new(config.sidecar_config()));

    match cli.command {
        Commands::Generate { mode, topic, video_url, provider, template, agent } => {
            generate(transport, config, mode, topic, video_url, provider, template, agent).await
        }
        Commands::Logs { lines } => logs(&transport, lines).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn generate(
    transport: Arc<SidecarProcess>,
    config: CliConfig,
    mode: ModeArg,
    topic: Option<String>,
    video_url: Option<String>,
    provider: String,
    template: Option<String>,
    agent: bool,
) -> Result<()> {
    let orchestrator = Arc::new(GenerationOrchestrator::new(
        Arc::clone(&transport) as Arc<dyn CommandDispatcher>,
        transport as Arc<dyn EventChannel>,
    ));
    orchestrator.set_mode(mode.into());
    orchestrator.set_provider(provider);
    orchestrator.set_template(template);
    if agent {
        orchestrator.set_action(GenerationAction::Agent);
    }
    if let Some(topic) = topic {
        orchestrator.set_topic(topic);
    }
    if let Some(url) = video_url {
        orchestrator.set_video_url(url);
    }

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        let generation = config.generation.clone();
        tokio::spawn(async move { orchestrator.start_selected(&generation).await })
    };

    // Stream the event log to the terminal while the run progresses.
    let mut printed = 0;
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("interrupt requested, stopping generation");
                orchestrator.stop_run().await;
            }
            _ = ticker.tick() => {
                let snapshot = orchestrator.snapshot();
                for event in &snapshot.events[printed..] {
                    print_event(event);
                }
                printed = snapshot.events.len();
                if run.is_finished() && !snapshot.is_running {
                    break;
                }
            }
        }
    }
    run.await??;

    // The artifact fetch completes asynchronously after the run; give it a
    // moment before reporting the outcome.
    for _ in 0..50 {
        let snapshot = orchestrator.snapshot();
        if snapshot.phase != RunPhase::Running || snapshot.result.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let snapshot = orchestrator.snapshot();
    for event in &snapshot.events[printed..] {
        print_event(event);
    }
    match snapshot.phase {
        RunPhase::Succeeded => {
            if let Some(result) = &snapshot.result {
                println!("generated: {}", result.title);
                if let Some(path) = &result.artifact_path {
                    println!("artifact:  {path}");
                }
                if let Some(cover) = &result.cover_path {
                    println!("cover:     {cover}");
                }
            }
            Ok(())
        }
        RunPhase::Cancelled => {
            println!("generation cancelled");
            Ok(())
        }
        _ => {
            let message = snapshot
                .events
                .iter()
                .rev()
                .find_map(|event| match event {
                    SidecarEvent::Error { message, .. } => message.clone(),
                    _ => None,
                })
                .unwrap_or_else(|| "run ended without a result".to_string());
            bail!("generation failed: {message}");
        }
    }
}

async fn logs(transport: &SidecarProcess, lines: u32) -> Result<()> {
    let ack = transport.dispatch(&SidecarCommand::ReadLogs { lines }).await?;
    for line in ack.lines() {
        // Records framing: print the content field when present.
        if let Ok(record) = serde_json::from_str::<serde_json::Value>(line) {
            if let Some(content) = record.get("content").and_then(|value| value.as_str()) {
                println!("{content}");
                continue;
            }
        }
        println!("{line}");
    }
    Ok(())
}

fn print_event(event: &SidecarEvent) {
    let now = chrono::Local::now().format("%H:%M:%S");
    match event {
        SidecarEvent::Progress { stage, message, percent, .. } => {
            let stage = stage.as_deref().unwrap_or("progress");
            let message = message.as_deref().unwrap_or("");
            match percent {
                Some(percent) => println!("[{now}] {stage} ({percent}%) {message}"),
                None => println!("[{now}] {stage} {message}"),
            }
        }
        SidecarEvent::Error { code, message, .. } => {
            let message = message.as_deref().unwrap_or("unknown error");
            match code {
                Some(code) => eprintln!("[{now}] error [{code}] {message}"),
                None => eprintln!("[{now}] error {message}"),
            }
        }
        SidecarEvent::Result { status, title, .. } => {
            let status = status.as_deref().unwrap_or("unknown");
            let title = title.as_deref().unwrap_or("");
            println!("[{now}] result {status} {title}");
        }
    }
}
