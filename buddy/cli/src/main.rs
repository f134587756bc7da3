//! Exam Buddy command-line surface
//!
//! One-shot subcommands stream a single response to stdout; with no
//! subcommand the interactive REPL starts.
//!
//! # Usage
//!
//! ```bash
//! buddy ingest notes.pdf
//! buddy mcq --count 10 --difficulty hard --topics "cell biology"
//! buddy summarize https://youtu.be/dQw4w9WgXcQ
//! buddy --offline          # REPL with the offline echo agent
//! ```

mod surface;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use buddy_core::{
    load_config, load_config_from_path, Action, Agents, BuddyConfig, CallerId, ConfigOverrides,
    DeliveryMode, Difficulty, DirectoryKnowledgeBase, Dispatcher, Generator, KnowledgeBase,
    Marks, OllamaGenerator, ScriptedGenerator, SessionRegistry, SessionState, TranscriptStore,
};

use surface::Surface;

/// Exam Buddy - study assistant over your own materials
#[derive(Parser, Debug)]
#[command(name = "buddy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long, env = "BUDDY_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Use the offline echo agent instead of a model server
    #[arg(long, global = true)]
    offline: bool,

    /// Deliver each response in one piece instead of streaming
    #[arg(long, global = true)]
    no_stream: bool,

    /// Caller identity for session limits
    #[arg(long, default_value = "local", global = true)]
    caller: String,

    /// Maximum open sessions per caller
    #[arg(long, value_name = "N", global = true)]
    max_sessions: Option<usize>,

    /// Directory holding uploaded study materials
    #[arg(long, value_name = "DIR", global = true)]
    documents_dir: Option<PathBuf>,

    /// Model server host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Model server port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Model used by every agent
    #[arg(short = 'm', long, global = true)]
    model: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store PDF study materials
    Ingest {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Ask a question about your materials
    Chat {
        /// The question
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
    /// Summarize a YouTube video
    Summarize {
        /// Video URL
        url: String,
    },
    /// Generate multiple-choice questions
    Mcq {
        /// Number of questions (1-20)
        #[arg(short = 'n', long, default_value_t = 5)]
        count: u8,
        /// easy, medium or hard
        #[arg(short, long, default_value_t = Difficulty::Medium)]
        difficulty: Difficulty,
        /// Topics to focus on
        #[arg(short, long)]
        topics: Option<String>,
    },
    /// Generate long-form questions with answers
    Long {
        /// Number of questions (1-5)
        #[arg(short = 'n', long, default_value_t = 2)]
        count: u8,
        /// Marks per question (5, 10, 15 or 20)
        #[arg(long, default_value_t = Marks::default())]
        marks: Marks,
        /// Topics to focus on
        #[arg(short, long)]
        topics: Option<String>,
    },
    /// Report configuration, agent health and stored materials
    Status,
    /// Start the interactive session (default)
    Repl,
}

impl Commands {
    fn into_action(self) -> Option<Action> {
        match self {
            Self::Chat { prompt } => Some(Action::chat(prompt.join(" "))),
            Self::Summarize { url } => Some(Action::summarize(url)),
            Self::Mcq {
                count,
                difficulty,
                topics,
            } => Some(with_topics(Action::mcq(count, difficulty), topics)),
            Self::Long {
                count,
                marks,
                topics,
            } => Some(with_topics(Action::long_form(count, marks), topics)),
            Self::Ingest { .. } | Self::Status | Self::Repl => None,
        }
    }
}

fn with_topics(action: Action, topics: Option<String>) -> Action {
    match topics {
        Some(topics) => action.with_topics(topics),
        None => action,
    }
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            max_sessions_per_caller: self.max_sessions,
            documents_dir: self.documents_dir.clone(),
            host: self.host.clone(),
            port: self.port,
            model: self.model.clone(),
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("buddy={level},buddy_core={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

/// Build one agent per role
fn build_agents(config: &BuddyConfig, offline: bool, no_stream: bool) -> Result<Agents> {
    let mode = if no_stream {
        DeliveryMode::SingleShot
    } else {
        DeliveryMode::Streaming
    };

    if offline {
        let echo = ScriptedGenerator::echo()
            .with_name("offline")
            .with_delivery_mode(mode);
        return Ok(Agents::uniform(Arc::new(echo)));
    }

    let base = OllamaGenerator::from_settings(&config.backend)
        .context("Failed to build model server client")?
        .with_delivery_mode(mode);
    let agent = |model: &str| -> Arc<dyn Generator> {
        Arc::new(base.clone().with_default_model(model))
    };

    Ok(Agents {
        chat: agent(&config.backend.chat_model),
        summarizer: agent(&config.backend.summarizer_model),
        questions: agent(&config.backend.question_model),
    })
}

async fn status_report(
    config: &BuddyConfig,
    knowledge: &DirectoryKnowledgeBase,
    dispatcher: &Dispatcher,
) -> Result<serde_json::Value> {
    let agents = dispatcher.agents();
    let has_documents = dispatcher.has_documents().await?;
    let documents: Vec<_> = knowledge
        .documents()
        .into_iter()
        .map(|(name, info)| {
            json!({
                "name": name,
                "bytes": info.size,
                "ingested_at": info.ingested_at.to_rfc3339(),
            })
        })
        .collect();

    Ok(json!({
        "config_source": config.source().to_string(),
        "config_file": config.config_file_path.as_ref().map(|p| p.display().to_string()),
        "documents_dir": knowledge.root().display().to_string(),
        "has_documents": has_documents,
        "documents": documents,
        "max_sessions_per_caller": config.registry.max_sessions_per_caller,
        "agents": {
            "chat": { "name": agents.chat.name(), "healthy": agents.chat.health_check().await },
            "summarizer": { "name": agents.summarizer.name(), "healthy": agents.summarizer.health_check().await },
            "questions": { "name": agents.questions.name(), "healthy": agents.questions.health_check().await },
        },
        "registry": dispatcher.registry().summary(),
    }))
}

async fn print_status(
    config: &BuddyConfig,
    knowledge: &DirectoryKnowledgeBase,
    dispatcher: &Dispatcher,
) -> Result<()> {
    let report = status_report(config, knowledge, dispatcher).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut config = match &args.config {
        Some(path) => load_config_from_path(Some(path.clone())),
        None => load_config(),
    }
    .context("Failed to load configuration")?;
    args.overrides()
        .apply(&mut config)
        .context("Invalid command-line override")?;

    info!(
        source = %config.source(),
        documents_dir = %config.documents_dir.display(),
        offline = args.offline,
        "Exam Buddy starting"
    );

    let knowledge = Arc::new(
        DirectoryKnowledgeBase::open(&config.documents_dir)
            .await
            .with_context(|| format!("Cannot open {}", config.documents_dir.display()))?,
    );
    let agents = build_agents(&config, args.offline, args.no_stream)?;
    let registry = SessionRegistry::new(config.registry.clone());
    let dispatcher = Dispatcher::new(
        registry.clone(),
        TranscriptStore::new(),
        Arc::clone(&knowledge) as Arc<dyn KnowledgeBase>,
        agents,
    )
    .with_config(config.dispatcher_config());

    let shutdown = CancellationToken::new();
    let sweeper = registry.spawn_sweeper(shutdown.clone());

    let mut surface = Surface::new(dispatcher, CallerId::new(&args.caller), tokio::io::stdout());
    let outcome = match args.command {
        Some(Commands::Ingest { files }) => surface.ingest(&files).await.map(|stored| {
            if stored == 0 {
                warn!("No documents were stored");
            }
        }),
        Some(Commands::Status) => print_status(&config, &knowledge, surface.dispatcher()).await,
        None | Some(Commands::Repl) => surface.repl().await,
        Some(command) => match command.into_action() {
            Some(action) => match surface.run_action(action).await {
                Ok(SessionState::Completed) => Ok(()),
                Ok(state) => Err(anyhow::anyhow!("response ended {}", state.label())),
                Err(e) => Err(e),
            },
            None => Ok(()),
        },
    };

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Sweeper task ended abnormally");
    }
    info!("Exam Buddy stopped");
    outcome
}
