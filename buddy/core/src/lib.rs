//! Buddy Core - Streaming Session Aggregation for Exam Buddy
//!
//! This crate is the back end of the Exam Buddy study assistant. It forwards
//! user actions (chat questions, video URLs, question-generation parameters)
//! to pre-built model agents and assembles their streamed responses. It has
//! no knowledge of how it is presented; the `buddy` CLI is one surface.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Surface (CLI)                           │
//! │        Action ──►                       ◄── snapshots / state    │
//! └────────┬─────────────────────────────────────────▲───────────────┘
//!          │                                         │
//! ┌────────▼─────────────────────────────────────────┴───────────────┐
//! │                          BUDDY CORE                              │
//! │  ┌────────────┐   open   ┌─────────────────┐   sweep  ┌───────┐  │
//! │  │ Dispatcher ├─────────►│ SessionRegistry │◄─────────┤ timer │  │
//! │  └──┬───┬─────┘          └────────┬────────┘          └───────┘  │
//! │     │   │ commit                  │ Arc                          │
//! │     │   ▼                 ┌───────▼────────┐  events ┌─────────┐ │
//! │     │ ┌──────────────┐    │ StreamSession  │◄────────┤Generator│ │
//! │     │ │TranscriptStore│   │  ChunkBuffer   │         └─────────┘ │
//! │     │ └──────────────┘    └────────────────┘                     │
//! │     ▼                                                            │
//! │  ┌──────────────┐                                                │
//! │  │KnowledgeBase │                                                │
//! │  └──────────────┘                                                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Dispatcher`]: validates actions, opens sessions, commits results
//! - [`SessionRegistry`]: owns every [`StreamSession`], enforces per-caller limits
//! - [`StreamSession`]: one generative call and its [`ChunkBuffer`]
//! - [`TranscriptStore`]: ordered log of the interactive session
//! - [`Generator`]: the model-agent collaborator
//! - [`KnowledgeBase`]: the study-materials collaborator
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use buddy_core::{
//!     Action, Agents, CallerId, Difficulty, DirectoryKnowledgeBase, Dispatcher,
//!     OllamaGenerator, SessionRegistry, TranscriptStore,
//! };
//!
//! let knowledge = DirectoryKnowledgeBase::open("uploaded_docs").await?;
//! let generator = Arc::new(OllamaGenerator::new("localhost", 11434)?);
//! let dispatcher = Dispatcher::new(
//!     SessionRegistry::default(),
//!     TranscriptStore::new(),
//!     Arc::new(knowledge),
//!     Agents::uniform(generator),
//! );
//!
//! let id = dispatcher
//!     .dispatch(&CallerId::default(), Action::mcq(5, Difficulty::Medium))
//!     .await?;
//! let mut observer = dispatcher.observe(id)?;
//! while !observer.is_terminal() && observer.changed().await {
//!     println!("{}", observer.snapshot());
//! }
//! dispatcher.commit(id)?;
//! ```
//!
//! # Module Overview
//!
//! - [`action`]: user actions and their parameters
//! - [`backend`]: generator trait and implementations (Ollama, scripted)
//! - [`config`]: TOML + environment configuration
//! - [`dispatch`]: the dispatcher
//! - [`error`]: error taxonomy
//! - [`knowledge`]: knowledge-base trait and upload directory store
//! - [`messages`]: identifiers and roles
//! - [`prompts`]: agent personas and prompt templates
//! - [`registry`]: the session registry and sweeper
//! - [`streaming`]: chunk buffers and stream sessions
//! - [`transcript`]: the transcript store

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod knowledge;
pub mod messages;
pub mod prompts;
pub mod registry;
pub mod streaming;
pub mod transcript;

// Re-exports for convenience
pub use action::{Action, ActionKind, Difficulty, Marks, VideoRef};
pub use backend::{
    DeliveryMode, GenerationRequest, Generator, OllamaGenerator, ProducerEvent, ProducerFault,
    ScriptedGenerator,
};
pub use config::{load_config, load_config_from_path, BuddyConfig, ConfigError, ConfigOverrides};
pub use dispatch::{Agents, Dispatcher, DispatcherConfig};
pub use error::{BuddyError, Result};
pub use knowledge::{DirectoryKnowledgeBase, Document, DocumentInfo, IngestReport, KnowledgeBase};
pub use messages::{CallerId, EntryId, MessageRole, SessionId};
pub use registry::{RegistryConfig, RegistrySummary, SessionRegistry, SweepReport};
pub use streaming::{
    BufferReader, ChunkBuffer, FailureKind, SessionObserver, SessionState, StreamSession,
};
pub use transcript::{TranscriptEntry, TranscriptStore};
