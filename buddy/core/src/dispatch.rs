//! Dispatcher
//!
//! Turns user actions into running stream sessions. The dispatcher checks
//! preconditions, renders the prompt for the agent that handles the action,
//! opens a session through the registry and spawns its producer. It returns
//! as soon as the producer task is spawned; callers follow progress through
//! [`Dispatcher::observe`] and settle the result with [`Dispatcher::commit`]
//! or [`Dispatcher::discard`].

use std::sync::Arc;

use crate::action::{Action, ActionKind, VideoRef};
use crate::backend::{GenerationRequest, Generator};
use crate::error::{BuddyError, Result};
use crate::knowledge::{Document, IngestReport, KnowledgeBase};
use crate::messages::{CallerId, SessionId};
use crate::prompts::{self, CHAT_PERSONA, QUESTION_PERSONA, SUMMARIZER_PERSONA};
use crate::registry::SessionRegistry;
use crate::streaming::{SessionObserver, SessionState};
use crate::transcript::{TranscriptEntry, TranscriptStore};

/// The pre-built agents, one per role
#[derive(Clone)]
pub struct Agents {
    /// Answers questions about the study materials
    pub chat: Arc<dyn Generator>,
    /// Summarizes videos
    pub summarizer: Arc<dyn Generator>,
    /// Writes MCQ and long-form questions
    pub questions: Arc<dyn Generator>,
}

impl Agents {
    /// Use one generator for every role
    #[must_use]
    pub fn uniform(generator: Arc<dyn Generator>) -> Self {
        Self {
            chat: Arc::clone(&generator),
            summarizer: Arc::clone(&generator),
            questions: generator,
        }
    }

    /// Generator that handles an action kind
    #[must_use]
    pub fn for_kind(&self, kind: ActionKind) -> &Arc<dyn Generator> {
        match kind {
            ActionKind::Chat => &self.chat,
            ActionKind::Summarize => &self.summarizer,
            ActionKind::Mcq | ActionKind::LongForm => &self.questions,
        }
    }
}

/// Dispatcher settings
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Transcript entries attached to chat turns
    pub context_messages: usize,
    /// Model for chat; empty means the generator's default
    pub chat_model: String,
    /// Model for video summaries
    pub summarizer_model: String,
    /// Model for question generation
    pub question_model: String,
    /// Sampling temperature sent with every request
    pub temperature: f32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            context_messages: 6,
            chat_model: String::new(),
            summarizer_model: String::new(),
            question_model: String::new(),
            temperature: 0.7,
        }
    }
}

/// Routes user actions to agents through stream sessions
pub struct Dispatcher {
    registry: SessionRegistry,
    transcript: TranscriptStore,
    knowledge: Arc<dyn KnowledgeBase>,
    agents: Agents,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher over injected collaborators
    #[must_use]
    pub fn new(
        registry: SessionRegistry,
        transcript: TranscriptStore,
        knowledge: Arc<dyn KnowledgeBase>,
        agents: Agents,
    ) -> Self {
        Self {
            registry,
            transcript,
            knowledge,
            agents,
            config: DispatcherConfig::default(),
        }
    }

    /// Replace the dispatcher settings
    #[must_use]
    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Start an action and return its session id without waiting for output
    ///
    /// # Errors
    ///
    /// - [`BuddyError::PreconditionNotMet`] for invalid parameters, a bad
    ///   video URL, or a document-backed action with nothing ingested
    /// - [`BuddyError::CapacityExceeded`] when the caller holds too many sessions
    /// - [`BuddyError::Ingest`] when the knowledge base cannot be read
    ///
    /// No session is opened when an error is returned.
    pub async fn dispatch(&self, caller: &CallerId, action: Action) -> Result<SessionId> {
        action.validate()?;
        let kind = action.kind();

        if kind.requires_documents() && !self.has_documents().await? {
            tracing::warn!(caller = %caller, kind = %kind, "No study materials uploaded");
            return Err(BuddyError::precondition(
                "no study materials uploaded; ingest at least one PDF first",
            ));
        }

        let request = self.build_request(caller, &action)?;
        let id = self.registry.open(&request)?;
        let session = self.registry.get(id)?;

        if let Action::Chat { ref prompt } = action {
            self.transcript.append_user(prompt.as_str());
        }

        let generator = Arc::clone(self.agents.for_kind(kind));
        tracing::info!(
            session_id = %id,
            caller = %caller,
            kind = %kind,
            generator = generator.name(),
            "Action dispatched"
        );
        tokio::spawn(session.drive(generator, request));

        Ok(id)
    }

    fn build_request(&self, caller: &CallerId, action: &Action) -> Result<GenerationRequest> {
        let request = match action {
            Action::Chat { prompt } => GenerationRequest::new(ActionKind::Chat, prompt.as_str())
                .with_system(CHAT_PERSONA.system_prompt())
                .with_context(self.transcript.build_context(self.config.context_messages))
                .with_model(self.config.chat_model.as_str()),
            Action::Summarize { video_url } => {
                let video = VideoRef::parse(video_url)?;
                GenerationRequest::new(
                    ActionKind::Summarize,
                    prompts::summarize_prompt(&video.canonical_url()),
                )
                .with_system(SUMMARIZER_PERSONA.system_prompt())
                .with_model(self.config.summarizer_model.as_str())
            }
            Action::Mcq {
                count,
                difficulty,
                topics,
            } => GenerationRequest::new(
                ActionKind::Mcq,
                prompts::mcq_prompt(*count, *difficulty, topics.as_deref()),
            )
            .with_system(QUESTION_PERSONA.system_prompt())
            .with_model(self.config.question_model.as_str()),
            Action::LongForm {
                count,
                marks,
                topics,
            } => GenerationRequest::new(
                ActionKind::LongForm,
                prompts::long_form_prompt(*count, *marks, topics.as_deref()),
            )
            .with_system(QUESTION_PERSONA.system_prompt())
            .with_model(self.config.question_model.as_str()),
        };
        Ok(request
            .with_caller(caller.clone())
            .with_temperature(self.config.temperature))
    }

    /// Append a completed session's output to the transcript and close it
    ///
    /// # Errors
    ///
    /// - [`BuddyError::NotFound`] for unknown or already committed sessions
    /// - [`BuddyError::PreconditionNotMet`] for cancelled or unfinished sessions
    /// - [`BuddyError::ProducerError`] / [`BuddyError::ProducerTimeout`] for
    ///   failed sessions
    pub fn commit(&self, id: SessionId) -> Result<TranscriptEntry> {
        let session = self.registry.get(id)?;

        match session.state() {
            SessionState::Completed => {
                // closing first makes a concurrent second commit fail with NotFound
                let session = self.registry.close(id)?;
                let text = session.snapshot();
                let content = match session.kind().transcript_heading() {
                    Some(heading) => format!("{heading}\n\n{text}"),
                    None => text,
                };
                let entry = self.transcript.append_assistant(content);
                tracing::info!(session_id = %id, entry_id = %entry.id.0, "Session committed");
                Ok(entry)
            }
            SessionState::Cancelled => Err(BuddyError::precondition(
                "session was cancelled; its partial output cannot be committed",
            )),
            SessionState::Failed(kind) => Err(kind.to_error()),
            state @ (SessionState::Pending | SessionState::Streaming) => Err(
                BuddyError::precondition(format!("session is still {}", state.label())),
            ),
        }
    }

    /// Cancel a running session; returns `false` if it was already terminal
    ///
    /// # Errors
    ///
    /// Returns [`BuddyError::NotFound`] for unknown sessions.
    pub fn cancel(&self, id: SessionId) -> Result<bool> {
        self.registry.cancel(id)
    }

    /// Close a session without committing; returns its final state
    ///
    /// # Errors
    ///
    /// Returns [`BuddyError::NotFound`] for unknown sessions.
    pub fn discard(&self, id: SessionId) -> Result<SessionState> {
        self.registry.close(id).map(|session| session.state())
    }

    /// Follow a session's output
    ///
    /// # Errors
    ///
    /// Returns [`BuddyError::NotFound`] for unknown sessions.
    pub fn observe(&self, id: SessionId) -> Result<SessionObserver> {
        self.registry.observe(id)
    }

    /// Wait for a session to reach a terminal state
    ///
    /// # Errors
    ///
    /// Returns [`BuddyError::NotFound`] for unknown sessions.
    pub async fn wait(&self, id: SessionId) -> Result<SessionState> {
        let session = self.registry.get(id)?;
        Ok(session.wait_terminal().await)
    }

    /// Hand documents to the knowledge base
    ///
    /// # Errors
    ///
    /// Returns [`BuddyError::Ingest`] when the knowledge base fails outright.
    /// Individual rejected documents are listed in the report instead.
    pub async fn ingest(&self, documents: Vec<Document>) -> Result<IngestReport> {
        let count = documents.len();
        let report = self
            .knowledge
            .ingest(documents)
            .await
            .map_err(|e| BuddyError::Ingest(format!("{e:#}")))?;
        tracing::info!(
            submitted = count,
            stored = report.stored.len(),
            rejected = report.rejected.len(),
            "Documents ingested"
        );
        Ok(report)
    }

    /// Whether any study material is available
    ///
    /// # Errors
    ///
    /// Returns [`BuddyError::Ingest`] when the knowledge base cannot be read.
    pub async fn has_documents(&self) -> Result<bool> {
        self.knowledge.has_documents().await.map_err(|e| {
            tracing::error!(error = %e, "Knowledge base unavailable");
            BuddyError::Ingest(format!("{e:#}"))
        })
    }

    /// The transcript
    #[must_use]
    pub fn transcript(&self) -> &TranscriptStore {
        &self.transcript
    }

    /// The agents actions are routed to
    #[must_use]
    pub fn agents(&self) -> &Agents {
        &self.agents
    }

    /// The session registry
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Clear the transcript; returns how many entries were removed
    pub fn clear_transcript(&self) -> usize {
        self.transcript.clear()
    }
}
