//! Generator Traits
//!
//! The contract between a stream session and whatever produces its text.
//! A generator declares up front how it delivers output, and every
//! implementation reports through the same tagged [`ProducerEvent`] type,
//! so sessions never have to guess whether a response is streamed.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::action::ActionKind;
use crate::messages::CallerId;

/// How a generator delivers its output
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Zero or more `Fragment`s followed by `End` (or `Error`)
    Streaming,
    /// Exactly one `Complete` (or `Error`)
    SingleShot,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Streaming => "streaming",
            Self::SingleShot => "single-shot",
        })
    }
}

/// Why a producer failed
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProducerFault {
    /// Transport-level failure
    #[error("network error: {0}")]
    Network(String),
    /// The provider refused the request for quota or rate reasons
    #[error("quota exceeded: {0}")]
    Quota(String),
    /// The provider sent something the producer could not interpret
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The event channel closed without a terminal event
    #[error("stream disconnected unexpectedly")]
    Disconnected,
    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl ProducerFault {
    /// Recover a fault from an `anyhow` error returned by [`Generator::generate`]
    ///
    /// Generators that bail with a `ProducerFault` keep their classification;
    /// any other error becomes [`ProducerFault::Other`].
    #[must_use]
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<Self>() {
            Some(fault) => fault.clone(),
            None => Self::Other(format!("{error:#}")),
        }
    }
}

/// Events emitted by a generator
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProducerEvent {
    /// The whole response at once (single-shot delivery)
    Complete(String),
    /// The next fragment of a streamed response
    Fragment(String),
    /// End of a streamed response
    End,
    /// The call failed
    Error(ProducerFault),
}

impl ProducerEvent {
    /// Whether this event ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Fragment(_))
    }
}

/// An outbound request for one generative call
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    /// Which action produced this request
    pub kind: ActionKind,
    /// Who submitted it
    pub caller: CallerId,
    /// The rendered prompt
    pub prompt: String,
    /// Agent persona (optional)
    pub system: Option<String>,
    /// Prior conversation (optional)
    pub context: Option<String>,
    /// Model to use; empty means the generator's default
    pub model: String,
    /// Temperature (0.0-1.0)
    pub temperature: f32,
}

impl GenerationRequest {
    /// Create a request for an action kind and prompt
    pub fn new(kind: ActionKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            caller: CallerId::default(),
            prompt: prompt.into(),
            system: None,
            context: None,
            model: String::new(),
            temperature: 0.7,
        }
    }

    /// Set the caller
    #[must_use]
    pub fn with_caller(mut self, caller: CallerId) -> Self {
        self.caller = caller;
        self
    }

    /// Set the system persona
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set conversation context; blank context is dropped
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        self.context = if context.trim().is_empty() {
            None
        } else {
            Some(context)
        };
        self
    }

    /// Set the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    /// Context followed by the prompt; the persona is sent separately
    #[must_use]
    pub fn prompt_with_context(&self) -> String {
        let mut full = String::new();
        if let Some(ref context) = self.context {
            full.push_str(context);
            full.push('\n');
        }
        full.push_str(&self.prompt);
        full
    }
}

/// A pre-built agent that turns a request into text
///
/// Implement this trait to plug in a model provider. `generate` returns once
/// the request is accepted; output then arrives on the returned channel in
/// the shape promised by [`Generator::delivery_mode`]. Implementations should
/// stop producing when the receiver is dropped, which is how cancellation
/// reaches them.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generator name for logs (e.g., "Ollama")
    fn name(&self) -> &str;

    /// How output is delivered
    fn delivery_mode(&self) -> DeliveryMode;

    /// Longest gap between events this generator may leave
    ///
    /// Single-shot generators are silent until their one event arrives. A
    /// value here widens the registry's idle timeout for sessions this
    /// generator drives; `None` keeps the registry default.
    fn max_silence(&self) -> Option<Duration> {
        None
    }

    /// Check if the backing service is reachable
    async fn health_check(&self) -> bool;

    /// Start a generative call
    ///
    /// An `Err` means the request was never accepted. Returning a
    /// [`ProducerFault`] inside the `anyhow::Error` preserves its
    /// classification.
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> anyhow::Result<mpsc::Receiver<ProducerEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = GenerationRequest::new(ActionKind::Chat, "What is osmosis?")
            .with_caller(CallerId::new("repl"))
            .with_system("You are a tutor")
            .with_model("llama3.2")
            .with_temperature(1.7);

        assert_eq!(request.kind, ActionKind::Chat);
        assert_eq!(request.caller.as_str(), "repl");
        assert_eq!(request.model, "llama3.2");
        assert!((request.temperature - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_blank_context_dropped() {
        let request = GenerationRequest::new(ActionKind::Chat, "q").with_context("  \n");
        assert!(request.context.is_none());
    }

    #[test]
    fn test_prompt_with_context_order() {
        let request = GenerationRequest::new(ActionKind::Chat, "Question")
            .with_system("Persona")
            .with_context("User: earlier\n\n");
        assert_eq!(request.prompt_with_context(), "User: earlier\n\n\nQuestion");

        let bare = GenerationRequest::new(ActionKind::Chat, "Question").with_system("Persona");
        assert_eq!(bare.prompt_with_context(), "Question");
    }

    #[test]
    fn test_fault_recovered_from_anyhow() {
        let err = anyhow::Error::new(ProducerFault::Quota("429".to_string()));
        assert_eq!(
            ProducerFault::from_anyhow(&err),
            ProducerFault::Quota("429".to_string())
        );

        let err = anyhow::anyhow!("connection refused");
        assert_eq!(
            ProducerFault::from_anyhow(&err),
            ProducerFault::Other("connection refused".to_string())
        );
    }

    #[test]
    fn test_event_terminality() {
        assert!(!ProducerEvent::Fragment("x".to_string()).is_terminal());
        assert!(ProducerEvent::End.is_terminal());
        assert!(ProducerEvent::Complete(String::new()).is_terminal());
        assert!(ProducerEvent::Error(ProducerFault::Disconnected).is_terminal());
    }
}
