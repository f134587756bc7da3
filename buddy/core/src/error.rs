//! Error Taxonomy
//!
//! Every failure a surface can observe maps to one [`BuddyError`] variant.
//! Collaborator boundaries (generators, knowledge bases) speak `anyhow`;
//! the dispatcher and registry translate at the edge.

use std::time::Duration;

use thiserror::Error;

use crate::backend::ProducerFault;
use crate::messages::{CallerId, SessionId};

/// Errors returned by the dispatcher and the session registry
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BuddyError {
    /// The action cannot run in the current state (no documents, bad URL, bad parameters)
    #[error("precondition not met: {reason}")]
    PreconditionNotMet {
        /// What was missing or invalid
        reason: String,
    },

    /// The caller already holds the maximum number of sessions
    #[error("caller {caller} already holds {limit} open sessions")]
    CapacityExceeded {
        /// The caller that was rejected
        caller: CallerId,
        /// The configured per-caller limit
        limit: usize,
    },

    /// Unknown or already reclaimed session
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The producer went silent and the session was failed by the sweep
    #[error("producer silent for {}ms", idle.as_millis())]
    ProducerTimeout {
        /// How long the producer had been silent
        idle: Duration,
    },

    /// The generative call failed
    #[error("producer failed: {0}")]
    ProducerError(ProducerFault),

    /// The knowledge base rejected or failed an operation
    #[error("ingestion failed: {0}")]
    Ingest(String),
}

impl BuddyError {
    /// Shorthand for [`BuddyError::PreconditionNotMet`]
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::PreconditionNotMet {
            reason: reason.into(),
        }
    }

    /// Whether resubmitting the same action later may succeed without changes
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}

/// Result alias used across the core
pub type Result<T> = std::result::Result<T, BuddyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BuddyError::precondition("no study materials");
        assert_eq!(err.to_string(), "precondition not met: no study materials");

        let err = BuddyError::CapacityExceeded {
            caller: CallerId::new("tui"),
            limit: 4,
        };
        assert_eq!(err.to_string(), "caller tui already holds 4 open sessions");

        let err = BuddyError::ProducerTimeout {
            idle: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "producer silent for 1500ms");

        let err = BuddyError::ProducerError(ProducerFault::Quota("rate limited".to_string()));
        assert_eq!(err.to_string(), "producer failed: quota exceeded: rate limited");
    }

    #[test]
    fn test_only_capacity_is_retryable() {
        assert!(BuddyError::CapacityExceeded {
            caller: CallerId::default(),
            limit: 1
        }
        .is_retryable());
        assert!(!BuddyError::precondition("x").is_retryable());
        assert!(!BuddyError::NotFound(SessionId::new()).is_retryable());
    }
}
