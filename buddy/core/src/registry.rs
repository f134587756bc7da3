//! Session Registry
//!
//! Process-scoped table of stream sessions. The registry is the sole owner
//! of every [`StreamSession`]; consumers only hold weak
//! [`SessionObserver`]s, so removing an entry is enough to reclaim a session.
//!
//! # Architecture
//!
//! ```text
//!                     SessionRegistry
//!          ┌─────────────────────────────────────────────┐
//!          │ HashMap<SessionId, Arc<StreamSession>>      │
//!          │   - wrapped in Arc<RwLock<>>                │
//!          │   - open / close / sweep take the write lock│
//!          └──────────────┬──────────────────────────────┘
//!                         │
//!        ┌────────────────┼────────────────┐
//!        │                │                │
//!  ┌─────▼─────┐    ┌─────▼─────┐    ┌─────▼─────┐
//!  │ producer  │    │ observer  │    │  sweeper  │
//!  │   task    │    │ (Weak)    │    │ interval  │
//!  └───────────┘    └───────────┘    └───────────┘
//! ```
//!
//! # Capacity
//!
//! Each caller may hold `max_sessions_per_caller` entries. Terminal sessions
//! that have not been closed still count, so a caller must commit or
//! discard results before opening more.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::action::ActionKind;
use crate::backend::GenerationRequest;
use crate::error::{BuddyError, Result};
use crate::messages::{CallerId, SessionId};
use crate::streaming::{SessionObserver, StreamSession};

/// Registry limits and timers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Open sessions allowed per caller
    pub max_sessions_per_caller: usize,
    /// Producer silence after which a session is failed, unless its
    /// generator declares a longer allowance
    pub idle_timeout: Duration,
    /// Period of the background sweep
    pub sweep_interval: Duration,
    /// How long unobserved terminal sessions are kept
    pub terminal_retention: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_caller: 4,
            idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(1),
            terminal_retention: Duration::from_secs(300),
        }
    }
}

/// Outcome of one sweep
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions failed for inactivity
    pub expired: Vec<SessionId>,
    /// Terminal sessions removed from the table
    pub reclaimed: Vec<SessionId>,
}

impl SweepReport {
    /// Whether the sweep changed nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.reclaimed.is_empty()
    }
}

/// Point-in-time description of one session
#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    /// Session id
    pub id: SessionId,
    /// Action kind
    pub kind: ActionKind,
    /// Owning caller
    pub caller: CallerId,
    /// State label
    pub state: String,
    /// Bytes accumulated so far
    pub bytes: usize,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Point-in-time description of the registry
#[derive(Clone, Debug, Default, Serialize)]
pub struct RegistrySummary {
    /// Sessions not yet terminal
    pub active: usize,
    /// Terminal sessions still held
    pub terminal: usize,
    /// Every held session, oldest first
    pub sessions: Vec<SessionSummary>,
}

/// Table of stream sessions keyed by id
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<SessionId, Arc<StreamSession>>>>,
    config: RegistryConfig,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl SessionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Registry limits and timers
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Allocate a pending session for a request
    ///
    /// # Errors
    ///
    /// Returns [`BuddyError::CapacityExceeded`] when the caller already holds
    /// `max_sessions_per_caller` sessions.
    pub fn open(&self, request: &GenerationRequest) -> Result<SessionId> {
        let mut sessions = self.inner.write();

        let held = sessions
            .values()
            .filter(|s| *s.caller() == request.caller)
            .count();
        if held >= self.config.max_sessions_per_caller {
            tracing::warn!(
                caller = %request.caller,
                held,
                limit = self.config.max_sessions_per_caller,
                "Session capacity exceeded"
            );
            return Err(BuddyError::CapacityExceeded {
                caller: request.caller.clone(),
                limit: self.config.max_sessions_per_caller,
            });
        }

        let session = Arc::new(StreamSession::new(request.kind, request.caller.clone()));
        let id = session.id();
        sessions.insert(id, session);

        tracing::info!(
            session_id = %id,
            caller = %request.caller,
            kind = %request.kind,
            total = sessions.len(),
            "Session opened"
        );
        Ok(id)
    }

    /// Look up a session
    ///
    /// # Errors
    ///
    /// Returns [`BuddyError::NotFound`] for unknown or reclaimed ids.
    pub fn get(&self, id: SessionId) -> Result<Arc<StreamSession>> {
        self.inner
            .read()
            .get(&id)
            .cloned()
            .ok_or(BuddyError::NotFound(id))
    }

    /// Weak view of a session for a consumer
    ///
    /// # Errors
    ///
    /// Returns [`BuddyError::NotFound`] for unknown or reclaimed ids.
    pub fn observe(&self, id: SessionId) -> Result<SessionObserver> {
        self.get(id).map(|session| session.observe())
    }

    /// Cancel a session, keeping its entry
    ///
    /// Returns `false` when the session was already terminal.
    ///
    /// # Errors
    ///
    /// Returns [`BuddyError::NotFound`] for unknown or reclaimed ids.
    pub fn cancel(&self, id: SessionId) -> Result<bool> {
        self.get(id).map(|session| session.cancel())
    }

    /// Remove a session, cancelling it first if it is still running
    ///
    /// # Errors
    ///
    /// Returns [`BuddyError::NotFound`] for unknown or reclaimed ids.
    pub fn close(&self, id: SessionId) -> Result<Arc<StreamSession>> {
        let session = self
            .inner
            .write()
            .remove(&id)
            .ok_or(BuddyError::NotFound(id))?;

        if !session.is_terminal() {
            session.cancel();
        }

        tracing::info!(
            session_id = %id,
            caller = %session.caller(),
            state = %session.state(),
            "Session closed"
        );
        Ok(session)
    }

    /// Expire idle sessions and reclaim old terminal ones
    ///
    /// A non-terminal session whose producer has been silent for
    /// `idle_timeout` (or the generator's longer
    /// [`max_silence`](crate::backend::Generator::max_silence)) becomes
    /// `Failed(Timeout)`. A terminal session is
    /// reclaimed once it has no observers and has been terminal for
    /// `terminal_retention`, or unconditionally once it has been terminal for
    /// `terminal_retention + idle_timeout`.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let mut sessions = self.inner.write();

        for session in sessions.values() {
            if session.is_terminal() {
                continue;
            }
            let idle = session.idle_for();
            let limit = session.idle_limit(self.config.idle_timeout);
            if idle >= limit && session.expire(idle) {
                tracing::warn!(
                    session_id = %session.id(),
                    caller = %session.caller(),
                    idle_ms = idle.as_millis(),
                    "Producer went silent, session expired"
                );
                report.expired.push(session.id());
            }
        }

        let retention = self.config.terminal_retention;
        let abandoned_after = retention + self.config.idle_timeout;
        sessions.retain(|id, session| {
            let Some(age) = session.terminal_for() else {
                return true;
            };
            let drained = session.observer_count() == 0 && age >= retention;
            if drained || age >= abandoned_after {
                report.reclaimed.push(*id);
                false
            } else {
                true
            }
        });

        if report.is_empty() {
            tracing::trace!(held = sessions.len(), "Sweep found nothing");
        } else {
            tracing::debug!(
                expired = report.expired.len(),
                reclaimed = report.reclaimed.len(),
                held = sessions.len(),
                "Sweep complete"
            );
        }
        report
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval` until `shutdown` fires
    #[must_use]
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        let period = self.config.sweep_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = sweep_ticker(period);
            tracing::debug!(period_ms = period.as_millis(), "Sweeper started");

            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.sweep();
                    }
                }
            }

            tracing::debug!("Sweeper stopped");
        })
    }

    /// Number of sessions not yet terminal
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner
            .read()
            .values()
            .filter(|s| !s.is_terminal())
            .count()
    }

    /// Number of entries held, terminal or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the registry holds no sessions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Number of entries held by one caller
    #[must_use]
    pub fn count_for(&self, caller: &CallerId) -> usize {
        self.inner
            .read()
            .values()
            .filter(|s| s.caller() == caller)
            .count()
    }

    /// Ids of every held session
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.read().keys().copied().collect()
    }

    /// Describe every held session
    #[must_use]
    pub fn summary(&self) -> RegistrySummary {
        let sessions = self.inner.read();
        let mut summary = RegistrySummary::default();

        for session in sessions.values() {
            if session.is_terminal() {
                summary.terminal += 1;
            } else {
                summary.active += 1;
            }
            summary.sessions.push(SessionSummary {
                id: session.id(),
                kind: session.kind(),
                caller: session.caller().clone(),
                state: session.state().to_string(),
                bytes: session.reader().len(),
                created_at: session.created_at(),
            });
        }
        summary.sessions.sort_by_key(|s| s.created_at);
        summary
    }

    /// Cancel and remove every session; returns how many were held
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.inner.write().drain().collect();
        for (_, session) in &drained {
            session.cancel();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Registry cleared");
        }
        drained.len()
    }
}

/// Sweep clock; a sweep that overruns drops the ticks it missed
fn sweep_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("config", &self.config)
            .finish()
    }
}
