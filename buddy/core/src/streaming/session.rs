//! Stream Session
//!
//! One in-flight generative call. A session owns the writer half of a
//! [`ChunkBuffer`], publishes its lifecycle on a watch channel and exposes a
//! cancellation token that the producer loop honors within one fragment.
//!
//! ```text
//! Pending ──► Streaming ──► Completed
//!    │            ├───────► Cancelled
//!    │            └───────► Failed(kind)
//!    ├──────────────────────► Cancelled
//!    └──────────────────────► Failed(kind)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::chunk_buffer::{BufferReader, ChunkBuffer};
use crate::action::ActionKind;
use crate::backend::{DeliveryMode, GenerationRequest, Generator, ProducerEvent, ProducerFault};
use crate::error::BuddyError;
use crate::messages::{CallerId, SessionId};

/// Why a session failed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The generator reported or caused an error
    Producer(ProducerFault),
    /// The producer went silent and the sweep failed the session
    Timeout {
        /// Silence observed at expiry
        idle: Duration,
    },
}

impl FailureKind {
    /// The error a caller receives for this failure
    #[must_use]
    pub fn to_error(&self) -> BuddyError {
        match self {
            Self::Producer(fault) => BuddyError::ProducerError(fault.clone()),
            Self::Timeout { idle } => BuddyError::ProducerTimeout { idle: *idle },
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Producer(fault) => write!(f, "{fault}"),
            Self::Timeout { idle } => write!(f, "timed out after {}ms idle", idle.as_millis()),
        }
    }
}

/// Lifecycle state of a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, request not yet sent
    Pending,
    /// Request sent, fragments arriving
    Streaming,
    /// End of stream received; snapshot is final
    Completed,
    /// Cancelled by a caller; partial snapshot retained
    Cancelled,
    /// Producer error or idle timeout
    Failed(FailureKind),
}

impl SessionState {
    /// Terminal states never change again
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed(_))
    }

    /// Whether the snapshot of a session in this state is partial
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed(_))
    }

    /// Short lowercase name
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }

    /// Whether `next` may follow this state
    #[must_use]
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Streaming | Self::Cancelled | Self::Failed(_)),
            Self::Streaming => next.is_terminal(),
            Self::Completed | Self::Cancelled | Self::Failed(_) => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "failed ({kind})"),
            other => f.write_str(other.label()),
        }
    }
}

/// One in-flight generative call
pub struct StreamSession {
    id: SessionId,
    kind: ActionKind,
    caller: CallerId,
    created_at: DateTime<Utc>,
    state: watch::Sender<SessionState>,
    reader: BufferReader,
    /// Taken by the producer loop; `None` once driving has started
    writer: Mutex<Option<ChunkBuffer>>,
    cancel: CancellationToken,
    last_activity: Mutex<Instant>,
    /// Silence the driving generator declared it may leave
    silence_allowance: Mutex<Option<Duration>>,
    terminal_at: Mutex<Option<Instant>>,
    observers: Arc<AtomicUsize>,
}

impl StreamSession {
    /// Create a pending session
    #[must_use]
    pub fn new(kind: ActionKind, caller: CallerId) -> Self {
        let buffer = ChunkBuffer::new();
        let reader = buffer.reader();
        let (state, _rx) = watch::channel(SessionState::Pending);
        Self {
            id: SessionId::new(),
            kind,
            caller,
            created_at: Utc::now(),
            state,
            reader,
            writer: Mutex::new(Some(buffer)),
            cancel: CancellationToken::new(),
            last_activity: Mutex::new(Instant::now()),
            silence_allowance: Mutex::new(None),
            terminal_at: Mutex::new(None),
            observers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Action kind that opened the session
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Caller that opened the session
    #[must_use]
    pub fn caller(&self) -> &CallerId {
        &self.caller
    }

    /// Creation time
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Whether the session reached a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Current buffer contents
    #[must_use]
    pub fn snapshot(&self) -> String {
        self.reader.snapshot()
    }

    /// A new buffer reader
    #[must_use]
    pub fn reader(&self) -> BufferReader {
        self.reader.clone()
    }

    /// Time since the producer last made progress
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Silence tolerated before the sweep fails this session
    ///
    /// The larger of `default` and whatever the driving generator declared.
    #[must_use]
    pub fn idle_limit(&self, default: Duration) -> Duration {
        self.silence_allowance
            .lock()
            .map_or(default, |allowance| allowance.max(default))
    }

    /// Time since the session became terminal
    #[must_use]
    pub fn terminal_for(&self) -> Option<Duration> {
        self.terminal_at.lock().map(|at| at.elapsed())
    }

    /// Number of live observers
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.load(Ordering::SeqCst)
    }

    /// Cancel the session
    ///
    /// Returns `false` when the session was already terminal. The snapshot
    /// is frozen at the moment of the transition.
    pub fn cancel(&self) -> bool {
        let cancelled = self.transition(SessionState::Cancelled);
        if cancelled {
            self.cancel.cancel();
        }
        cancelled
    }

    /// Fail a silent session with [`FailureKind::Timeout`]
    ///
    /// Returns `false` when the session was already terminal.
    pub fn expire(&self, idle: Duration) -> bool {
        let expired = self.transition(SessionState::Failed(FailureKind::Timeout { idle }));
        if expired {
            self.cancel.cancel();
        }
        expired
    }

    /// Wait until the session is terminal and return that state
    pub async fn wait_terminal(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        let result = match rx.wait_for(SessionState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        result
    }

    /// Weak handle for a consumer
    #[must_use]
    pub fn observe(self: &Arc<Self>) -> SessionObserver {
        self.observers.fetch_add(1, Ordering::SeqCst);
        SessionObserver {
            session: Arc::downgrade(self),
            id: self.id,
            kind: self.kind,
            reader: self.reader.clone(),
            state: self.state.subscribe(),
            buffer_closed: false,
            state_closed: false,
            _guard: ObserverGuard(Arc::clone(&self.observers)),
        }
    }

    /// Run the producer loop to a terminal state
    ///
    /// Spawned once per session by the dispatcher. Later calls return
    /// immediately because the writer has already been taken.
    pub async fn drive(self: Arc<Self>, generator: Arc<dyn Generator>, request: GenerationRequest) {
        let writer = self.writer.lock().take();
        let Some(writer) = writer else {
            tracing::warn!(session_id = %self.id, "Session already driven");
            return;
        };

        *self.silence_allowance.lock() = generator.max_silence();
        if self.cancel.is_cancelled() || !self.transition(SessionState::Streaming) {
            return;
        }
        self.touch();

        let mode = generator.delivery_mode();
        tracing::debug!(
            session_id = %self.id,
            generator = generator.name(),
            mode = %mode,
            "Sending request"
        );

        let mut rx = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            result = generator.generate(&request) => match result {
                Ok(rx) => rx,
                Err(e) => {
                    self.fail(ProducerFault::from_anyhow(&e));
                    return;
                }
            },
        };

        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                event = rx.recv() => event,
            };
            self.touch();

            match (event, mode) {
                (Some(ProducerEvent::Fragment(fragment)), DeliveryMode::Streaming) => {
                    if !self.append_if_live(&writer, &fragment) {
                        break;
                    }
                }
                (Some(ProducerEvent::End), DeliveryMode::Streaming) => {
                    self.transition(SessionState::Completed);
                    break;
                }
                (Some(ProducerEvent::Complete(text)), DeliveryMode::SingleShot) => {
                    if self.append_if_live(&writer, &text) {
                        self.transition(SessionState::Completed);
                    }
                    break;
                }
                (Some(ProducerEvent::Error(fault)), _) => {
                    self.fail(fault);
                    break;
                }
                (Some(other), mode) => {
                    self.fail(ProducerFault::Malformed(format!(
                        "{mode} generator sent {other:?}"
                    )));
                    break;
                }
                (None, _) => {
                    self.fail(ProducerFault::Disconnected);
                    break;
                }
            }
        }
    }

    fn fail(&self, fault: ProducerFault) -> bool {
        self.transition(SessionState::Failed(FailureKind::Producer(fault)))
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Append under the state lock so no fragment lands after a terminal transition
    fn append_if_live(&self, writer: &ChunkBuffer, fragment: &str) -> bool {
        let mut live = false;
        self.state.send_if_modified(|state| {
            live = !state.is_terminal();
            if live {
                writer.append(fragment);
            }
            false
        });
        live
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut from = None;
        let changed = self.state.send_if_modified(|current| {
            if current.can_transition_to(&next) {
                from = Some(current.label());
                *current = next.clone();
                true
            } else {
                false
            }
        });

        if !changed {
            return false;
        }
        if next.is_terminal() {
            *self.terminal_at.lock() = Some(Instant::now());
        }

        let from = from.unwrap_or("unknown");
        match next {
            SessionState::Failed(ref kind) => tracing::warn!(
                session_id = %self.id,
                caller = %self.caller,
                from,
                reason = %kind,
                "Session failed"
            ),
            SessionState::Streaming => tracing::debug!(
                session_id = %self.id,
                from,
                to = next.label(),
                "Session state changed"
            ),
            _ => tracing::info!(
                session_id = %self.id,
                caller = %self.caller,
                from,
                to = next.label(),
                bytes = self.reader.len(),
                "Session state changed"
            ),
        }
        true
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("caller", &self.caller)
            .field("state", &self.state())
            .field("bytes", &self.reader.len())
            .finish_non_exhaustive()
    }
}

struct ObserverGuard(Arc<AtomicUsize>);

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A consumer's view of a session
///
/// Holds the session weakly. The buffer and last state stay readable after
/// the registry reclaims the session.
pub struct SessionObserver {
    session: Weak<StreamSession>,
    id: SessionId,
    kind: ActionKind,
    reader: BufferReader,
    state: watch::Receiver<SessionState>,
    buffer_closed: bool,
    state_closed: bool,
    _guard: ObserverGuard,
}

impl SessionObserver {
    /// Observed session id
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Action kind of the observed session
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Current buffer contents
    #[must_use]
    pub fn snapshot(&self) -> String {
        self.reader.snapshot()
    }

    /// Last published state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Whether the session reached a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Whether the snapshot is a partial result
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.state.borrow().is_incomplete()
    }

    /// Whether the registry still holds the session
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.session.strong_count() > 0
    }

    /// Cancel the observed session if it is still held
    pub fn cancel(&self) -> bool {
        self.session.upgrade().is_some_and(|session| session.cancel())
    }

    /// Wait for a new fragment or state change
    ///
    /// Returns `false` once the buffer is closed and the session has been
    /// dropped, so nothing can change any more.
    pub async fn changed(&mut self) -> bool {
        loop {
            if self.buffer_closed && self.state_closed {
                return false;
            }
            tokio::select! {
                biased;
                state = self.state.changed(), if !self.state_closed => match state {
                    Ok(()) => return true,
                    Err(_) => self.state_closed = true,
                },
                more = self.reader.changed(), if !self.buffer_closed => {
                    if more {
                        return true;
                    }
                    self.buffer_closed = true;
                }
            }
        }
    }
}

impl fmt::Debug for SessionObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionObserver")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
