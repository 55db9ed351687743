//! Host-driven streaming session: the host feeds transport events, the session returns actions.
//!
//! `Idle → Connecting → Streaming → Completed`, with `Failed` on transport loss and
//! `Cancelled` on request. Terminal states are frozen: later events are discarded.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event::{InboundEvent, ProgressEvent, TerminalEvent};
use crate::protocol::StreamRequest;

/// Identifies one session in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed { retryable: bool },
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed { .. } | SessionState::Cancelled
        )
    }
}

/// One accepted round, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolRound {
    pub index: u32,
    pub sent_symbol: String,
    pub measured_symbol: String,
    /// Backend annotation for the round, if any.
    pub derived_fragment: Option<String>,
}

impl From<ProgressEvent> for ProtocolRound {
    fn from(p: ProgressEvent) -> Self {
        Self {
            index: p.round,
            sent_symbol: p.sent,
            measured_symbol: p.measured,
            derived_fragment: p.message,
        }
    }
}

/// Event that failed validation; kept in the history, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRound {
    /// Position of the event in the inbound sequence (0-based).
    pub position: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundRecord {
    Progress(ProtocolRound),
    Malformed(MalformedRound),
}

/// Frozen outcome of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResult {
    pub original_payload: String,
    pub decoded_payload: String,
    pub success: bool,
    pub rounds: Vec<ProtocolRound>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed(SessionResult),
    Failed { retryable: bool, reason: String },
    Cancelled,
}

/// Action for the host to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open the push connection with these parameters.
    Open(StreamRequest),
    /// Release the connection.
    Close,
}

pub struct ProtocolSession {
    id: SessionId,
    state: SessionState,
    history: Vec<RoundRecord>,
    events_seen: usize,
    outcome: Option<SessionOutcome>,
}

impl ProtocolSession {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            state: SessionState::Idle,
            history: Vec::new(),
            events_seen: 0,
            outcome: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Full history, including malformed entries.
    pub fn history(&self) -> &[RoundRecord] {
        &self.history
    }

    /// Accepted rounds only.
    pub fn rounds(&self) -> impl Iterator<Item = &ProtocolRound> {
        self.history.iter().filter_map(|r| match r {
            RoundRecord::Progress(p) => Some(p),
            RoundRecord::Malformed(_) => None,
        })
    }

    pub fn round_count(&self) -> usize {
        self.rounds().count()
    }

    /// Terminal outcome, once reached.
    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    pub fn into_outcome(self) -> Option<SessionOutcome> {
        self.outcome
    }

    /// Idle → Connecting. Returns the open action for the host.
    pub fn start(&mut self, params: StreamRequest) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::AlreadyStarted(self.state));
        }
        info!(session = %self.id, "opening stream");
        self.state = SessionState::Connecting;
        Ok(vec![SessionAction::Open(params)])
    }

    /// Process one raw inbound message.
    pub fn on_event(&mut self, raw: &str) -> Vec<SessionAction> {
        match self.state {
            SessionState::Connecting => self.state = SessionState::Streaming,
            SessionState::Streaming => {}
            state => {
                debug!(session = %self.id, ?state, "discarding event");
                return Vec::new();
            }
        }
        let position = self.events_seen;
        self.events_seen += 1;

        match InboundEvent::decode(raw) {
            InboundEvent::Progress(p) => {
                if let Some(last) = self.rounds().last() {
                    if p.round != last.index.saturating_add(1) {
                        warn!(session = %self.id, previous = last.index, round = p.round, "non-sequential round index");
                    }
                }
                debug!(session = %self.id, round = p.round, "round received");
                self.history.push(RoundRecord::Progress(p.into()));
                Vec::new()
            }
            InboundEvent::Malformed { reason } => {
                warn!(session = %self.id, position, %reason, "malformed event");
                self.history
                    .push(RoundRecord::Malformed(MalformedRound { position, reason }));
                Vec::new()
            }
            InboundEvent::Terminal(t) => self.complete(t),
        }
    }

    fn complete(&mut self, terminal: TerminalEvent) -> Vec<SessionAction> {
        let result = SessionResult {
            original_payload: terminal.original_text,
            decoded_payload: terminal.decoded_text,
            success: terminal.success,
            rounds: self.rounds().cloned().collect(),
        };
        info!(
            session = %self.id,
            rounds = result.rounds.len(),
            success = result.success,
            "stream completed"
        );
        self.state = SessionState::Completed;
        self.outcome = Some(SessionOutcome::Completed(result));
        vec![SessionAction::Close]
    }

    /// Connection lost or could not be opened.
    pub fn on_transport_failure(&mut self, retryable: bool, reason: &str) -> Vec<SessionAction> {
        if !matches!(self.state, SessionState::Connecting | SessionState::Streaming) {
            debug!(session = %self.id, state = ?self.state, "ignoring transport failure");
            return Vec::new();
        }
        warn!(session = %self.id, retryable, %reason, "stream failed");
        self.state = SessionState::Failed { retryable };
        self.outcome = Some(SessionOutcome::Failed {
            retryable,
            reason: reason.to_string(),
        });
        vec![SessionAction::Close]
    }

    /// Connecting/Streaming → Cancelled.
    pub fn cancel(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        if !matches!(self.state, SessionState::Connecting | SessionState::Streaming) {
            return Err(SessionError::NotCancellable(self.state));
        }
        info!(session = %self.id, rounds = self.round_count(), "stream cancelled");
        self.state = SessionState::Cancelled;
        self.outcome = Some(SessionOutcome::Cancelled);
        Ok(vec![SessionAction::Close])
    }
}

impl Default for ProtocolSession {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session already started (state {0:?})")]
    AlreadyStarted(SessionState),
    #[error("session cannot be cancelled in state {0:?}")]
    NotCancellable(SessionState),
}
