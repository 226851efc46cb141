use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Session State ────────────────────────────────────────────────

/// Lifecycle state of a session, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Constructed, not yet started.
    Idle,
    /// Workers active, cancellation not requested.
    Running,
    /// Cancellation requested; workers may still be draining.
    Stopping,
    /// Terminal. All workers have exited or none were started.
    Stopped,
}

impl SessionState {
    /// Running and Stopping sessions hold their id in the registry.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session left the Running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit stop request (including daemon shutdown).
    Manual,
    /// The expiry timer fired first.
    Expired,
    /// Started with an empty target list; never ran.
    NoTargets,
}

// ─── Targets ──────────────────────────────────────────────────────

/// One egress path a worker is bound to.
///
/// `address` may carry credentials and is never logged; `label` is the
/// display-safe form used in events and tracing fields.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDescriptor {
    #[serde(skip_serializing)]
    pub address: String,
    pub label: String,
}

impl TargetDescriptor {
    /// Build a descriptor whose label is the address with userinfo removed.
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let label = redact_address(&address);
        Self { address, label }
    }

    pub fn with_label(address: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            label: label.into(),
        }
    }
}

impl fmt::Debug for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetDescriptor")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Strip `user:password@` userinfo from an address, keeping any scheme.
///
/// `http://u:p@10.0.0.1:8080` becomes `http://10.0.0.1:8080`;
/// `u:p@host:1` becomes `host:1`.
pub fn redact_address(address: &str) -> String {
    let (scheme, rest) = match address.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, address),
    };
    let host = rest.rsplit_once('@').map_or(rest, |(_, host)| host);
    match scheme {
        Some(scheme) => format!("{scheme}://{host}"),
        None => host.to_owned(),
    }
}

// ─── Dispatch Outcome ─────────────────────────────────────────────

/// Classified result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Success { status: Option<u16> },
    Timeout,
    ConnectionError { reason: String },
    ProtocolError { code: u16 },
    Unexpected { detail: String },
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

// ─── Events ───────────────────────────────────────────────────────

/// Coarse outcome class of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Error,
    Info,
}

/// Classification tag carried by every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Detail {
    Delivered { status: Option<u16> },
    Timeout,
    ConnectionError,
    ProtocolError { code: u16 },
    Unexpected,
    AutoExpired,
    StoppedManually,
    NoTargets,
}

impl Detail {
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Delivered { .. } => Outcome::Success,
            Self::Timeout
            | Self::ConnectionError
            | Self::ProtocolError { .. }
            | Self::Unexpected
            | Self::NoTargets => Outcome::Error,
            Self::AutoExpired | Self::StoppedManually => Outcome::Info,
        }
    }

    /// Terminal details mark the Running → Stopping transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AutoExpired | Self::StoppedManually)
    }
}

/// Target reference used by events that are not tied to a worker.
pub const NO_TARGET: &str = "none";

/// Everything about an event except its sequence and timestamp, which the
/// recorder assigns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub detail: Detail,
    pub message: String,
    pub target: String,
}

impl EventDraft {
    pub fn from_dispatch(outcome: &DispatchOutcome, target: &TargetDescriptor) -> Self {
        let (detail, message) = match outcome {
            DispatchOutcome::Success { status: Some(code) } => (
                Detail::Delivered { status: Some(*code) },
                format!("delivered (status {code})"),
            ),
            DispatchOutcome::Success { status: None } => {
                (Detail::Delivered { status: None }, "delivered".to_owned())
            }
            DispatchOutcome::Timeout => (Detail::Timeout, "request timed out".to_owned()),
            DispatchOutcome::ConnectionError { reason } => (
                Detail::ConnectionError,
                format!("connection failed: {reason}"),
            ),
            DispatchOutcome::ProtocolError { code } => (
                Detail::ProtocolError { code: *code },
                format!("remote rejected request with status {code}"),
            ),
            DispatchOutcome::Unexpected { detail } => {
                (Detail::Unexpected, format!("unexpected error: {detail}"))
            }
        };
        Self {
            detail,
            message,
            target: target.label.clone(),
        }
    }

    pub fn for_stop(reason: StopReason) -> Self {
        match reason {
            StopReason::Manual => Self::lifecycle(Detail::StoppedManually, "session stopped"),
            StopReason::Expired => {
                Self::lifecycle(Detail::AutoExpired, "session expired and stopped itself")
            }
            StopReason::NoTargets => Self::no_targets(),
        }
    }

    pub fn no_targets() -> Self {
        Self::lifecycle(Detail::NoTargets, "no targets configured; nothing to run")
    }

    fn lifecycle(detail: Detail, message: &str) -> Self {
        Self {
            detail,
            message: message.to_owned(),
            target: NO_TARGET.to_owned(),
        }
    }
}

/// One recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    pub detail: Detail,
    pub message: String,
    pub target: String,
}

// ─── Snapshots ────────────────────────────────────────────────────

/// Consistent copy of a session's state and history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub state: SessionState,
    pub active: bool,
    pub counter: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// `None` when no session with this id exists.
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub history: Vec<Event>,
}

impl SessionSnapshot {
    /// Snapshot reported for an id the registry does not know.
    pub fn inactive(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Stopped,
            active: false,
            counter: 0,
            success_count: 0,
            error_count: 0,
            created_at: None,
            expires_at: None,
            history: Vec::new(),
        }
    }
}

/// One row of the session listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub state: SessionState,
    pub counter: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub targets: usize,
}

/// Acknowledgement of a stop request. Never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopAck {
    pub was_active: bool,
    pub message: String,
}

impl StopAck {
    pub fn stopped(id: &str) -> Self {
        Self {
            was_active: true,
            message: format!("session {id} is stopping"),
        }
    }

    pub fn inactive(id: &str) -> Self {
        Self {
            was_active: false,
            message: format!("session {id} was not running"),
        }
    }
}
