//! fanout-core: data model and bounded history for the session orchestrator.
//! Pure library: no async runtime, no IO.

pub mod error;
pub mod history;
pub mod types;

pub use error::SessionError;
pub use history::{DEFAULT_HISTORY_CAPACITY, HistoryRecorder, HistorySnapshot};
pub use types::{
    Detail, DispatchOutcome, Event, EventDraft, NO_TARGET, Outcome, SessionSnapshot,
    SessionState, SessionSummary, StopAck, StopReason, TargetDescriptor, redact_address,
};
