//! fanout-daemon: session orchestrator.
//! Fans each session out into one worker per target, coordinates manual
//! stop against the expiry timer, and keeps the session table.

pub mod dispatcher;
pub mod registry;
pub mod session;
mod worker;

pub use dispatcher::{DispatchRequest, Dispatcher};
pub use registry::SessionRegistry;
pub use session::{DEFAULT_EXPIRY, DEFAULT_INTERVAL, Session, SessionParams};
