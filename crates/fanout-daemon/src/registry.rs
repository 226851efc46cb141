//! Process-wide session table.
//!
//! The map guard is held only for lookup/insert/delete. Stop requests and
//! snapshot copies run against a cloned `Arc<Session>` after the guard is
//! released, so a slow status read never blocks creation for other ids.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use fanout_core::{
    SessionError, SessionSnapshot, SessionState, SessionSummary, StopAck, StopReason,
};

use crate::dispatcher::Dispatcher;
use crate::session::{Session, SessionParams};

pub struct SessionRegistry<D> {
    dispatcher: Arc<D>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl<D: Dispatcher> SessionRegistry<D> {
    pub fn new(dispatcher: Arc<D>) -> Self {
        Self {
            dispatcher,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create and start a session.
    ///
    /// Fails with `Conflict` while a Running or Stopping session holds the
    /// id; a Stopped entry is replaced. A session with no targets is still
    /// created and immediately reports Stopped.
    pub async fn create(&self, params: SessionParams) -> Result<Arc<Session>, SessionError> {
        params.validate()?;

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&params.id)
            && existing.state().is_active()
        {
            debug!(session_id = %params.id, "create rejected: session already active");
            return Err(SessionError::Conflict(params.id));
        }

        let id = params.id.clone();
        let session = Arc::new(Session::new(params));
        session.start(Arc::clone(&self.dispatcher));
        if sessions.insert(id, Arc::clone(&session)).is_some() {
            debug!(session_id = %session.id(), "replaced stopped session");
        }
        Ok(session)
    }

    /// Request a stop. Never waits for workers to drain.
    pub async fn stop(&self, id: &str) -> StopAck {
        let session = self.get(id).await;
        match session {
            Some(session) if session.request_stop(StopReason::Manual) => StopAck::stopped(id),
            _ => StopAck::inactive(id),
        }
    }

    /// Snapshot of one session, or an inactive placeholder for unknown ids.
    pub async fn status(&self, id: &str) -> SessionSnapshot {
        match self.get(id).await {
            Some(session) => session.snapshot(),
            None => SessionSnapshot::inactive(id),
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Summaries of every known session, sorted by id.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().await.values().cloned().collect();
        let mut summaries: Vec<SessionSummary> = sessions.iter().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Remove Stopped sessions. Returns the count removed.
    pub async fn prune(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.state() != SessionState::Stopped);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "pruned stopped sessions");
        }
        removed
    }

    /// Stop every running session and wait until all have reached Stopped.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().await.values().cloned().collect();
        let mut stopped = 0usize;
        for session in &sessions {
            if session.request_stop(StopReason::Manual) {
                stopped += 1;
            }
        }
        for session in &sessions {
            session.stopped().await;
        }
        info!(stopped, total = sessions.len(), "all sessions stopped");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
