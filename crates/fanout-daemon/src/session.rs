//! Session state machine: Idle → Running → Stopping → Stopped.
//!
//! A session fans out one worker per target and runs one coordinator task
//! that owns the expiry timer. Manual stop and expiry both go through
//! [`Session::request_stop`], which performs the Running → Stopping
//! transition, records the terminal event and fires the cancellation token
//! under the lifecycle lock, so exactly one trigger wins. The coordinator
//! moves the session to Stopped once every worker has exited.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};

use fanout_core::{
    DEFAULT_HISTORY_CAPACITY, EventDraft, HistoryRecorder, SessionError, SessionSnapshot,
    SessionState, SessionSummary, StopReason, TargetDescriptor,
};

use crate::dispatcher::Dispatcher;
use crate::worker;

/// Default pause between a worker's consecutive attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Default lifetime after which a running session stops itself.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(300);

// ─── Parameters ──────────────────────────────────────────────────

/// Everything needed to create a session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub id: String,
    pub payload: Vec<u8>,
    pub targets: Vec<TargetDescriptor>,
    pub interval: Duration,
    pub expiry: Duration,
    pub history_capacity: usize,
}

impl SessionParams {
    /// Parameters with default interval, expiry and history capacity.
    pub fn new(id: impl Into<String>, targets: Vec<TargetDescriptor>) -> Self {
        Self {
            id: id.into(),
            payload: Vec::new(),
            targets,
            interval: DEFAULT_INTERVAL,
            expiry: DEFAULT_EXPIRY,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.id.is_empty() {
            return Err(SessionError::EmptyId);
        }
        if self.interval.is_zero() {
            return Err(SessionError::InvalidInterval);
        }
        if self.expiry.is_zero() {
            return Err(SessionError::InvalidExpiry);
        }
        Ok(())
    }
}

// ─── Shared Worker Context ───────────────────────────────────────

/// Session-wide state workers read. Workers mutate only the recorder,
/// and only through `record_and_append`.
#[derive(Debug)]
pub(crate) struct SessionShared {
    pub(crate) id: String,
    pub(crate) payload: Vec<u8>,
    pub(crate) interval: Duration,
    pub(crate) recorder: HistoryRecorder,
    pub(crate) cancel: CancellationToken,
}

// ─── Lifecycle ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running {
        expires_at: DateTime<Utc>,
    },
    Stopping {
        expires_at: DateTime<Utc>,
        reason: StopReason,
    },
    Stopped {
        expires_at: Option<DateTime<Utc>>,
        reason: StopReason,
    },
}

impl Lifecycle {
    fn state(self) -> SessionState {
        match self {
            Self::Idle => SessionState::Idle,
            Self::Running { .. } => SessionState::Running,
            Self::Stopping { .. } => SessionState::Stopping,
            Self::Stopped { .. } => SessionState::Stopped,
        }
    }

    fn expires_at(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Idle => None,
            Self::Running { expires_at } | Self::Stopping { expires_at, .. } => Some(expires_at),
            Self::Stopped { expires_at, .. } => expires_at,
        }
    }
}

// ─── Session ─────────────────────────────────────────────────────

/// One dispatch campaign across a fixed target set. Single-use.
#[derive(Debug)]
pub struct Session {
    shared: Arc<SessionShared>,
    targets: Arc<[TargetDescriptor]>,
    expiry: Duration,
    created_at: DateTime<Utc>,
    lifecycle: Mutex<Lifecycle>,
    workers: TaskTracker,
    spawned: AtomicUsize,
    stopped: CancellationToken,
}

impl Session {
    /// Construct an idle session. Call [`Session::start`] to run it.
    pub fn new(params: SessionParams) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                id: params.id,
                payload: params.payload,
                interval: params.interval,
                recorder: HistoryRecorder::new(params.history_capacity),
                cancel: CancellationToken::new(),
            }),
            targets: params.targets.into(),
            expiry: params.expiry,
            created_at: Utc::now(),
            lifecycle: Mutex::new(Lifecycle::Idle),
            workers: TaskTracker::new(),
            spawned: AtomicUsize::new(0),
            stopped: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn targets(&self) -> &[TargetDescriptor] {
        &self.targets
    }

    pub fn state(&self) -> SessionState {
        self.lock_lifecycle().state()
    }

    /// Reason the session left Running, once it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        match *self.lock_lifecycle() {
            Lifecycle::Stopping { reason, .. } | Lifecycle::Stopped { reason, .. } => Some(reason),
            Lifecycle::Idle | Lifecycle::Running { .. } => None,
        }
    }

    /// Start the session: spawn one worker per target plus the coordinator.
    ///
    /// With no targets the session goes straight to Stopped with a single
    /// `NoTargets` error event and no workers. Calling `start` on a session
    /// that already left Idle does nothing. Must run inside a tokio runtime.
    pub fn start<D: Dispatcher>(self: &Arc<Self>, dispatcher: Arc<D>) {
        let mut lifecycle = self.lock_lifecycle();
        if *lifecycle != Lifecycle::Idle {
            return;
        }

        if self.targets.is_empty() {
            self.shared.recorder.append_uncounted(EventDraft::no_targets());
            *lifecycle = Lifecycle::Stopped {
                expires_at: None,
                reason: StopReason::NoTargets,
            };
            drop(lifecycle);
            self.workers.close();
            self.stopped.cancel();
            warn!(session_id = %self.id(), "session has no targets; stopped without running");
            return;
        }

        let expires_at = chrono::Duration::from_std(self.expiry)
            .ok()
            .and_then(|expiry| Utc::now().checked_add_signed(expiry))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        *lifecycle = Lifecycle::Running { expires_at };

        for (index, target) in self.targets.iter().enumerate() {
            let span = info_span!(
                "worker",
                session_id = %self.id(),
                worker = index,
                target = %target.label,
            );
            self.workers.spawn(
                worker::run(
                    Arc::clone(&self.shared),
                    Arc::clone(&dispatcher),
                    index,
                    target.clone(),
                )
                .instrument(span),
            );
        }
        self.workers.close();
        self.spawned.store(self.targets.len(), Ordering::Release);
        drop(lifecycle);

        tokio::spawn(Arc::clone(self).coordinate());
        info!(
            session_id = %self.id(),
            workers = self.targets.len(),
            interval_ms = self.shared.interval.as_millis() as u64,
            expiry_secs = self.expiry.as_secs(),
            "session started"
        );
    }

    /// Move Running → Stopping. Returns `false` if the session was not
    /// Running, in which case nothing happens.
    ///
    /// The terminal event is recorded and cancellation fired while the
    /// lifecycle lock is held, so racing callers record it once.
    pub fn request_stop(&self, reason: StopReason) -> bool {
        let mut lifecycle = self.lock_lifecycle();
        let Lifecycle::Running { expires_at } = *lifecycle else {
            return false;
        };
        *lifecycle = Lifecycle::Stopping { expires_at, reason };
        self.shared
            .recorder
            .record_and_append(EventDraft::for_stop(reason));
        self.shared.cancel.cancel();
        drop(lifecycle);

        info!(session_id = %self.id(), ?reason, "session stopping");
        true
    }

    /// Resolves once the session has reached Stopped.
    pub async fn stopped(&self) {
        self.stopped.cancelled().await;
    }

    /// Number of workers spawned at start (0 if none ever were).
    pub fn spawned_workers(&self) -> usize {
        self.spawned.load(Ordering::Acquire)
    }

    /// Number of workers that have not exited yet.
    pub fn live_workers(&self) -> usize {
        self.workers.len()
    }

    /// Consistent copy of state, counters and history.
    ///
    /// The recorder is read while the lifecycle lock is held; `request_stop`
    /// takes the locks in the same order, so a snapshot never shows a
    /// terminal event without the matching state.
    pub fn snapshot(&self) -> SessionSnapshot {
        let lifecycle = self.lock_lifecycle();
        let history = self.shared.recorder.snapshot();
        let state = lifecycle.state();
        SessionSnapshot {
            id: self.id().to_owned(),
            state,
            active: state.is_active(),
            counter: history.counter,
            success_count: history.success_count,
            error_count: history.error_count,
            created_at: Some(self.created_at),
            expires_at: lifecycle.expires_at(),
            history: history.events,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let state = self.state();
        let history = self.shared.recorder.snapshot();
        SessionSummary {
            id: self.id().to_owned(),
            state,
            counter: history.counter,
            success_count: history.success_count,
            error_count: history.error_count,
            targets: self.targets.len(),
        }
    }

    /// Expiry timer plus drain accounting. Exits only after Stopped.
    async fn coordinate(self: Arc<Self>) {
        tokio::select! {
            () = tokio::time::sleep(self.expiry) => {
                if self.request_stop(StopReason::Expired) {
                    info!(session_id = %self.id(), "session expired");
                }
            }
            () = self.shared.cancel.cancelled() => {
                debug!(session_id = %self.id(), "expiry timer cancelled");
            }
        }

        self.workers.wait().await;
        self.finish();
    }

    fn finish(&self) {
        let mut lifecycle = self.lock_lifecycle();
        let Lifecycle::Stopping { expires_at, reason } = *lifecycle else {
            return;
        };
        *lifecycle = Lifecycle::Stopped {
            expires_at: Some(expires_at),
            reason,
        };
        drop(lifecycle);

        self.stopped.cancel();
        info!(
            session_id = %self.id(),
            events = self.shared.recorder.counter(),
            "session stopped"
        );
    }

    // Lifecycle writes are single assignments; a poisoned guard still holds a valid state.
    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    use fanout_core::{Detail, DispatchOutcome, Outcome};
    use tokio::sync::Semaphore;

    use crate::dispatcher::DispatchRequest;

    struct Instant200 {
        calls: AtomicU64,
    }

    impl Instant200 {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU64::new(0),
            })
        }
    }

    impl Dispatcher for Instant200 {
        async fn dispatch(&self, _request: DispatchRequest<'_>) -> DispatchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            DispatchOutcome::Success { status: Some(200) }
        }
    }

    /// Blocks every call until a permit is released.
    struct Gated {
        gate: Semaphore,
        entered: Semaphore,
    }

    impl Dispatcher for Gated {
        async fn dispatch(&self, _request: DispatchRequest<'_>) -> DispatchOutcome {
            self.entered.add_permits(1);
            let permit = self.gate.acquire().await;
            drop(permit);
            DispatchOutcome::Timeout
        }
    }

    fn targets(n: usize) -> Vec<TargetDescriptor> {
        (0..n)
            .map(|i| TargetDescriptor::new(format!("user:pw@10.0.0.{i}:8080")))
            .collect()
    }

    fn terminal_events(snap: &SessionSnapshot) -> usize {
        snap.history
            .iter()
            .filter(|e| e.detail.is_terminal())
            .count()
    }

    // ── 1. params ───────────────────────────────────────────────────

    #[test]
    fn params_validation() {
        let ok = SessionParams::new("s", targets(1));
        assert_eq!(ok.validate(), Ok(()));
        assert_eq!(
            SessionParams::new("", targets(1)).validate(),
            Err(SessionError::EmptyId)
        );
        assert_eq!(
            ok.clone().with_interval(Duration::ZERO).validate(),
            Err(SessionError::InvalidInterval)
        );
        assert_eq!(
            ok.with_expiry(Duration::ZERO).validate(),
            Err(SessionError::InvalidExpiry)
        );
    }

    #[test]
    fn new_session_is_idle() {
        let session = Session::new(SessionParams::new("s", targets(2)));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.spawned_workers(), 0);
        assert!(!session.request_stop(StopReason::Manual));
        let snap = session.snapshot();
        assert_eq!(snap.state, SessionState::Idle);
        assert!(snap.expires_at.is_none());
    }

    // ── 2. no targets ───────────────────────────────────────────────

    #[tokio::test]
    async fn empty_targets_stop_immediately_with_one_error() {
        let dispatcher = Instant200::new();
        let session = Arc::new(Session::new(SessionParams::new("empty", Vec::new())));
        session.start(Arc::clone(&dispatcher));

        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.stop_reason(), Some(StopReason::NoTargets));
        assert_eq!(session.spawned_workers(), 0);
        session.stopped().await;

        let snap = session.snapshot();
        assert_eq!(snap.counter, 0);
        assert_eq!(snap.history.len(), 1);
        assert_eq!(snap.history[0].outcome, Outcome::Error);
        assert_eq!(snap.history[0].detail, Detail::NoTargets);
        assert_eq!(snap.history[0].target, "none");
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);

        // Single-use: a second start is ignored.
        session.start(dispatcher);
        assert_eq!(session.snapshot().history.len(), 1);
    }

    // ── 3. manual stop ──────────────────────────────────────────────

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn manual_stop_drains_workers() {
        let dispatcher = Instant200::new();
        let session = Arc::new(Session::new(
            SessionParams::new("s", targets(3)).with_interval(Duration::from_millis(5)),
        ));
        session.start(Arc::clone(&dispatcher));
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.spawned_workers(), 3);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(session.request_stop(StopReason::Manual));
        assert!(!session.request_stop(StopReason::Manual));

        tokio::time::timeout(Duration::from_secs(2), session.stopped())
            .await
            .expect("session should stop");
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.live_workers(), 0);
        assert_eq!(session.stop_reason(), Some(StopReason::Manual));

        let snap = session.snapshot();
        assert_eq!(terminal_events(&snap), 1);
        // Every attempt plus the terminal event consumed one sequence.
        assert_eq!(snap.counter, dispatcher.calls.load(Ordering::SeqCst) + 1);
        assert_eq!(snap.success_count, dispatcher.calls.load(Ordering::SeqCst));
        assert!(snap.expires_at.is_some());
    }

    #[tokio::test]
    async fn stop_interrupts_long_interval() {
        let session = Arc::new(Session::new(
            SessionParams::new("slow", targets(2)).with_interval(Duration::from_secs(3600)),
        ));
        session.start(Instant200::new());
        while session.snapshot().counter < 2 {
            tokio::task::yield_now().await;
        }
        session.request_stop(StopReason::Manual);
        tokio::time::timeout(Duration::from_secs(2), session.stopped())
            .await
            .expect("sleeping workers should wake on cancel");
    }

    // ── 4. stopping waits for in-flight dispatch ────────────────────

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stopping_until_in_flight_call_returns() {
        let dispatcher = Arc::new(Gated {
            gate: Semaphore::new(0),
            entered: Semaphore::new(0),
        });
        let session = Arc::new(Session::new(SessionParams::new("gated", targets(1))));
        session.start(Arc::clone(&dispatcher));

        // Wait until the worker is inside the dispatcher.
        dispatcher.entered.acquire().await.unwrap().forget();
        assert!(session.request_stop(StopReason::Manual));
        assert_eq!(session.state(), SessionState::Stopping);
        assert!(session.snapshot().active);

        dispatcher.gate.add_permits(1);
        tokio::time::timeout(Duration::from_secs(2), session.stopped())
            .await
            .expect("session should stop after the call returns");

        // The in-flight attempt was recorded after the terminal event.
        let snap = session.snapshot();
        assert_eq!(snap.counter, 2);
        assert_eq!(snap.history[0].detail, Detail::StoppedManually);
        assert_eq!(snap.history[1].detail, Detail::Timeout);
    }

    // ── 5. expiry ───────────────────────────────────────────────────

    #[tokio::test]
    async fn expiry_stops_session_with_auto_expired_event() {
        let session = Arc::new(Session::new(
            SessionParams::new("exp", targets(2))
                .with_interval(Duration::from_secs(3600))
                .with_expiry(Duration::from_millis(20)),
        ));
        session.start(Instant200::new());

        tokio::time::timeout(Duration::from_secs(2), session.stopped())
            .await
            .expect("expiry should stop the session");
        assert_eq!(session.stop_reason(), Some(StopReason::Expired));
        assert!(!session.request_stop(StopReason::Manual));

        let snap = session.snapshot();
        let terminal: Vec<_> = snap.history.iter().filter(|e| e.detail.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].detail, Detail::AutoExpired);
        assert_eq!(terminal[0].outcome, Outcome::Info);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_stop_cancels_expiry_timer() {
        let session = Arc::new(Session::new(
            SessionParams::new("t", targets(1))
                .with_interval(Duration::from_secs(3600))
                .with_expiry(Duration::from_secs(10)),
        ));
        session.start(Instant200::new());
        session.request_stop(StopReason::Manual);
        session.stopped().await;

        // Well past the deadline: no stray expiry event.
        tokio::time::sleep(Duration::from_secs(60)).await;
        let snap = session.snapshot();
        assert_eq!(terminal_events(&snap), 1);
        assert_eq!(session.stop_reason(), Some(StopReason::Manual));
    }

    // ── 6. stop racing expiry ───────────────────────────────────────

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_racing_expiry_has_one_terminal_transition() {
        let dispatcher = Instant200::new();
        for round in 0..1000 {
            let session = Arc::new(Session::new(
                SessionParams::new(format!("race-{round}"), targets(1))
                    .with_interval(Duration::from_secs(3600))
                    .with_expiry(Duration::from_micros(50)),
            ));
            session.start(Arc::clone(&dispatcher));

            let racer = Arc::clone(&session);
            let manual = tokio::spawn(async move { racer.request_stop(StopReason::Manual) });
            let manual_won = manual.await.unwrap();

            tokio::time::timeout(Duration::from_secs(2), session.stopped())
                .await
                .expect("session should stop");
            let snap = session.snapshot();
            assert_eq!(snap.state, SessionState::Stopped);
            assert_eq!(terminal_events(&snap), 1, "round {round}");
            let expected = if manual_won {
                StopReason::Manual
            } else {
                StopReason::Expired
            };
            assert_eq!(session.stop_reason(), Some(expected));
        }
    }

    #[test]
    fn concurrent_stop_requests_have_one_winner() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        for _ in 0..200 {
            let session = Arc::new(Session::new(
                SessionParams::new("cas", targets(1)).with_interval(Duration::from_secs(3600)),
            ));
            runtime.block_on(async { session.start(Instant200::new()) });

            let threads: Vec<_> = [StopReason::Manual, StopReason::Expired]
                .into_iter()
                .map(|reason| {
                    let session = Arc::clone(&session);
                    std::thread::spawn(move || session.request_stop(reason))
                })
                .collect();
            let winners = threads
                .into_iter()
                .map(|t| t.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1);
            assert_eq!(terminal_events(&session.snapshot()), 1);
        }
    }

    // ── 7. snapshots under load ─────────────────────────────────────

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn snapshots_never_go_backwards() {
        let session = Arc::new(Session::new(
            SessionParams::new("load", targets(50))
                .with_interval(Duration::from_millis(1))
                .with_history_capacity(64),
        ));
        session.start(Instant200::new());

        let mut last = 0;
        for _ in 0..300 {
            let snap = session.snapshot();
            assert!(snap.counter >= last);
            assert!(snap.history.len() as u64 <= snap.counter);
            assert!(snap.history.len() <= 64);
            last = snap.counter;
            tokio::task::yield_now().await;
        }
        session.request_stop(StopReason::Manual);
        session.stopped().await;
        assert_eq!(session.live_workers(), 0);
    }
}
