//! Worker loop: one per target, dispatching until the session is cancelled.

use std::sync::Arc;

use tracing::{debug, trace};

use fanout_core::{EventDraft, TargetDescriptor};

use crate::dispatcher::{DispatchRequest, Dispatcher, dispatch_guarded};
use crate::session::SessionShared;

/// Per-attempt identifier, unique across the workers of a session.
pub(crate) fn attempt_id(session_id: &str, worker: usize, attempt: u64) -> String {
    format!("{session_id}-{worker}-{attempt}")
}

/// Dispatch, record, sleep; repeat until cancellation is observed.
///
/// Cancellation is checked before every dispatch and interrupts the sleep.
/// An in-flight dispatch is allowed to finish and its event is recorded.
pub(crate) async fn run<D: Dispatcher>(
    shared: Arc<SessionShared>,
    dispatcher: Arc<D>,
    worker: usize,
    target: TargetDescriptor,
) {
    debug!("worker started");
    let mut attempt: u64 = 0;

    while !shared.cancel.is_cancelled() {
        attempt += 1;
        let attempt_id = attempt_id(&shared.id, worker, attempt);
        let request = DispatchRequest {
            attempt_id: &attempt_id,
            payload: &shared.payload,
            target: &target,
        };
        let outcome = dispatch_guarded(dispatcher.as_ref(), request).await;
        let sequence = shared
            .recorder
            .record_and_append(EventDraft::from_dispatch(&outcome, &target));
        trace!(%attempt_id, sequence, ?outcome, "attempt recorded");

        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            () = tokio::time::sleep(shared.interval) => {}
        }
    }

    debug!(attempts = attempt, "worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use fanout_core::{DispatchOutcome, HistoryRecorder, Outcome};
    use tokio_util::sync::CancellationToken;

    struct Counting {
        calls: AtomicU64,
        stop_after: u64,
        cancel: CancellationToken,
    }

    impl Dispatcher for Counting {
        async fn dispatch(&self, request: DispatchRequest<'_>) -> DispatchOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert!(request.attempt_id.starts_with("w-3-"));
            if n == self.stop_after {
                self.cancel.cancel();
            }
            if n % 2 == 0 {
                DispatchOutcome::Timeout
            } else {
                DispatchOutcome::Success { status: Some(200) }
            }
        }
    }

    fn shared(interval: Duration, cancel: CancellationToken) -> Arc<SessionShared> {
        Arc::new(SessionShared {
            id: "w".to_owned(),
            payload: b"payload".to_vec(),
            interval,
            recorder: HistoryRecorder::new(100),
            cancel,
        })
    }

    // ── 1. attempt ids ──────────────────────────────────────────────

    #[test]
    fn attempt_ids_are_distinct_per_worker_and_attempt() {
        assert_eq!(attempt_id("s1", 0, 1), "s1-0-1");
        assert_ne!(attempt_id("s1", 0, 2), attempt_id("s1", 1, 2));
    }

    // ── 2. loop records every attempt until cancelled ───────────────

    #[tokio::test]
    async fn records_each_attempt_and_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let shared = shared(Duration::from_millis(1), cancel.clone());
        let dispatcher = Arc::new(Counting {
            calls: AtomicU64::new(0),
            stop_after: 5,
            cancel,
        });

        run(
            Arc::clone(&shared),
            Arc::clone(&dispatcher),
            3,
            TargetDescriptor::new("host:1"),
        )
        .await;

        // The attempt that observed cancellation mid-call is still recorded.
        let snap = shared.recorder.snapshot();
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 5);
        assert_eq!(snap.counter, 5);
        assert_eq!(snap.success_count, 3);
        assert_eq!(snap.error_count, 2);
        assert!(snap.events.iter().all(|e| e.target == "host:1"));
        assert_eq!(snap.events[1].outcome, Outcome::Error);
    }

    // ── 3. sleep is interruptible ───────────────────────────────────

    #[tokio::test]
    async fn cancellation_interrupts_long_sleep() {
        let cancel = CancellationToken::new();
        let shared = shared(Duration::from_secs(3600), cancel.clone());
        let dispatcher = Arc::new(Counting {
            calls: AtomicU64::new(0),
            stop_after: u64::MAX,
            cancel: CancellationToken::new(),
        });

        let handle = tokio::spawn(run(
            Arc::clone(&shared),
            dispatcher,
            3,
            TargetDescriptor::new("host:1"),
        ));
        while shared.recorder.counter() == 0 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker should exit promptly")
            .unwrap();
        assert_eq!(shared.recorder.counter(), 1);
    }

    // ── 4. pre-cancelled session never dispatches ───────────────────

    #[tokio::test]
    async fn already_cancelled_does_not_dispatch() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let shared = shared(Duration::from_millis(1), cancel);
        let dispatcher = Arc::new(Counting {
            calls: AtomicU64::new(0),
            stop_after: u64::MAX,
            cancel: CancellationToken::new(),
        });

        run(Arc::clone(&shared), Arc::clone(&dispatcher), 3, TargetDescriptor::new("h:1")).await;
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
        assert!(shared.recorder.is_empty());
    }
}
