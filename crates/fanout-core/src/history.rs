//! Shared event counter and bounded FIFO history.
//!
//! All mutation goes through [`HistoryRecorder::record_and_append`], which
//! assigns the sequence number, stamps the event and appends it under one
//! lock, so concurrent writers can neither share a sequence number nor
//! observe a half-written ledger.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use crate::types::{Event, EventDraft, Outcome};

/// Default number of events retained per session.
pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

/// Counter and history copied out under a single lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySnapshot {
    pub counter: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Oldest first.
    pub events: Vec<Event>,
}

#[derive(Debug)]
struct Ledger {
    counter: u64,
    success_count: u64,
    error_count: u64,
    events: VecDeque<Event>,
}

/// Bounded, ordered, thread-safe append log plus a monotonic counter.
#[derive(Debug)]
pub struct HistoryRecorder {
    capacity: usize,
    ledger: Mutex<Ledger>,
}

impl HistoryRecorder {
    /// Create a recorder holding at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ledger: Mutex::new(Ledger {
                counter: 0,
                success_count: 0,
                error_count: 0,
                events: VecDeque::with_capacity(capacity),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Advance the counter and append one event built from `draft`.
    ///
    /// Returns the sequence number assigned to the event.
    pub fn record_and_append(&self, draft: EventDraft) -> u64 {
        let mut ledger = self.lock();
        ledger.counter += 1;
        let sequence = ledger.counter;
        self.push(&mut ledger, sequence, draft);
        sequence
    }

    /// Append an event without advancing the counter.
    ///
    /// The event carries the current counter value. Only used for the
    /// setup-failure event of a session that never ran, where the counter
    /// is still 0 and no counted event can share the sequence.
    pub fn append_uncounted(&self, draft: EventDraft) -> u64 {
        let mut ledger = self.lock();
        let sequence = ledger.counter;
        self.push(&mut ledger, sequence, draft);
        sequence
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        let ledger = self.lock();
        HistorySnapshot {
            counter: ledger.counter,
            success_count: ledger.success_count,
            error_count: ledger.error_count,
            events: ledger.events.iter().cloned().collect(),
        }
    }

    pub fn counter(&self) -> u64 {
        self.lock().counter
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, ledger: &mut Ledger, sequence: u64, draft: EventDraft) {
        let outcome = draft.detail.outcome();
        match outcome {
            Outcome::Success => ledger.success_count += 1,
            Outcome::Error => ledger.error_count += 1,
            Outcome::Info => {}
        }
        if ledger.events.len() == self.capacity {
            ledger.events.pop_front();
        }
        ledger.events.push_back(Event {
            sequence,
            timestamp: Utc::now(),
            outcome,
            detail: draft.detail,
            message: draft.message,
            target: draft.target,
        });
    }

    // The ledger is never left half-updated across a panic point.
    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HistoryRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
