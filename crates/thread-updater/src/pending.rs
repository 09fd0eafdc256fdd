//! The four pending-work collections.
//!
//! Each collection owns its own lock. Producers hold a lock only for the
//! insert; the drain holds it only for the snapshot or swap. Nothing in this
//! module ever invokes a callable.

use std::collections::HashMap;
use std::mem;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::target::{PendingCall, RepeatingCall, TargetId};

/// An insertion-ordered map keyed by target identity.
///
/// Overwriting an existing key keeps its original position.
#[derive(Debug)]
struct OrderedCalls<V> {
    index: HashMap<TargetId, usize>,
    entries: Vec<(TargetId, V)>,
}

impl<V> Default for OrderedCalls<V> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<V> OrderedCalls<V> {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn insert(&mut self, id: TargetId, value: V) -> Option<V> {
        match self.index.get(&id) {
            Some(&pos) => Some(mem::replace(&mut self.entries[pos].1, value)),
            None => {
                self.index.insert(id, self.entries.len());
                self.entries.push((id, value));
                None
            }
        }
    }

    fn get_or_insert_with(&mut self, id: TargetId, default: impl FnOnce() -> V) -> &mut V {
        let pos = match self.index.get(&id) {
            Some(&pos) => pos,
            None => {
                let pos = self.entries.len();
                self.index.insert(id, pos);
                self.entries.push((id, default()));
                pos
            }
        };
        &mut self.entries[pos].1
    }

    fn remove(&mut self, id: TargetId) -> Option<V> {
        let pos = self.index.remove(&id)?;
        let (_, value) = self.entries.remove(pos);
        for (shifted, _) in &self.entries[pos..] {
            if let Some(slot) = self.index.get_mut(shifted) {
                *slot -= 1;
            }
        }
        Some(value)
    }

    fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, value)| value)
    }

    fn into_values(self) -> impl Iterator<Item = V> {
        self.entries.into_iter().map(|(_, value)| value)
    }
}

/// Calls re-run on every tick until unregistered.
#[derive(Default)]
pub(crate) struct ContinuousCalls {
    inner: Mutex<OrderedCalls<RepeatingCall>>,
}

impl ContinuousCalls {
    pub(crate) fn register(&self, call: RepeatingCall) {
        let id = call.target().id();
        self.inner.lock().insert(id, call);
    }

    pub(crate) fn unregister(&self, id: TargetId) -> bool {
        self.inner.lock().remove(id).is_some()
    }

    /// Copy the registered calls; the registrations stay in place.
    pub(crate) fn snapshot(&self) -> Vec<RepeatingCall> {
        self.inner.lock().values().cloned().collect()
    }

    /// Drop every registration. The callables are released after the lock.
    pub(crate) fn clear(&self) {
        let taken = mem::take(&mut *self.inner.lock());
        drop(taken);
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Latest-wins calls: one pending call per target.
#[derive(Default)]
pub(crate) struct LatestCalls {
    inner: Mutex<OrderedCalls<PendingCall>>,
}

impl LatestCalls {
    /// Store the call, replacing any pending call for the same target.
    pub(crate) fn submit(&self, call: PendingCall) {
        let id = call.target().id();
        let replaced = self.inner.lock().insert(id, call);
        // Drop the superseded call (and its arguments) outside the lock.
        drop(replaced);
    }

    /// Swap the collection for an empty one.
    pub(crate) fn take(&self) -> Vec<PendingCall> {
        let taken = mem::take(&mut *self.inner.lock());
        taken.into_values().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Queued calls: every submission kept, grouped by target.
#[derive(Default)]
pub(crate) struct QueuedCalls {
    inner: Mutex<OrderedCalls<Vec<PendingCall>>>,
}

impl QueuedCalls {
    pub(crate) fn push(&self, call: PendingCall) {
        let id = call.target().id();
        self.inner.lock().get_or_insert_with(id, Vec::new).push(call);
    }

    /// Swap the collection for an empty one, returning calls grouped by target.
    pub(crate) fn take(&self) -> Vec<Vec<PendingCall>> {
        let taken = mem::take(&mut *self.inner.lock());
        taken.into_values().collect()
    }

    /// Total number of pending calls across all targets.
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().values().map(Vec::len).sum()
    }
}

/// A one-shot call waiting for its delay to elapse.
pub(crate) struct DelayedCall {
    submitted_at: Instant,
    delay: Duration,
    call: PendingCall,
}

impl DelayedCall {
    pub(crate) fn new(submitted_at: Instant, delay: Duration, call: PendingCall) -> Self {
        Self {
            submitted_at,
            delay,
            call,
        }
    }

    /// Eligible once `now - submitted_at >= delay`.
    pub(crate) fn is_ready(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.submitted_at) >= self.delay
    }

    /// Time left until the call becomes eligible, zero if it already is.
    pub(crate) fn remaining(&self, now: Instant) -> Duration {
        self.submitted_at
            .checked_add(self.delay)
            .map_or(Duration::MAX, |due| due.saturating_duration_since(now))
    }
}

/// Delayed one-shot calls, kept in submission order.
#[derive(Default)]
pub(crate) struct DelayedCalls {
    inner: Mutex<Vec<DelayedCall>>,
}

impl DelayedCalls {
    pub(crate) fn push(&self, call: DelayedCall) {
        self.inner.lock().push(call);
    }

    /// Remove and return every call eligible at `now`, in submission order.
    ///
    /// Ineligible calls stay in place, keeping their relative order.
    pub(crate) fn take_ready(&self, now: Instant) -> Vec<PendingCall> {
        let mut pending = self.inner.lock();
        if !pending.iter().any(|call| call.is_ready(now)) {
            return Vec::new();
        }
        let (ready, waiting): (Vec<_>, Vec<_>) =
            mem::take(&mut *pending).into_iter().partition(|call| call.is_ready(now));
        *pending = waiting;
        drop(pending);

        ready.into_iter().map(|delayed| delayed.call).collect()
    }

    /// Time until the earliest pending call becomes eligible.
    pub(crate) fn time_until_next(&self, now: Instant) -> Option<Duration> {
        self.inner.lock().iter().map(|call| call.remaining(now)).min()
    }

    /// Drop every waiting call, eligible or not.
    pub(crate) fn clear(&self) {
        let taken = mem::take(&mut *self.inner.lock());
        drop(taken);
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Number of pending entries in each collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    /// Registered continuous callbacks.
    pub continuous: usize,
    /// Targets with a pending latest-wins call.
    pub latest: usize,
    /// Pending queued calls, counted individually.
    pub queued: usize,
    /// Delayed calls that have not fired yet.
    pub delayed: usize,
}

impl PendingCounts {
    /// Total number of pending entries.
    pub fn total(&self) -> usize {
        self.continuous + self.latest + self.queued + self.delayed
    }

    /// `true` when every collection is empty.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
