//! Repeating timers for the event loop host.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::error::TimerError;
use crate::host::TickCallback;
use crate::logging::targets;

new_key_type! {
    /// A unique identifier for a timer.
    pub struct TimerId;
}

/// Internal timer data.
struct TimerData {
    /// When this timer should next fire.
    next_fire: Instant,
    /// The repeat interval.
    interval: Duration,
    /// Invoked on every fire.
    callback: TickCallback,
}

/// An entry in the timer queue (min-heap by fire time).
#[derive(Debug, Clone, Copy)]
struct TimerQueueEntry {
    id: TimerId,
    fire_time: Instant,
}

impl PartialEq for TimerQueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_time == other.fire_time
    }
}

impl Eq for TimerQueueEntry {}

impl PartialOrd for TimerQueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerQueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap (BinaryHeap is max-heap by default).
        other.fire_time.cmp(&self.fire_time)
    }
}

/// Manages the repeating timers of one event loop.
pub(crate) struct TimerManager {
    timers: SlotMap<TimerId, TimerData>,
    /// Pending fires; entries whose time no longer matches the timer are stale.
    queue: BinaryHeap<TimerQueueEntry>,
}

impl TimerManager {
    pub fn new() -> Self {
        Self {
            timers: SlotMap::with_key(),
            queue: BinaryHeap::new(),
        }
    }

    /// Start a repeating timer. The first fire occurs after `interval`.
    pub fn start_repeating(&mut self, interval: Duration, callback: TickCallback) -> TimerId {
        let next_fire = Instant::now() + interval;
        let id = self.timers.insert(TimerData {
            next_fire,
            interval,
            callback,
        });
        self.queue.push(TimerQueueEntry {
            id,
            fire_time: next_fire,
        });
        id
    }

    /// Change a timer's interval, rescheduling its next fire from now.
    pub fn set_interval(&mut self, id: TimerId, interval: Duration) -> Result<(), TimerError> {
        let timer = self.timers.get_mut(id).ok_or(TimerError::InvalidTimerId)?;
        timer.interval = interval;
        timer.next_fire = Instant::now() + interval;
        self.queue.push(TimerQueueEntry {
            id,
            fire_time: timer.next_fire,
        });
        Ok(())
    }

    /// Stop and remove a timer.
    pub fn stop(&mut self, id: TimerId) -> Result<(), TimerError> {
        self.timers
            .remove(id)
            .map(|_| ())
            .ok_or(TimerError::InvalidTimerId)
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.timers.contains_key(id)
    }

    pub fn interval(&self, id: TimerId) -> Option<Duration> {
        self.timers.get(id).map(|t| t.interval)
    }

    fn is_current(&self, entry: &TimerQueueEntry) -> bool {
        self.timers
            .get(entry.id)
            .is_some_and(|t| t.next_fire == entry.fire_time)
    }

    /// Get the duration until the next timer fires, if any.
    pub fn time_until_next(&mut self) -> Option<Duration> {
        while let Some(entry) = self.queue.peek() {
            if self.is_current(entry) {
                break;
            }
            self.queue.pop();
        }

        self.queue
            .peek()
            .map(|entry| entry.fire_time.saturating_duration_since(Instant::now()))
    }

    /// Collect the callbacks of all timers due at `now` and reschedule them.
    ///
    /// The callbacks are returned rather than invoked so the caller can run
    /// them without holding the manager's lock.
    #[tracing::instrument(skip(self), target = "thread_updater::timer", level = "trace")]
    pub fn take_expired(&mut self, now: Instant) -> Vec<(TimerId, TickCallback)> {
        let mut expired = Vec::new();

        while let Some(&entry) = self.queue.peek() {
            if entry.fire_time > now {
                break;
            }
            self.queue.pop();

            if !self.is_current(&entry) {
                continue;
            }
            let Some(timer) = self.timers.get_mut(entry.id) else {
                continue;
            };

            tracing::trace!(target: targets::TIMER, id = ?entry.id, "timer fired");
            expired.push((entry.id, timer.callback.clone()));

            // Schedule from now rather than from the missed fire time so a
            // slow tick does not cause a burst of catch-up fires.
            timer.next_fire = now + timer.interval;
            self.queue.push(TimerQueueEntry {
                id: entry.id,
                fire_time: timer.next_fire,
            });
        }

        expired
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

/// A thread-safe wrapper around `TimerManager`.
pub(crate) struct SharedTimerManager {
    inner: Mutex<TimerManager>,
}

impl SharedTimerManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TimerManager::new()),
        }
    }

    pub fn start_repeating(&self, interval: Duration, callback: TickCallback) -> TimerId {
        self.inner.lock().start_repeating(interval, callback)
    }

    pub fn set_interval(&self, id: TimerId, interval: Duration) -> Result<(), TimerError> {
        self.inner.lock().set_interval(id, interval)
    }

    pub fn stop(&self, id: TimerId) -> Result<(), TimerError> {
        self.inner.lock().stop(id)
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.inner.lock().is_active(id)
    }

    pub fn interval(&self, id: TimerId) -> Option<Duration> {
        self.inner.lock().interval(id)
    }

    pub fn time_until_next(&self) -> Option<Duration> {
        self.inner.lock().time_until_next()
    }

    pub fn take_expired(&self, now: Instant) -> Vec<(TimerId, TickCallback)> {
        self.inner.lock().take_expired(now)
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active_count()
    }
}
