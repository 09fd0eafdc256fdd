//! Tick source lifecycle: start, stop, interval changes.
//!
//! Every transition happens on the privileged thread. When a control method
//! is called from any other thread, it posts the same request to the host
//! and returns immediately; the privileged thread applies it when it next
//! processes its queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::host::{Host, TickCallback, TickSource};
use crate::logging::targets;

/// A control request marshalled onto the privileged thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlRequest {
    Start,
    Stop { clear_state: bool },
    CreateTickSource,
}

/// Owns the tick source and the running flag of one dispatcher.
pub(crate) struct Lifecycle {
    this: Weak<Lifecycle>,
    host: Arc<dyn Host>,
    on_tick: TickCallback,
    /// Written by producers only through `ensure_running`; otherwise only on
    /// the privileged thread.
    running: AtomicBool,
    interval: Mutex<Duration>,
    /// Only locked on the privileged thread.
    tick_source: Mutex<Option<Box<dyn TickSource>>>,
}

impl Lifecycle {
    pub(crate) fn new(host: Arc<dyn Host>, interval: Duration, on_tick: TickCallback) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            host,
            on_tick,
            running: AtomicBool::new(false),
            interval: Mutex::new(interval),
            tick_source: Mutex::new(None),
        })
    }

    pub(crate) fn is_main_thread(&self) -> bool {
        self.host.is_main_thread()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Post `request` to the privileged thread if we are not on it.
    ///
    /// Returns `true` when the request was handed off and the caller must
    /// not apply it itself.
    fn marshal(&self, request: ControlRequest) -> bool {
        if self.host.is_main_thread() {
            return false;
        }

        tracing::trace!(target: targets::LIFECYCLE, ?request, "marshalling to privileged thread");
        let this = self.this.clone();
        let posted = self.host.post(Box::new(move || {
            if let Some(lifecycle) = this.upgrade() {
                lifecycle.apply(request);
            }
        }));
        if let Err(err) = posted {
            tracing::warn!(target: targets::LIFECYCLE, ?request, %err, "control request dropped");
        }
        true
    }

    fn apply(&self, request: ControlRequest) {
        match request {
            ControlRequest::Start => self.start(),
            ControlRequest::Stop { clear_state } => self.stop(clear_state),
            ControlRequest::CreateTickSource => self.create_tick_source(),
        }
    }

    fn new_tick_source(&self) -> Box<dyn TickSource> {
        let interval = *self.interval.lock();
        tracing::debug!(target: targets::LIFECYCLE, ?interval, "creating tick source");
        self.host.create_tick_source(interval, self.on_tick.clone())
    }

    fn deactivate(source: &mut Option<Box<dyn TickSource>>) {
        if let Some(source) = source.as_mut() {
            if let Err(err) = source.stop() {
                tracing::trace!(target: targets::LIFECYCLE, %err, "tick source already inactive");
            }
        }
    }

    /// Start ticking, creating the tick source on first use.
    pub(crate) fn start(&self) {
        if self.marshal(ControlRequest::Start) {
            return;
        }

        let mut slot = self.tick_source.lock();
        Self::deactivate(&mut slot);
        self.running.store(true, Ordering::SeqCst);

        let interval = *self.interval.lock();
        let source = slot.get_or_insert_with(|| self.new_tick_source());
        source.set_interval(interval);
        source.start();
        tracing::debug!(target: targets::LIFECYCLE, ?interval, "started");
    }

    /// Stop ticking. With `clear_state` the dispatcher is marked stopped;
    /// without it the running flag is left alone (used while restarting).
    pub(crate) fn stop(&self, clear_state: bool) {
        if self.marshal(ControlRequest::Stop { clear_state }) {
            return;
        }

        Self::deactivate(&mut self.tick_source.lock());
        if clear_state {
            self.running.store(false, Ordering::SeqCst);
        }
        tracing::debug!(target: targets::LIFECYCLE, clear_state, "stopped");
    }

    /// Replace any existing tick source with a fresh, inactive one.
    pub(crate) fn create_tick_source(&self) {
        if self.marshal(ControlRequest::CreateTickSource) {
            return;
        }

        let mut slot = self.tick_source.lock();
        Self::deactivate(&mut slot);
        // Drop the previous source before creating its replacement.
        *slot = None;
        *slot = Some(self.new_tick_source());
    }

    /// Request a start unless already running. Safe from any thread and
    /// from within a tick.
    pub(crate) fn ensure_running(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.start();
        }
    }

    pub(crate) fn interval(&self) -> Duration {
        *self.interval.lock()
    }

    /// Change the tick interval, restarting the tick source if running.
    pub(crate) fn set_interval(&self, interval: Duration) {
        let restart = self.is_running();
        if restart {
            self.stop(true);
        }

        *self.interval.lock() = interval;
        if self.host.is_main_thread() {
            if let Some(source) = self.tick_source.lock().as_mut() {
                source.set_interval(interval);
            }
        }

        if restart {
            self.start();
        }
    }

    /// The period of the live tick source, if one exists.
    pub(crate) fn tick_interval(&self) -> Option<Duration> {
        self.tick_source.lock().as_ref().map(|source| source.interval())
    }

    /// Whether a tick source exists and is ticking.
    pub(crate) fn is_ticking(&self) -> bool {
        self.tick_source
            .lock()
            .as_ref()
            .is_some_and(|source| source.is_active())
    }

    /// Stop and discard the tick source. The dispatcher can be started again.
    ///
    /// Off the privileged thread the whole teardown is posted. The posted
    /// task holds a strong reference, so it still runs when the owning
    /// dispatcher is dropped on a worker.
    pub(crate) fn shutdown(&self) {
        if !self.host.is_main_thread() {
            let Some(this) = self.this.upgrade() else {
                return;
            };
            tracing::trace!(target: targets::LIFECYCLE, "marshalling shutdown to privileged thread");
            let posted = self.host.post(Box::new(move || this.shutdown()));
            if let Err(err) = posted {
                tracing::warn!(target: targets::LIFECYCLE, %err, "shutdown request dropped");
            }
            return;
        }

        self.running.store(false, Ordering::SeqCst);
        let source = self.tick_source.lock().take();
        if let Some(mut source) = source {
            if let Err(err) = source.stop() {
                tracing::trace!(target: targets::LIFECYCLE, %err, "tick source already inactive");
            }
            tracing::debug!(target: targets::LIFECYCLE, "tick source discarded");
        }
    }
}
