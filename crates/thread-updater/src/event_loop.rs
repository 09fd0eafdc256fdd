//! A minimal privileged-thread event loop.
//!
//! [`EventLoop`] is the host shipped with this crate. The thread that creates
//! it becomes its privileged thread; the loop must be run on that thread,
//! where it executes marshalled tasks and fires repeating timers.
//! [`LoopHandle`] is the cloneable, thread-safe side that other threads use
//! to post tasks, and it implements [`Host`] so a dispatcher can be built on
//! top of it.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use thread_updater::{Dispatcher, EventLoop, Target};
//!
//! let event_loop = EventLoop::new();
//! let dispatcher = Dispatcher::builder(event_loop.handle())
//!     .interval(Duration::from_millis(5))
//!     .build();
//!
//! let done = Target::infallible("done", {
//!     let handle = event_loop.handle();
//!     move |_: ()| handle.quit()
//! });
//!
//! let worker = {
//!     let dispatcher = dispatcher.clone();
//!     std::thread::spawn(move || dispatcher.call_in_main(&done, ()))
//! };
//! worker.join().unwrap();
//!
//! event_loop.run().unwrap();
//! ```

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};

use crate::error::{DispatchError, Result, TimerError};
use crate::host::{Host, MainTask, TickCallback, TickSource};
use crate::logging::{span_names, targets};
use crate::thread_check::{self, ThreadAffinity};
use crate::timer::{SharedTimerManager, TimerId};

/// Longest a blocking `run` waits for an event before re-checking timers.
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Events delivered to the loop's channel.
enum LoopEvent {
    /// Run a marshalled task.
    Task(MainTask),
    /// Stop `run` after the current iteration.
    Quit,
}

/// State shared between the loop and its handles.
struct LoopShared {
    affinity: ThreadAffinity,
    sender: Sender<LoopEvent>,
    timers: SharedTimerManager,
    quit: AtomicBool,
}

/// The privileged-thread side of the event loop.
///
/// Not `Send`: the loop stays on the thread that created it.
pub struct EventLoop {
    shared: Arc<LoopShared>,
    receiver: Receiver<LoopEvent>,
    _not_send: PhantomData<*const ()>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Create an event loop bound to the current thread.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            shared: Arc::new(LoopShared {
                affinity: ThreadAffinity::current(),
                sender,
                timers: SharedTimerManager::new(),
                quit: AtomicBool::new(false),
            }),
            receiver,
            _not_send: PhantomData,
        }
    }

    /// Create an event loop and register the current thread as the process
    /// main thread.
    ///
    /// Returns `None` if a different thread is already registered.
    pub fn main() -> Option<Self> {
        thread_check::set_main_thread().then(Self::new)
    }

    /// Get a thread-safe handle to this loop.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            shared: self.shared.clone(),
        }
    }

    /// Number of timers currently running on this loop.
    pub fn active_timers(&self) -> usize {
        self.shared.timers.active_count()
    }

    /// Whether `quit` has been requested.
    pub fn should_quit(&self) -> bool {
        self.shared.quit.load(Ordering::SeqCst)
    }

    /// Run every task already queued and every timer already due, without
    /// blocking.
    ///
    /// Returns the number of tasks and ticks processed.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a tick callback. Remaining due
    /// timers are skipped until the next call.
    pub fn process_pending(&self) -> Result<usize> {
        self.shared.affinity.assert_same_thread("EventLoop::process_pending");
        let _span = tracing::trace_span!(target: targets::EVENT_LOOP, "process", name = span_names::EVENT_LOOP)
            .entered();

        let mut processed = 0;
        // Bound the batch so tasks that re-post themselves cannot starve timers.
        for _ in 0..self.receiver.len() {
            match self.receiver.try_recv() {
                Ok(event) => processed += self.handle_event(event),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }

        for (id, tick) in self.shared.timers.take_expired(Instant::now()) {
            if let Err(err) = tick() {
                tracing::error!(target: targets::EVENT_LOOP, ?id, %err, "tick failed");
                return Err(err);
            }
            processed += 1;
        }

        Ok(processed)
    }

    /// Wait up to `max_wait` for something to do, then process it.
    ///
    /// The wait is cut short by the next timer fire or by an incoming task.
    pub fn run_once(&self, max_wait: Duration) -> Result<usize> {
        let wait = self
            .shared
            .timers
            .time_until_next()
            .map_or(max_wait, |next| next.min(max_wait));

        let mut processed = 0;
        match self.receiver.recv_timeout(wait) {
            Ok(event) => processed += self.handle_event(event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Err(DispatchError::LoopClosed),
        }

        Ok(processed + self.process_pending()?)
    }

    /// Run the loop for `duration`, or until `quit` is requested.
    pub fn run_for(&self, duration: Duration) -> Result<usize> {
        let deadline = Instant::now() + duration;
        let mut processed = 0;
        while !self.take_quit() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            processed += self.run_once(deadline - now)?;
        }
        Ok(processed)
    }

    /// Run the loop until `condition` holds, `quit` is requested, or
    /// `timeout` elapses.
    ///
    /// Returns whether `condition` was met.
    pub fn run_until<F>(&self, timeout: Duration, mut condition: F) -> Result<bool>
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if condition() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline || self.take_quit() {
                return Ok(false);
            }
            self.run_once((deadline - now).min(Duration::from_millis(10)))?;
        }
    }

    /// Run the loop until `quit` is requested.
    #[tracing::instrument(skip(self), target = "thread_updater::event_loop", level = "debug")]
    pub fn run(&self) -> Result<()> {
        tracing::debug!(target: targets::EVENT_LOOP, "starting event loop");
        while !self.take_quit() {
            self.run_once(IDLE_WAIT)?;
        }
        tracing::debug!(target: targets::EVENT_LOOP, "event loop stopped");
        Ok(())
    }

    fn handle_event(&self, event: LoopEvent) -> usize {
        match event {
            LoopEvent::Task(task) => {
                task();
                1
            }
            LoopEvent::Quit => {
                self.shared.quit.store(true, Ordering::SeqCst);
                0
            }
        }
    }

    /// Consume a pending quit request so the loop can be run again later.
    fn take_quit(&self) -> bool {
        self.shared.quit.swap(false, Ordering::SeqCst)
    }
}

/// Thread-safe handle to an [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("thread", &self.shared.affinity.thread_id())
            .finish_non_exhaustive()
    }
}

impl LoopHandle {
    /// Post a closure to run on the loop's thread.
    pub fn post_task<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(Box::new(task))
    }

    /// Ask the loop to return from `run`.
    pub fn quit(&self) {
        tracing::debug!(target: targets::EVENT_LOOP, "quit requested");
        // The loop may already be gone; quitting it is then moot.
        let _ = self.shared.sender.send(LoopEvent::Quit);
    }
}

impl Host for LoopHandle {
    fn is_main_thread(&self) -> bool {
        self.shared.affinity.is_same_thread()
    }

    fn post(&self, task: MainTask) -> Result<()> {
        self.shared
            .sender
            .send(LoopEvent::Task(task))
            .map_err(|_| DispatchError::LoopClosed)
    }

    fn create_tick_source(
        &self,
        interval: Duration,
        on_tick: TickCallback,
    ) -> Box<dyn TickSource> {
        self.shared.affinity.debug_assert_same_thread("create_tick_source");
        Box::new(LoopTimer {
            shared: self.shared.clone(),
            id: None,
            interval,
            on_tick,
        })
    }
}

/// A repeating tick source backed by the loop's timer manager.
struct LoopTimer {
    shared: Arc<LoopShared>,
    id: Option<TimerId>,
    interval: Duration,
    on_tick: TickCallback,
}

impl TickSource for LoopTimer {
    fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
        if let Some(id) = self.id {
            // A timer removed behind our back is simply no longer running.
            if self.shared.timers.set_interval(id, interval).is_err() {
                self.id = None;
            }
        }
    }

    fn interval(&self) -> Duration {
        self.id
            .and_then(|id| self.shared.timers.interval(id))
            .unwrap_or(self.interval)
    }

    fn start(&mut self) {
        if let Some(id) = self.id.take() {
            let _ = self.shared.timers.stop(id);
        }
        self.id = Some(
            self.shared
                .timers
                .start_repeating(self.interval, self.on_tick.clone()),
        );
    }

    fn stop(&mut self) -> std::result::Result<(), TimerError> {
        match self.id.take() {
            Some(id) => self.shared.timers.stop(id),
            None => Err(TimerError::NotActive),
        }
    }

    fn is_active(&self) -> bool {
        self.id.is_some_and(|id| self.shared.timers.is_active(id))
    }
}

impl Drop for LoopTimer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
