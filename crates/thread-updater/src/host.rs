//! Contracts between the dispatcher and its host.
//!
//! The dispatcher needs three things from the environment it runs in:
//!
//! - a way to tell whether the caller is on the privileged thread,
//! - a way to hand a closure to the privileged thread without blocking
//!   (marshalling),
//! - a periodic tick source, created and controlled on the privileged
//!   thread, that calls `drain`.
//!
//! [`EventLoop`](crate::EventLoop) is the host shipped with this crate; GUI
//! toolkits can implement [`Host`] on top of their own timers and event
//! queues.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, TimerError};

/// A closure marshalled onto the privileged thread.
pub type MainTask = Box<dyn FnOnce() + Send + 'static>;

/// Callback invoked by a tick source on every tick.
///
/// Errors returned here surface to whatever drives the tick source.
pub type TickCallback = Arc<dyn Fn() -> Result<()> + Send + Sync + 'static>;

/// A periodic, repeating tick source.
///
/// All methods are only called on the privileged thread.
pub trait TickSource: Send {
    /// Change the tick period. Takes effect from the next tick.
    fn set_interval(&mut self, interval: Duration);

    /// The current tick period.
    fn interval(&self) -> Duration;

    /// Start (or restart) ticking.
    fn start(&mut self);

    /// Stop ticking.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::NotActive`] if the source was not ticking.
    fn stop(&mut self) -> std::result::Result<(), TimerError>;

    /// Whether the source is currently ticking.
    fn is_active(&self) -> bool;
}

/// The environment a dispatcher runs in.
pub trait Host: Send + Sync + 'static {
    /// Whether the current thread is the privileged thread.
    fn is_main_thread(&self) -> bool;

    /// Queue a task for execution on the privileged thread.
    ///
    /// Must not block. Tasks posted from one thread run in posting order.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::LoopClosed`](crate::DispatchError::LoopClosed)
    /// if the privileged thread no longer accepts tasks.
    fn post(&self, task: MainTask) -> Result<()>;

    /// Create an inactive repeating tick source bound to `on_tick`.
    fn create_tick_source(&self, interval: Duration, on_tick: TickCallback)
    -> Box<dyn TickSource>;
}
