//! Deferred main-thread call dispatch.
//!
//! Worker threads often need work done on one privileged thread (usually a
//! GUI thread), for example to update a widget. This crate lets any thread
//! submit such work without blocking. A dispatcher that ticks on the
//! privileged thread runs the work:
//!
//! - **Continuous calls**: run on every tick until unregistered
//! - **Latest-wins calls**: only the newest pending call per target runs
//! - **Queued calls**: every submission runs, in order
//! - **Delayed calls**: run once, on the first tick after a delay
//! - **Self-starting**: the tick source starts on the first submission
//! - **Error policies**: propagate, suppress or report failing calls
//!
//! The dispatcher reaches its environment only through the [`Host`] and
//! [`TickSource`] traits. [`EventLoop`] is a small host bundled with the
//! crate; GUI toolkits can implement the traits on their own event queues.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::time::Duration;
//! use thread_updater::{Dispatcher, EventLoop, Target};
//!
//! let event_loop = EventLoop::new();
//! let dispatcher = Dispatcher::builder(event_loop.handle())
//!     .interval(Duration::from_millis(5))
//!     .build();
//!
//! let progress = Arc::new(AtomicUsize::new(0));
//! let show_progress = Target::infallible("show_progress", {
//!     let progress = progress.clone();
//!     move |value: usize| progress.store(value, Ordering::SeqCst)
//! });
//!
//! let worker = {
//!     let dispatcher = dispatcher.clone();
//!     let show_progress = show_progress.clone();
//!     std::thread::spawn(move || {
//!         for value in 1..=100 {
//!             dispatcher.call_latest(&show_progress, value);
//!         }
//!     })
//! };
//! worker.join().unwrap();
//!
//! let done = event_loop
//!     .run_until(Duration::from_secs(5), || progress.load(Ordering::SeqCst) == 100)
//!     .unwrap();
//! assert!(done);
//! ```

mod config;
mod dispatcher;
mod error;
mod event_loop;
mod host;
mod lifecycle;
pub mod logging;
mod pending;
mod policy;
pub mod registry;
mod report;
mod target;
pub mod thread_check;
mod timer;

pub use config::{DEFAULT_INTERVAL, DispatcherConfig, interval_from_secs};
pub use dispatcher::{Dispatcher, DispatcherBuilder, DrainStats};
pub use error::{
    BoxError, CallbackError, ConfigError, DispatchError, FailureKind, Result, TimerError,
};
pub use event_loop::{EventLoop, LoopHandle};
pub use host::{Host, MainTask, TickCallback, TickSource};
pub use logging::PerfSpan;
pub use pending::PendingCounts;
pub use policy::ErrorPolicy;
pub use registry::{
    DispatcherFactory, DispatcherRegistry, call_in_main, call_latest, delay, get_updater,
    global_registry, is_running, register_continuous, set_updater, start, stop,
    unregister_continuous,
};
pub use report::{CollectingSink, ErrorSink, FailureReport, StderrSink, TracingSink};
pub use target::{CallResult, PendingCall, Target, TargetId, TargetRef};
