//! Logging facilities for the thread updater.
//!
//! The crate is instrumented with `tracing` but never installs a subscriber.
//! To see its events, install one in the application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("thread_updater=debug")
//!     .init();
//! ```
//!
//! Drains and timer processing are traced at `trace` level, lifecycle
//! transitions at `debug`, and failures reported by [`TracingSink`] at
//! `error`.
//!
//! [`TracingSink`]: crate::report::TracingSink

/// Span names used for tracing.
pub mod span_names {
    /// One dispatcher drain.
    pub const DRAIN: &str = "thread_updater::drain";
    /// One event loop iteration.
    pub const EVENT_LOOP: &str = "thread_updater::event_loop";
}

/// Target names for log filtering.
pub mod targets {
    /// Crate-wide target.
    pub const CORE: &str = "thread_updater";
    /// Submission and drain.
    pub const DISPATCH: &str = "thread_updater::dispatch";
    /// Start/stop transitions and tick source management.
    pub const LIFECYCLE: &str = "thread_updater::lifecycle";
    /// Timer manager.
    pub const TIMER: &str = "thread_updater::timer";
    /// Event loop host.
    pub const EVENT_LOOP: &str = "thread_updater::event_loop";
    /// Process-wide dispatcher registry.
    pub const REGISTRY: &str = "thread_updater::registry";
}

/// A guard that keeps a tracing span entered until dropped.
///
/// Useful for timing an operation, e.g. one drain.
#[derive(Debug)]
pub struct PerfSpan {
    _span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Enter a `trace`-level span named after the operation.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::trace_span!(target: "thread_updater::perf", "perf", operation = name);
        Self {
            _span: span.entered(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perf_span() {
        let _span = PerfSpan::new(span_names::DRAIN);
    }

    #[test]
    fn test_targets_share_prefix() {
        for target in [
            targets::DISPATCH,
            targets::LIFECYCLE,
            targets::TIMER,
            targets::EVENT_LOOP,
            targets::REGISTRY,
        ] {
            assert!(target.starts_with(targets::CORE));
        }
    }
}
