//! The dispatcher: submission from any thread, drain on the privileged thread.
//!
//! Work is submitted in one of four ways:
//!
//! - [`register_continuous`](Dispatcher::register_continuous): run on every
//!   tick until unregistered.
//! - [`call_latest`](Dispatcher::call_latest): run once on the next tick;
//!   newer submissions for the same target replace older ones.
//! - [`call_in_main`](Dispatcher::call_in_main): run once on the next tick;
//!   every submission is kept and replayed in order.
//! - [`delay`](Dispatcher::delay): run once on the first tick after the
//!   delay has elapsed.
//!
//! Every submission makes sure the tick source is running. Each tick calls
//! [`drain`](Dispatcher::drain), which empties the collections under their
//! locks and then runs the calls with no lock held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::{DispatcherConfig, interval_from_secs};
use crate::error::Result;
use crate::host::{Host, TickCallback};
use crate::lifecycle::Lifecycle;
use crate::logging::{PerfSpan, span_names, targets};
use crate::pending::{
    ContinuousCalls, DelayedCall, DelayedCalls, LatestCalls, PendingCounts, QueuedCalls,
};
use crate::policy::{CallOutcome, ErrorPolicy, run_guarded};
use crate::report::{ErrorSink, TracingSink};
use crate::target::{PendingCall, Target, TargetId};

/// Counts of the calls run by one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Calls invoked, whether or not they succeeded.
    pub invoked: usize,
    /// Calls that returned an error or panicked.
    pub failed: usize,
}

impl DrainStats {
    /// Calls that completed successfully.
    pub fn succeeded(&self) -> usize {
        self.invoked - self.failed
    }

    fn record(&mut self, outcome: CallOutcome) {
        self.invoked += 1;
        if outcome == CallOutcome::Failed {
            self.failed += 1;
        }
    }
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    host: Arc<dyn Host>,
    config: DispatcherConfig,
    sink: Option<Arc<dyn ErrorSink>>,
}

impl DispatcherBuilder {
    /// Set the tick interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the error policy.
    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.config.error_policy = policy;
        self
    }

    /// Stop the tick source after any drain that leaves no work pending.
    pub fn stop_when_idle(mut self, stop: bool) -> Self {
        self.config.stop_when_idle = stop;
        self
    }

    /// Replace all settings with `config`.
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Send failure reports to `sink` instead of the default [`TracingSink`].
    pub fn error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the dispatcher. It starts stopped; the first submission
    /// starts it.
    pub fn build(self) -> Arc<Dispatcher> {
        let Self { host, config, sink } = self;
        let sink = sink.unwrap_or_else(|| Arc::new(TracingSink));

        Arc::new_cyclic(|this: &Weak<Dispatcher>| {
            let this = this.clone();
            let on_tick: TickCallback = Arc::new(move || match this.upgrade() {
                Some(dispatcher) => dispatcher.drain().map(|_| ()),
                None => Ok(()),
            });

            Dispatcher {
                continuous: ContinuousCalls::default(),
                latest: LatestCalls::default(),
                queued: QueuedCalls::default(),
                delayed: DelayedCalls::default(),
                lifecycle: Lifecycle::new(host, config.interval, on_tick),
                error_policy: Mutex::new(config.error_policy),
                stop_when_idle: AtomicBool::new(config.stop_when_idle),
                sink,
            }
        })
    }
}

/// Runs submitted calls on the privileged thread.
///
/// Shared as `Arc<Dispatcher>`; all submission methods take `&self` and may
/// be called from any thread without blocking on the privileged thread.
pub struct Dispatcher {
    continuous: ContinuousCalls,
    latest: LatestCalls,
    queued: QueuedCalls,
    delayed: DelayedCalls,
    lifecycle: Arc<Lifecycle>,
    error_policy: Mutex<ErrorPolicy>,
    stop_when_idle: AtomicBool,
    sink: Arc<dyn ErrorSink>,
}

static_assertions::assert_impl_all!(Dispatcher: Send, Sync);

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("running", &self.is_running())
            .field("interval", &self.interval())
            .field("error_policy", &self.error_policy())
            .field("pending", &self.pending_counts())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Start building a dispatcher on `host`.
    pub fn builder(host: impl Host) -> DispatcherBuilder {
        DispatcherBuilder {
            host: Arc::new(host),
            config: DispatcherConfig::default(),
            sink: None,
        }
    }

    /// Create a dispatcher on `host` with default settings.
    pub fn new(host: impl Host) -> Arc<Self> {
        Self::builder(host).build()
    }

    /// Create a dispatcher from a validated configuration.
    pub fn with_config(host: impl Host, config: DispatcherConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Self::builder(host).config(config).build())
    }

    // -------------------------------------------------------------------------
    // Submission
    // -------------------------------------------------------------------------

    /// Run `target(args)` on every tick until unregistered.
    ///
    /// Registering the same target again replaces its arguments.
    pub fn register_continuous<A>(&self, target: &Target<A>, args: A)
    where
        A: Clone + Send + Sync + 'static,
    {
        self.continuous.register(target.bind_repeating(args));
        self.ensure_running();
    }

    /// Stop running a continuous target. Returns whether it was registered.
    ///
    /// Takes effect from the next drain; a drain already in progress still
    /// runs the target once.
    pub fn unregister_continuous(&self, target: TargetId) -> bool {
        self.continuous.unregister(target)
    }

    /// Run `target(args)` on the next tick, replacing any call to the same
    /// target still waiting there.
    pub fn call_latest<A>(&self, target: &Target<A>, args: A)
    where
        A: Send + 'static,
    {
        self.latest.submit(target.bind(args));
        self.ensure_running();
    }

    /// Run `target(args)` immediately when called on the privileged thread,
    /// otherwise behave like [`call_latest`](Self::call_latest).
    ///
    /// # Errors
    ///
    /// The immediate call goes through the error policy and fails only under
    /// [`ErrorPolicy::Propagate`].
    pub fn now_call_latest<A>(&self, target: &Target<A>, args: A) -> Result<()>
    where
        A: Send + 'static,
    {
        if self.lifecycle.is_main_thread() {
            self.call_now(target, args)
        } else {
            self.call_latest(target, args);
            Ok(())
        }
    }

    /// Run `target(args)` on the next tick. Every submission is kept and
    /// calls to one target run in submission order.
    pub fn call_in_main<A>(&self, target: &Target<A>, args: A)
    where
        A: Send + 'static,
    {
        self.queued.push(target.bind(args));
        self.ensure_running();
    }

    /// Run `target(args)` immediately when called on the privileged thread,
    /// otherwise behave like [`call_in_main`](Self::call_in_main).
    ///
    /// # Errors
    ///
    /// See [`now_call_latest`](Self::now_call_latest).
    pub fn now_call_in_main<A>(&self, target: &Target<A>, args: A) -> Result<()>
    where
        A: Send + 'static,
    {
        if self.lifecycle.is_main_thread() {
            self.call_now(target, args)
        } else {
            self.call_in_main(target, args);
            Ok(())
        }
    }

    /// Run `target(args)` once, on the first tick at least `delay` after now.
    pub fn delay<A>(&self, delay: Duration, target: &Target<A>, args: A)
    where
        A: Send + 'static,
    {
        let submitted_at = Instant::now();
        self.delayed
            .push(DelayedCall::new(submitted_at, delay, target.bind(args)));
        self.ensure_running();
    }

    /// [`delay`](Self::delay) with the delay given in seconds.
    ///
    /// Negative and NaN delays fire on the next tick; an infinite delay
    /// never fires.
    pub fn delay_secs<A>(&self, secs: f64, target: &Target<A>, args: A)
    where
        A: Send + 'static,
    {
        let delay = Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX);
        self.delay(delay, target, args);
    }

    fn call_now<A>(&self, target: &Target<A>, args: A) -> Result<()>
    where
        A: 'static,
    {
        let target_ref = target.to_ref();
        run_guarded(self.error_policy(), &*self.sink, &target_ref, || {
            target.call(args)
        })?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start the tick source unless it is already running.
    ///
    /// Safe to call from any thread, including from inside a drain.
    pub fn ensure_running(&self) {
        self.lifecycle.ensure_running();
    }

    /// Start (or restart) the tick source.
    ///
    /// Off the privileged thread the request is posted to it and this
    /// returns immediately.
    pub fn start(&self) {
        self.lifecycle.start();
    }

    /// Stop the tick source. Pending work is kept.
    ///
    /// With `clear_state` the dispatcher reports itself as stopped; the next
    /// submission starts it again.
    pub fn stop(&self, clear_state: bool) {
        self.lifecycle.stop(clear_state);
    }

    /// Replace the tick source with a fresh, inactive one.
    pub fn create_tick_source(&self) {
        self.lifecycle.create_tick_source();
    }

    /// Whether the dispatcher is running (or a start has been requested).
    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Whether a tick source exists and is currently ticking.
    pub fn is_ticking(&self) -> bool {
        self.lifecycle.is_ticking()
    }

    /// The configured tick interval.
    pub fn interval(&self) -> Duration {
        self.lifecycle.interval()
    }

    /// The interval of the live tick source, if one has been created.
    pub fn tick_interval(&self) -> Option<Duration> {
        self.lifecycle.tick_interval()
    }

    /// Change the tick interval. A running dispatcher is restarted with the
    /// new interval.
    pub fn set_interval(&self, interval: Duration) {
        self.lifecycle.set_interval(interval);
    }

    /// The tick interval in seconds.
    pub fn timeout_secs(&self) -> f64 {
        self.interval().as_secs_f64()
    }

    /// Change the tick interval, given in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidInterval`](crate::ConfigError::InvalidInterval)
    /// unless `secs` is finite and positive.
    pub fn set_timeout_secs(&self, secs: f64) -> Result<()> {
        self.set_interval(interval_from_secs(secs)?);
        Ok(())
    }

    /// Stop and discard the tick source and drop all pending work.
    ///
    /// Continuous registrations, latest and queued calls, and delayed calls
    /// are all discarded. The next submission starts the dispatcher again.
    pub fn shutdown(&self) {
        tracing::debug!(target: targets::DISPATCH, pending = ?self.pending_counts(), "shutting down");
        self.continuous.clear();
        drop(self.latest.take());
        drop(self.queued.take());
        self.delayed.clear();
        self.lifecycle.shutdown();
    }

    // -------------------------------------------------------------------------
    // Error handling
    // -------------------------------------------------------------------------

    /// The policy applied to failing callables.
    pub fn error_policy(&self) -> ErrorPolicy {
        *self.error_policy.lock()
    }

    /// Change the error policy. Takes effect from the next drain.
    pub fn set_error_policy(&self, policy: ErrorPolicy) {
        *self.error_policy.lock() = policy;
    }

    /// Whether ticking stops once a drain leaves nothing pending.
    pub fn stop_when_idle(&self) -> bool {
        self.stop_when_idle.load(Ordering::SeqCst)
    }

    /// Enable or disable stopping when idle.
    pub fn set_stop_when_idle(&self, stop: bool) {
        self.stop_when_idle.store(stop, Ordering::SeqCst);
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Number of entries waiting in each collection.
    pub fn pending_counts(&self) -> PendingCounts {
        PendingCounts {
            continuous: self.continuous.len(),
            latest: self.latest.len(),
            queued: self.queued.len(),
            delayed: self.delayed.len(),
        }
    }

    /// Whether any collection holds work.
    pub fn has_pending(&self) -> bool {
        !self.pending_counts().is_empty()
    }

    /// Time until the earliest delayed call becomes eligible.
    pub fn next_delayed_in(&self) -> Option<Duration> {
        self.delayed.time_until_next(Instant::now())
    }

    // -------------------------------------------------------------------------
    // Drain
    // -------------------------------------------------------------------------

    /// Run all pending work. This is the tick callback; call it only on the
    /// privileged thread.
    ///
    /// Delayed calls that became eligible run first, then every continuous
    /// call, then latest-wins calls, then queued calls grouped by target.
    ///
    /// # Errors
    ///
    /// Under [`ErrorPolicy::Propagate`], the first failing call aborts the
    /// drain and its error is returned. Calls taken for this drain but not
    /// yet run are dropped; continuous registrations and delayed calls that
    /// were not yet eligible stay in place.
    #[tracing::instrument(skip(self), target = "thread_updater::dispatch", level = "trace")]
    pub fn drain(&self) -> Result<DrainStats> {
        self.drain_at(Instant::now())
    }

    pub(crate) fn drain_at(&self, now: Instant) -> Result<DrainStats> {
        debug_assert!(
            self.lifecycle.is_main_thread(),
            "Dispatcher::drain called off the privileged thread"
        );
        let _perf = PerfSpan::new(span_names::DRAIN);

        let continuous = self.continuous.snapshot();
        let latest = self.latest.take();
        let queued = self.queued.take();
        let delayed = self.delayed.take_ready(now);

        let policy = self.error_policy();
        let sink = &*self.sink;
        let mut stats = DrainStats::default();

        for call in delayed {
            stats.record(Self::run_pending(policy, sink, call)?);
        }
        for call in &continuous {
            stats.record(run_guarded(policy, sink, call.target(), || call.invoke())?);
        }
        for call in latest {
            stats.record(Self::run_pending(policy, sink, call)?);
        }
        for call in queued.into_iter().flatten() {
            stats.record(Self::run_pending(policy, sink, call)?);
        }

        if stats.invoked > 0 {
            tracing::trace!(
                target: targets::DISPATCH,
                invoked = stats.invoked,
                failed = stats.failed,
                "drain complete"
            );
        }

        if self.stop_when_idle() && !self.has_pending() {
            self.stop_idle();
        }
        Ok(stats)
    }

    fn run_pending(
        policy: ErrorPolicy,
        sink: &dyn ErrorSink,
        call: PendingCall,
    ) -> Result<CallOutcome> {
        let target = call.target().clone();
        Ok(run_guarded(policy, sink, &target, move || call.invoke())?)
    }

    fn stop_idle(&self) {
        tracing::debug!(target: targets::DISPATCH, "no pending work, stopping");
        self.lifecycle.stop(true);
        // A producer that saw `running == true` just before the stop did not
        // request a start; pick its work up here.
        if self.has_pending() {
            self.lifecycle.ensure_running();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.lifecycle.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BoxError, DispatchError, FailureKind};
    use crate::event_loop::EventLoop;
    use crate::report::CollectingSink;

    fn recorder<A>(name: &str) -> (Target<A>, Arc<Mutex<Vec<A>>>)
    where
        A: Send + 'static,
    {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let target = Target::infallible(name, move |value: A| seen_clone.lock().push(value));
        (target, seen)
    }

    fn failing(name: &str) -> Target<()> {
        Target::new(name, |_: ()| Err::<(), BoxError>("boom".into()))
    }

    #[test]
    fn test_latest_wins() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::new(event_loop.handle());
        let (target, seen) = recorder("latest");

        dispatcher.call_latest(&target, 1);
        dispatcher.call_latest(&target, 2);
        dispatcher.call_latest(&target, 3);
        assert_eq!(dispatcher.pending_counts().latest, 1);

        let stats = dispatcher.drain().unwrap();
        assert_eq!(stats.invoked, 1);
        assert_eq!(*seen.lock(), vec![3]);

        dispatcher.drain().unwrap();
        assert_eq!(*seen.lock(), vec![3]);
    }

    #[test]
    fn test_queued_preserves_every_call() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::new(event_loop.handle());
        let (target, seen) = recorder("queued");

        for i in 0..5 {
            dispatcher.call_in_main(&target, i);
        }
        assert_eq!(dispatcher.pending_counts().queued, 5);

        dispatcher.drain().unwrap();
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
        assert!(!dispatcher.has_pending());
    }

    #[test]
    fn test_continuous_runs_until_unregistered() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::new(event_loop.handle());
        let (target, seen) = recorder("continuous");

        dispatcher.register_continuous(&target, 'a');
        dispatcher.register_continuous(&target, 'b');
        for _ in 0..3 {
            dispatcher.drain().unwrap();
        }
        assert_eq!(*seen.lock(), vec!['b', 'b', 'b']);

        assert!(dispatcher.unregister_continuous(target.id()));
        assert!(!dispatcher.unregister_continuous(target.id()));
        dispatcher.drain().unwrap();
        assert_eq!(seen.lock().len(), 3);
    }

    #[test]
    fn test_delayed_fires_once_after_delay() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::new(event_loop.handle());
        let (target, seen) = recorder("delayed");

        let before = Instant::now();
        dispatcher.delay(Duration::from_millis(500), &target, 7);
        assert!(dispatcher.next_delayed_in().is_some());

        dispatcher.drain_at(before + Duration::from_millis(300)).unwrap();
        assert!(seen.lock().is_empty());
        assert_eq!(dispatcher.pending_counts().delayed, 1);

        dispatcher
            .drain_at(Instant::now() + Duration::from_millis(500))
            .unwrap();
        assert_eq!(*seen.lock(), vec![7]);

        dispatcher
            .drain_at(Instant::now() + Duration::from_secs(1))
            .unwrap();
        assert_eq!(*seen.lock(), vec![7]);
        assert!(dispatcher.next_delayed_in().is_none());
    }

    #[test]
    fn test_delay_secs_edge_values() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::new(event_loop.handle());
        let (target, seen) = recorder("delay_secs");

        dispatcher.delay_secs(-1.0, &target, 1);
        dispatcher.delay_secs(f64::NAN, &target, 2);
        dispatcher.delay_secs(f64::INFINITY, &target, 3);

        dispatcher.drain().unwrap();
        assert_eq!(*seen.lock(), vec![1, 2]);
        assert_eq!(dispatcher.pending_counts().delayed, 1);
    }

    #[test]
    fn test_drain_order() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::new(event_loop.handle());
        let (target, seen) = recorder("order");

        dispatcher.call_in_main(&target, "queued");
        dispatcher.call_latest(&target, "latest");
        dispatcher.register_continuous(&target, "continuous");
        dispatcher.delay(Duration::ZERO, &target, "delayed");

        dispatcher.drain().unwrap();
        assert_eq!(
            *seen.lock(),
            vec!["delayed", "continuous", "latest", "queued"]
        );
    }

    #[test]
    fn test_report_policy_isolates_failures() {
        let event_loop = EventLoop::new();
        let sink = Arc::new(CollectingSink::new());
        let dispatcher = Dispatcher::builder(event_loop.handle())
            .error_policy(ErrorPolicy::Report)
            .error_sink(sink.clone())
            .build();
        let (target, seen) = recorder("after");
        let bad = failing("bad");

        dispatcher.call_in_main(&bad, ());
        dispatcher.call_in_main(&target, 1);

        let stats = dispatcher.drain().unwrap();
        assert_eq!(stats, DrainStats { invoked: 2, failed: 1 });
        assert_eq!(stats.succeeded(), 1);
        assert_eq!(*seen.lock(), vec![1]);

        let reports = sink.take();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].target_name, "bad");
        assert_eq!(reports[0].target_id, bad.id());
        assert_eq!(reports[0].kind, FailureKind::Error);
    }

    #[test]
    fn test_suppress_policy_hides_panics() {
        let event_loop = EventLoop::new();
        let sink = Arc::new(CollectingSink::new());
        let dispatcher = Dispatcher::builder(event_loop.handle())
            .error_policy(ErrorPolicy::Suppress)
            .error_sink(sink.clone())
            .build();
        let (target, seen) = recorder("after");
        let panicking = Target::infallible("panics", |_: ()| panic!("kaboom"));

        dispatcher.call_latest(&panicking, ());
        dispatcher.call_latest(&target, 1);

        let stats = dispatcher.drain().unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(*seen.lock(), vec![1]);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_propagate_aborts_tick_but_dispatcher_survives() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::builder(event_loop.handle())
            .error_policy(ErrorPolicy::Propagate)
            .build();
        let (target, seen) = recorder("after");
        let bad = failing("bad");

        dispatcher.call_in_main(&bad, ());
        dispatcher.call_in_main(&target, 1);

        match dispatcher.drain() {
            Err(DispatchError::Callback(err)) => {
                assert_eq!(err.target_name(), "bad");
                assert_eq!(err.message(), "boom");
            }
            other => panic!("expected a callback error, got {other:?}"),
        }
        assert!(seen.lock().is_empty());

        dispatcher.call_in_main(&target, 2);
        dispatcher.drain().unwrap();
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_now_call_runs_inline_on_privileged_thread() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::new(event_loop.handle());
        let (target, seen) = recorder("now");

        dispatcher.now_call_latest(&target, 1).unwrap();
        dispatcher.now_call_in_main(&target, 2).unwrap();
        assert_eq!(*seen.lock(), vec![1, 2]);
        assert!(!dispatcher.has_pending());

        dispatcher.set_error_policy(ErrorPolicy::Propagate);
        assert!(dispatcher.now_call_in_main(&failing("bad"), ()).is_err());
    }

    #[test]
    fn test_now_call_defers_off_privileged_thread() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::new(event_loop.handle());
        let (target, seen) = recorder("deferred");

        let remote = dispatcher.clone();
        let remote_target = target.clone();
        std::thread::spawn(move || {
            remote.now_call_latest(&remote_target, 1).unwrap();
            remote.now_call_in_main(&remote_target, 2).unwrap();
        })
        .join()
        .unwrap();

        assert!(seen.lock().is_empty());
        dispatcher.drain().unwrap();
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_reentrant_submission_runs_next_drain() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::new(event_loop.handle());
        let (inner, seen) = recorder("inner");

        let outer = Target::infallible("outer", {
            let dispatcher = Arc::downgrade(&dispatcher);
            let inner = inner.clone();
            move |value: i32| {
                if let Some(dispatcher) = dispatcher.upgrade() {
                    dispatcher.call_in_main(&inner, value * 10);
                    dispatcher.call_latest(&inner, value);
                }
            }
        });

        dispatcher.call_in_main(&outer, 4);
        dispatcher.drain().unwrap();
        assert!(seen.lock().is_empty());
        assert!(dispatcher.is_running());

        dispatcher.drain().unwrap();
        assert_eq!(*seen.lock(), vec![4, 40]);
    }

    #[test]
    fn test_submission_starts_dispatcher() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::new(event_loop.handle());
        let (target, _) = recorder("start");
        assert!(!dispatcher.is_running());

        dispatcher.call_latest(&target, 1);
        assert!(dispatcher.is_running());
        assert!(dispatcher.is_ticking());
    }

    #[test]
    fn test_stop_when_idle() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::builder(event_loop.handle())
            .stop_when_idle(true)
            .build();
        let (target, _) = recorder("idle");

        dispatcher.call_in_main(&target, 1);
        assert!(dispatcher.is_running());

        dispatcher.drain().unwrap();
        assert!(!dispatcher.is_running());
        assert!(!dispatcher.is_ticking());

        dispatcher.register_continuous(&target, 2);
        dispatcher.drain().unwrap();
        assert!(dispatcher.is_running());
    }

    #[test]
    fn test_timeout_secs_round_trip() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::new(event_loop.handle());

        dispatcher.set_timeout_secs(0.5).unwrap();
        assert_eq!(dispatcher.interval(), Duration::from_millis(500));
        assert_eq!(dispatcher.timeout_secs(), 0.5);
        assert!(dispatcher.set_timeout_secs(0.0).is_err());
        assert!(dispatcher.set_timeout_secs(-3.0).is_err());
        assert_eq!(dispatcher.interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_with_config_validates() {
        let event_loop = EventLoop::new();
        let bad = DispatcherConfig::new().interval(Duration::ZERO);
        assert!(matches!(
            Dispatcher::with_config(event_loop.handle(), bad),
            Err(DispatchError::Config(_))
        ));

        let config = DispatcherConfig::new()
            .interval(Duration::from_millis(20))
            .error_policy(ErrorPolicy::Suppress);
        let dispatcher = Dispatcher::with_config(event_loop.handle(), config).unwrap();
        assert_eq!(dispatcher.interval(), Duration::from_millis(20));
        assert_eq!(dispatcher.error_policy(), ErrorPolicy::Suppress);
    }

    #[test]
    fn test_drop_stops_tick_source() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::new(event_loop.handle());
        let (target, _) = recorder("drop");

        dispatcher.call_latest(&target, 1);
        assert_eq!(event_loop.active_timers(), 1);

        drop(dispatcher);
        assert_eq!(event_loop.active_timers(), 0);
    }

    #[test]
    fn test_drop_on_worker_stops_tick_source_on_loop() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::new(event_loop.handle());
        let (target, _) = recorder("drop_remote");

        dispatcher.call_latest(&target, 1);
        assert_eq!(event_loop.active_timers(), 1);

        // The worker drops the last handle.
        std::thread::spawn(move || drop(dispatcher)).join().unwrap();
        assert_eq!(event_loop.active_timers(), 1);

        event_loop.process_pending().unwrap();
        assert_eq!(event_loop.active_timers(), 0);
    }

    #[test]
    fn test_shutdown_discards_pending_work() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::new(event_loop.handle());
        let (target, seen) = recorder("discarded");

        dispatcher.register_continuous(&target, 1);
        dispatcher.call_latest(&target, 2);
        dispatcher.call_in_main(&target, 3);
        dispatcher.delay(Duration::ZERO, &target, 4);
        dispatcher.delay(Duration::from_secs(60), &target, 5);
        assert!(dispatcher.has_pending());

        dispatcher.shutdown();
        assert!(dispatcher.pending_counts().is_empty());
        assert!(dispatcher.next_delayed_in().is_none());
        assert!(!dispatcher.is_running());
        assert_eq!(event_loop.active_timers(), 0);

        dispatcher.drain().unwrap();
        assert!(seen.lock().is_empty());

        // Usable again afterwards.
        dispatcher.call_in_main(&target, 6);
        assert!(dispatcher.is_running());
        dispatcher.drain().unwrap();
        assert_eq!(*seen.lock(), vec![6]);
    }

    #[test]
    fn test_continuous_failures_are_isolated() {
        const TICKS: usize = 4;

        for (policy, expected_reports) in [(ErrorPolicy::Report, TICKS), (ErrorPolicy::Suppress, 0)] {
            let event_loop = EventLoop::new();
            let sink = Arc::new(CollectingSink::new());
            let dispatcher = Dispatcher::builder(event_loop.handle())
                .error_policy(policy)
                .error_sink(sink.clone())
                .build();
            let bad = failing("bad_poll");
            let (good, seen) = recorder("good_poll");

            dispatcher.register_continuous(&bad, ());
            dispatcher.register_continuous(&good, ());
            for _ in 0..TICKS {
                let stats = dispatcher.drain().unwrap();
                assert_eq!(stats, DrainStats { invoked: 2, failed: 1 });
            }

            assert_eq!(seen.lock().len(), TICKS, "{policy:?}");
            assert_eq!(sink.len(), expected_reports, "{policy:?}");
            assert_eq!(dispatcher.pending_counts().continuous, 2);
        }
    }

    #[test]
    fn test_continuous_failure_under_propagate_keeps_registration() {
        let event_loop = EventLoop::new();
        let dispatcher = Dispatcher::builder(event_loop.handle())
            .error_policy(ErrorPolicy::Propagate)
            .build();
        let bad = failing("bad_poll");

        dispatcher.register_continuous(&bad, ());
        assert!(matches!(dispatcher.drain(), Err(DispatchError::Callback(_))));
        assert!(matches!(dispatcher.drain(), Err(DispatchError::Callback(_))));
        assert_eq!(dispatcher.pending_counts().continuous, 1);
    }
}
