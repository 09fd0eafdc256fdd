//! Error policy and the guarded execution of scheduled calls.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Once;

use serde::{Deserialize, Serialize};

use crate::error::{CallbackError, ConfigError};
use crate::logging::targets;
use crate::report::{ErrorSink, FailureReport};
use crate::target::{CallResult, TargetRef};

/// How failures of scheduled calls are handled during a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorPolicy {
    /// Return the failure from `drain`, skipping the rest of that tick.
    #[serde(rename = "raise", alias = "propagate")]
    Propagate,
    /// Discard the failure and continue with the next call.
    #[serde(rename = "hide", alias = "suppress")]
    Suppress,
    /// Send a report to the error sink and continue with the next call.
    #[default]
    #[serde(rename = "print", alias = "report")]
    Report,
}

impl ErrorPolicy {
    /// The configuration name of this policy.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Propagate => "raise",
            Self::Suppress => "hide",
            Self::Report => "print",
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raise" | "propagate" => Ok(Self::Propagate),
            "hide" | "suppress" => Ok(Self::Suppress),
            "print" | "report" => Ok(Self::Report),
            _ => Err(ConfigError::UnknownPolicy(s.to_owned())),
        }
    }
}

/// Outcome of a guarded call that did not propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallOutcome {
    Completed,
    Failed,
}

thread_local! {
    /// Nesting depth of `run_guarded` on this thread.
    static GUARD_DEPTH: Cell<usize> = const { Cell::new(0) };
    /// Backtrace of the last panic raised inside a guarded call.
    static PANIC_BACKTRACE: Cell<Option<Backtrace>> = const { Cell::new(None) };
}

static BACKTRACE_HOOK: Once = Once::new();

/// Chain a panic hook that records a backtrace for panics inside guarded
/// calls. Panics elsewhere only reach the previous hook.
fn install_backtrace_hook() {
    BACKTRACE_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if GUARD_DEPTH.with(Cell::get) > 0 {
                PANIC_BACKTRACE.with(|slot| slot.set(Some(Backtrace::force_capture())));
            }
            previous(info);
        }));
    });
}

/// Run `call` under `catch_unwind`, returning the panic backtrace alongside
/// the payload.
fn catch_with_backtrace<F>(call: F) -> Result<CallResult, (Box<dyn Any + Send>, Option<Backtrace>)>
where
    F: FnOnce() -> CallResult,
{
    install_backtrace_hook();
    GUARD_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let result = panic::catch_unwind(AssertUnwindSafe(call));
    GUARD_DEPTH.with(|depth| depth.set(depth.get() - 1));

    // Taken in both cases so a nested catch cannot leave a stale trace.
    let backtrace = PANIC_BACKTRACE.with(Cell::take);
    result.map_err(|payload| (payload, backtrace))
}

/// Run one scheduled call, isolating its failure according to `policy`.
///
/// Panics are caught and treated like returned errors. Under
/// [`ErrorPolicy::Propagate`] the failure is handed back to the caller;
/// otherwise it is reported or discarded and `Ok(CallOutcome::Failed)` is
/// returned.
pub(crate) fn run_guarded<F>(
    policy: ErrorPolicy,
    sink: &dyn ErrorSink,
    target: &TargetRef,
    call: F,
) -> Result<CallOutcome, CallbackError>
where
    F: FnOnce() -> CallResult,
{
    let failure = match catch_with_backtrace(call) {
        Ok(Ok(())) => return Ok(CallOutcome::Completed),
        Ok(Err(err)) => CallbackError::from_error(target, err),
        Err((payload, backtrace)) => CallbackError::from_panic(target, payload, backtrace),
    };

    match policy {
        ErrorPolicy::Propagate => Err(failure),
        ErrorPolicy::Suppress => {
            tracing::trace!(
                target: targets::DISPATCH,
                target_name = target.name(),
                "suppressed failure: {}",
                failure.message()
            );
            Ok(CallOutcome::Failed)
        }
        ErrorPolicy::Report => {
            sink.report(&FailureReport::from(&failure));
            Ok(CallOutcome::Failed)
        }
    }
}
