//! Error-reporting sinks used by the `Report` error policy.

use std::fmt;
use std::io::Write as _;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::error::{CallbackError, FailureKind};
use crate::logging::targets;
use crate::target::TargetId;

/// An owned, formatted record of one failed scheduled call.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureReport {
    /// Name of the failing target.
    pub target_name: String,
    /// Identity of the failing target.
    pub target_id: TargetId,
    /// Whether the call returned an error or panicked.
    pub kind: FailureKind,
    /// The failure and every error in its source chain, outermost first.
    pub trace: Vec<String>,
    /// When the failure was observed.
    pub occurred_at: SystemTime,
    /// Stack trace of the panicking thread, for panics only.
    pub backtrace: Option<String>,
}

impl From<&CallbackError> for FailureReport {
    fn from(err: &CallbackError) -> Self {
        Self {
            target_name: err.target_name().to_owned(),
            target_id: err.target_id(),
            kind: err.kind(),
            trace: err.trace(),
            occurred_at: SystemTime::now(),
            backtrace: err.panic_trace().map(str::to_owned),
        }
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            FailureKind::Error => "Error",
            FailureKind::Panic => "Panic",
        };
        write!(f, "{what} in {} ({})", self.target_name, self.target_id)?;
        let mut trace = self.trace.iter();
        if let Some(first) = trace.next() {
            write!(f, ": {first}")?;
        }
        for cause in trace {
            write!(f, "\n    caused by: {cause}")?;
        }
        if let Some(backtrace) = &self.backtrace {
            write!(f, "\n    backtrace:\n{backtrace}")?;
        }
        Ok(())
    }
}

/// Destination for failure reports.
pub trait ErrorSink: Send + Sync {
    /// Record one failure. Must not panic.
    fn report(&self, report: &FailureReport);
}

/// Sink that emits failures as `tracing` error events. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, report: &FailureReport) {
        tracing::error!(
            target: targets::DISPATCH,
            target_name = %report.target_name,
            target_id = report.target_id.as_u64(),
            kind = ?report.kind,
            "{report}"
        );
    }
}

/// Sink that writes failures to standard error.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrSink;

impl ErrorSink for StderrSink {
    fn report(&self, report: &FailureReport) {
        let mut stderr = std::io::stderr().lock();
        // A closed stderr has nowhere left to report to.
        let _ = writeln!(stderr, "{report}");
    }
}

/// Sink that keeps every report in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    reports: Mutex<Vec<FailureReport>>,
}

impl CollectingSink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of all reports collected so far.
    pub fn reports(&self) -> Vec<FailureReport> {
        self.reports.lock().clone()
    }

    /// Remove and return all collected reports.
    pub fn take(&self) -> Vec<FailureReport> {
        std::mem::take(&mut *self.reports.lock())
    }

    /// Number of reports collected.
    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    /// Whether no report has been collected.
    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl ErrorSink for CollectingSink {
    fn report(&self, report: &FailureReport) {
        self.reports.lock().push(report.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(trace: &[&str]) -> FailureReport {
        FailureReport {
            target_name: "update_label".into(),
            target_id: TargetId(7),
            kind: FailureKind::Error,
            trace: trace.iter().map(|s| s.to_string()).collect(),
            occurred_at: SystemTime::now(),
            backtrace: None,
        }
    }

    #[test]
    fn test_report_display_includes_chain() {
        let text = report(&["outer", "inner"]).to_string();
        assert_eq!(text, "Error in update_label (#7): outer\n    caused by: inner");
    }

    #[test]
    fn test_report_display_appends_backtrace() {
        let mut panic = report(&["kaboom"]);
        panic.kind = FailureKind::Panic;
        panic.backtrace = Some("   0: update_label\n   1: main".into());
        assert_eq!(
            panic.to_string(),
            "Panic in update_label (#7): kaboom\n    backtrace:\n   0: update_label\n   1: main"
        );
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        assert!(sink.is_empty());

        sink.report(&report(&["first"]));
        sink.report(&report(&["second"]));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.reports()[1].trace, vec!["second"]);

        assert_eq!(sink.take().len(), 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_builtin_sinks_do_not_panic() {
        TracingSink.report(&report(&["traced"]));
        StderrSink.report(&report(&["printed"]));
    }
}
