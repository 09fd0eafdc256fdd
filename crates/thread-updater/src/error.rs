//! Error types for the thread updater.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;

use thiserror::Error;

use crate::target::{TargetId, TargetRef};

/// A boxed, thread-safe error returned by scheduled callables.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The main error type for dispatcher operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A scheduled callable failed while the error policy was `Propagate`.
    #[error(transparent)]
    Callback(#[from] CallbackError),
    /// No dispatcher is installed in the registry and no factory is set.
    #[error("no dispatcher is installed and no factory is registered")]
    NoDispatcher,
    /// The event loop backing the dispatcher has already exited.
    #[error("the event loop has already exited")]
    LoopClosed,
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// How a scheduled callable failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The callable returned an error.
    Error,
    /// The callable panicked.
    Panic,
}

/// A failure raised by a scheduled callable during a drain.
#[derive(Debug, Error)]
#[error("error in `{target_name}`: {message}")]
pub struct CallbackError {
    target_name: String,
    target_id: TargetId,
    kind: FailureKind,
    message: String,
    #[source]
    source: Option<BoxError>,
    /// Rendered stack trace captured where a callable panicked.
    panic_trace: Option<String>,
}

impl CallbackError {
    pub(crate) fn from_error(target: &TargetRef, error: BoxError) -> Self {
        Self {
            target_name: target.name().to_owned(),
            target_id: target.id(),
            kind: FailureKind::Error,
            message: error.to_string(),
            source: Some(error),
            panic_trace: None,
        }
    }

    pub(crate) fn from_panic(
        target: &TargetRef,
        payload: Box<dyn Any + Send>,
        backtrace: Option<Backtrace>,
    ) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&str>() {
            (*msg).to_owned()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "callable panicked with a non-string payload".to_owned()
        };

        Self {
            target_name: target.name().to_owned(),
            target_id: target.id(),
            kind: FailureKind::Panic,
            message,
            source: None,
            panic_trace: backtrace
                .filter(|bt| bt.status() == BacktraceStatus::Captured)
                .map(|bt| bt.to_string()),
        }
    }

    /// Name of the target whose call failed.
    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Identity of the target whose call failed.
    pub fn target_id(&self) -> TargetId {
        self.target_id
    }

    /// Whether the callable returned an error or panicked.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// The top-level failure message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Stack trace of the panicking thread, for panics caught while a
    /// backtrace could be captured.
    pub fn panic_trace(&self) -> Option<&str> {
        self.panic_trace.as_deref()
    }

    /// The full failure trace: the error itself followed by every `source()`.
    ///
    /// Panics have no source chain, so the trace is just the panic message.
    pub fn trace(&self) -> Vec<String> {
        let Some(source) = self.source.as_deref() else {
            return vec![self.message.clone()];
        };

        let source: &(dyn StdError + 'static) = source;
        let mut trace = Vec::new();
        let mut current = Some(source);
        while let Some(err) = current {
            trace.push(err.to_string());
            current = err.source();
        }
        trace
    }
}

/// Timer-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    /// The timer ID is invalid or has already been removed.
    #[error("invalid or expired timer ID")]
    InvalidTimerId,
    /// The tick source is not active.
    #[error("tick source is not active")]
    NotActive,
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The tick interval must be a finite number of seconds greater than zero.
    #[error("invalid tick interval {0}s: must be finite and greater than zero")]
    InvalidInterval(f64),
    /// The error policy name is not recognized.
    #[error("unknown error policy `{0}` (expected print, hide or raise)")]
    UnknownPolicy(String),
    /// The configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// A specialized Result type for dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
