//! Callable identity and bound calls.
//!
//! A [`Target`] pairs a callable with a stable, process-unique [`TargetId`].
//! The id, not the callable's address, is what the dispatcher uses to
//! deduplicate latest-wins calls and group queued calls, so clones of a
//! target share one namespace entry.
//!
//! Binding a target to an argument value produces a [`PendingCall`], the
//! type-erased invocation stored in the dispatcher's collections.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::BoxError;

/// Result returned by every scheduled callable.
pub type CallResult = Result<(), BoxError>;

/// A unique identifier for a callable target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub(crate) u64);

impl TargetId {
    /// Get the raw u64 value of this target ID.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Global counter for generating unique target IDs.
static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

fn next_target_id() -> TargetId {
    TargetId(NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed))
}

type TargetFn<A> = dyn Fn(A) -> CallResult + Send + Sync + 'static;

/// A callable that can be scheduled on the privileged thread.
///
/// `A` is the argument payload. Use a tuple or a struct to pass several
/// values.
///
/// ```
/// use thread_updater::Target;
///
/// let set_label = Target::infallible("set_label", |text: String| {
///     println!("label: {text}");
/// });
/// assert_eq!(set_label.name(), "set_label");
/// assert_eq!(set_label.clone().id(), set_label.id());
/// ```
pub struct Target<A> {
    id: TargetId,
    name: Arc<str>,
    func: Arc<TargetFn<A>>,
}

impl<A> Clone for Target<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            func: self.func.clone(),
        }
    }
}

impl<A> fmt::Debug for Target<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<A: 'static> Target<A> {
    /// Create a named target from a fallible callable.
    pub fn new<F>(name: impl Into<Arc<str>>, func: F) -> Self
    where
        F: Fn(A) -> CallResult + Send + Sync + 'static,
    {
        Self {
            id: next_target_id(),
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Create a named target from a callable that cannot return an error.
    ///
    /// Panics inside the callable are still handled by the error policy.
    pub fn infallible<F>(name: impl Into<Arc<str>>, func: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self::new(name, move |args| {
            func(args);
            Ok(())
        })
    }

    /// Create a target named after the callable's type.
    pub fn from_fn<F>(func: F) -> Self
    where
        F: Fn(A) -> CallResult + Send + Sync + 'static,
    {
        Self::new(std::any::type_name::<F>(), func)
    }

    /// The target's identity.
    pub fn id(&self) -> TargetId {
        self.id
    }

    /// The target's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the callable on the current thread.
    pub fn call(&self, args: A) -> CallResult {
        (self.func)(args)
    }

    /// A lightweight identity handle (id + name) without the callable.
    pub fn to_ref(&self) -> TargetRef {
        TargetRef {
            id: self.id,
            name: self.name.clone(),
        }
    }

    /// Bind the target to one argument value for a single deferred call.
    pub(crate) fn bind(&self, args: A) -> PendingCall
    where
        A: Send,
    {
        let func = self.func.clone();
        PendingCall {
            target: self.to_ref(),
            invoke: Box::new(move || func(args)),
        }
    }

    /// Bind the target to an argument value that is replayed on every tick.
    pub(crate) fn bind_repeating(&self, args: A) -> RepeatingCall
    where
        A: Clone + Send + Sync,
    {
        let func = self.func.clone();
        RepeatingCall {
            target: self.to_ref(),
            invoke: Arc::new(move || func(args.clone())),
        }
    }
}

/// Identity of a target, detached from its callable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetRef {
    id: TargetId,
    name: Arc<str>,
}

impl TargetRef {
    /// The target's identity.
    pub fn id(&self) -> TargetId {
        self.id
    }

    /// The target's display name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A one-shot deferred invocation: a target bound to its arguments.
pub struct PendingCall {
    target: TargetRef,
    invoke: Box<dyn FnOnce() -> CallResult + Send>,
}

impl PendingCall {
    /// The target this call will invoke.
    pub fn target(&self) -> &TargetRef {
        &self.target
    }

    /// Execute the invocation, consuming it.
    pub(crate) fn invoke(self) -> CallResult {
        (self.invoke)()
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// A continuous invocation that can be executed any number of times.
#[derive(Clone)]
pub(crate) struct RepeatingCall {
    target: TargetRef,
    invoke: Arc<dyn Fn() -> CallResult + Send + Sync>,
}

impl RepeatingCall {
    pub(crate) fn target(&self) -> &TargetRef {
        &self.target
    }

    pub(crate) fn invoke(&self) -> CallResult {
        (self.invoke)()
    }
}
