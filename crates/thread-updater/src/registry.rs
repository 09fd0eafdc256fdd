//! Process-wide default dispatcher.
//!
//! Most applications need a single dispatcher. Install it once from the
//! privileged thread, or register a factory that builds one on first use,
//! and every thread can reach it through the free functions in this module.
//!
//! ```
//! use thread_updater::{Dispatcher, DispatcherRegistry, EventLoop, Target};
//!
//! let event_loop = EventLoop::new();
//! let registry = DispatcherRegistry::new();
//! registry.set(Some(Dispatcher::new(event_loop.handle())));
//!
//! let target = Target::infallible("tick", |_: ()| {});
//! registry.get().unwrap().call_latest(&target, ());
//! assert!(registry.get().unwrap().is_running());
//!
//! registry.reset();
//! assert!(registry.try_get().is_none());
//! ```

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;

use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, Result};
use crate::logging::targets;
use crate::target::{Target, TargetId};

/// Builds the default dispatcher on first access.
pub type DispatcherFactory = Box<dyn Fn() -> Result<Arc<Dispatcher>> + Send + Sync + 'static>;

/// Holds the current default dispatcher and an optional factory for it.
#[derive(Default)]
pub struct DispatcherRegistry {
    current: Mutex<Option<Arc<Dispatcher>>>,
    factory: Mutex<Option<DispatcherFactory>>,
}

impl std::fmt::Debug for DispatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherRegistry")
            .field("current", &self.current.lock().is_some())
            .field("factory", &self.factory.lock().is_some())
            .finish()
    }
}

impl DispatcherRegistry {
    /// Create an empty registry with no factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry that builds its dispatcher with `factory`.
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<Dispatcher>> + Send + Sync + 'static,
    {
        let registry = Self::new();
        registry.set_factory(factory);
        registry
    }

    /// Replace the factory used when no dispatcher is installed.
    pub fn set_factory<F>(&self, factory: F)
    where
        F: Fn() -> Result<Arc<Dispatcher>> + Send + Sync + 'static,
    {
        *self.factory.lock() = Some(Box::new(factory));
    }

    /// Return the current dispatcher, building it with the factory if none
    /// is installed.
    ///
    /// The factory runs with the registry locked and must not access the
    /// same registry.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoDispatcher`] when no dispatcher is installed
    /// and no factory is set, or the factory's own error.
    pub fn get(&self) -> Result<Arc<Dispatcher>> {
        let mut current = self.current.lock();
        if let Some(dispatcher) = current.as_ref() {
            return Ok(dispatcher.clone());
        }

        let factory = self.factory.lock();
        let factory = factory.as_ref().ok_or(DispatchError::NoDispatcher)?;
        let dispatcher = factory()?;
        tracing::debug!(target: targets::REGISTRY, "created default dispatcher");
        *current = Some(dispatcher.clone());
        Ok(dispatcher)
    }

    /// Return the current dispatcher without invoking the factory.
    pub fn try_get(&self) -> Option<Arc<Dispatcher>> {
        self.current.lock().clone()
    }

    /// Install `dispatcher` as the default, or clear it with `None`.
    ///
    /// The replaced dispatcher is returned; it keeps running while other
    /// handles to it exist.
    pub fn set(&self, dispatcher: Option<Arc<Dispatcher>>) -> Option<Arc<Dispatcher>> {
        tracing::debug!(target: targets::REGISTRY, installed = dispatcher.is_some(), "default dispatcher replaced");
        std::mem::replace(&mut *self.current.lock(), dispatcher)
    }

    /// Clear the default dispatcher and shut it down.
    pub fn reset(&self) {
        let previous = self.current.lock().take();
        if let Some(dispatcher) = previous {
            tracing::debug!(target: targets::REGISTRY, "default dispatcher reset");
            dispatcher.shutdown();
        }
    }
}

/// The process-wide registry used by the free functions in this module.
///
/// It starts empty and without a factory. Install a dispatcher with
/// [`set_updater`] or a factory with [`DispatcherRegistry::set_factory`]
/// before first use; until then every free function returns
/// [`DispatchError::NoDispatcher`].
pub fn global_registry() -> &'static DispatcherRegistry {
    static GLOBAL: OnceLock<DispatcherRegistry> = OnceLock::new();
    GLOBAL.get_or_init(DispatcherRegistry::new)
}

/// The process-wide default dispatcher.
///
/// # Errors
///
/// [`DispatchError::NoDispatcher`] when nothing was installed in
/// [`global_registry`] and it has no factory.
pub fn get_updater() -> Result<Arc<Dispatcher>> {
    global_registry().get()
}

/// Install (or with `None`, clear) the process-wide default dispatcher.
pub fn set_updater(dispatcher: Option<Arc<Dispatcher>>) -> Option<Arc<Dispatcher>> {
    global_registry().set(dispatcher)
}

/// Whether the default dispatcher is running.
pub fn is_running() -> Result<bool> {
    Ok(get_updater()?.is_running())
}

/// Start the default dispatcher.
pub fn start() -> Result<()> {
    get_updater()?.start();
    Ok(())
}

/// Stop the default dispatcher.
pub fn stop(clear_state: bool) -> Result<()> {
    get_updater()?.stop(clear_state);
    Ok(())
}

/// [`Dispatcher::register_continuous`] on the default dispatcher.
pub fn register_continuous<A>(target: &Target<A>, args: A) -> Result<()>
where
    A: Clone + Send + Sync + 'static,
{
    get_updater()?.register_continuous(target, args);
    Ok(())
}

/// [`Dispatcher::unregister_continuous`] on the default dispatcher.
pub fn unregister_continuous(target: TargetId) -> Result<bool> {
    Ok(get_updater()?.unregister_continuous(target))
}

/// [`Dispatcher::call_latest`] on the default dispatcher.
pub fn call_latest<A>(target: &Target<A>, args: A) -> Result<()>
where
    A: Send + 'static,
{
    get_updater()?.call_latest(target, args);
    Ok(())
}

/// [`Dispatcher::call_in_main`] on the default dispatcher.
pub fn call_in_main<A>(target: &Target<A>, args: A) -> Result<()>
where
    A: Send + 'static,
{
    get_updater()?.call_in_main(target, args);
    Ok(())
}

/// [`Dispatcher::delay`] on the default dispatcher.
pub fn delay<A>(delay: Duration, target: &Target<A>, args: A) -> Result<()>
where
    A: Send + 'static,
{
    get_updater()?.delay(delay, target, args);
    Ok(())
}
