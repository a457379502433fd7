//! Store contract and the default in-process store

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::lifecycle::LifecycleAction;
use crate::transition::Transition;

/// What the engine needs from a store.
///
/// The engine only ever reads the state and submits lifecycle actions; it
/// never mutates state itself.
pub trait StateStore: Send + Sync {
    /// Snapshot of the whole state tree.
    fn state(&self) -> Value;

    /// Run an action through the store's transition function.
    fn submit(&self, action: LifecycleAction);
}

type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Default store: holds the state tree and applies the engine's root
/// transition to every submitted action.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use state_engine_core::{LifecycleAction, StateStore, Store, Transition};
///
/// let store = Store::new(json!({ "count": 0 }), Transition::identity());
/// store.submit(LifecycleAction::error("ignored"));
/// assert_eq!(store.state(), json!({ "count": 0 }));
/// ```
pub struct Store<M: Middleware = NoopMiddleware> {
    inner: Mutex<StoreInner<M>>,
    listeners: Mutex<Vec<Listener>>,
}

struct StoreInner<M> {
    state: Value,
    transition: Transition,
    middleware: M,
}

impl<M: Middleware> fmt::Debug for Store<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Store")
            .field("state", &inner.state)
            .field("transition", &inner.transition)
            .finish_non_exhaustive()
    }
}

impl Store<NoopMiddleware> {
    /// Create a store with initial state and transition function
    pub fn new(state: Value, transition: Transition) -> Self {
        Self::with_middleware(state, transition, NoopMiddleware)
    }
}

impl<M: Middleware> Store<M> {
    /// Create a store with middleware
    pub fn with_middleware(state: Value, transition: Transition, middleware: M) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                state,
                transition,
                middleware,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Apply an action and return whether the state changed.
    ///
    /// Listeners are notified, outside the store lock, only on change.
    pub fn apply(&self, action: &LifecycleAction) -> bool {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let StoreInner {
                state,
                transition,
                middleware,
            } = &mut *inner;

            middleware.before(action);
            let changed = transition.apply(state, action);
            middleware.after(action, changed);

            if !changed {
                return false;
            }
            state.clone()
        };

        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(&snapshot);
        }
        true
    }

    /// Register a listener called with the new state after every change.
    pub fn subscribe(&self, listener: impl Fn(&Value) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Swap the transition function, keeping the current state.
    pub fn replace_transition(&self, transition: Transition) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .transition = transition;
    }

    /// Read the middleware (e.g. to inspect a submission log).
    pub fn inspect_middleware<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        f(&self.inner.lock().unwrap_or_else(PoisonError::into_inner).middleware)
    }

    pub fn middleware_mut<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        f(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner).middleware)
    }
}

impl<M: Middleware> StateStore for Store<M> {
    fn state(&self) -> Value {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .clone()
    }

    fn submit(&self, action: LifecycleAction) {
        self.apply(&action);
    }
}

/// Middleware trait for intercepting submissions
///
/// Implement this trait to add logging, persistence, or other
/// cross-cutting concerns to the store.
pub trait Middleware: Send {
    /// Called before the action reaches the transition function
    fn before(&mut self, action: &LifecycleAction);

    /// Called after the action is processed
    fn after(&mut self, action: &LifecycleAction, state_changed: bool);
}

/// A no-op middleware that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMiddleware;

impl Middleware for NoopMiddleware {
    fn before(&mut self, _action: &LifecycleAction) {}
    fn after(&mut self, _action: &LifecycleAction, _state_changed: bool) {}
}

/// Middleware that logs submissions through `tracing`
#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware {
    /// Whether to log before the transition runs
    pub log_before: bool,
    /// Whether to log after the transition runs
    pub log_after: bool,
}

impl LoggingMiddleware {
    /// Log after only
    pub fn new() -> Self {
        Self {
            log_before: false,
            log_after: true,
        }
    }

    /// Log both before and after
    pub fn verbose() -> Self {
        Self {
            log_before: true,
            log_after: true,
        }
    }
}

impl Middleware for LoggingMiddleware {
    fn before(&mut self, action: &LifecycleAction) {
        if self.log_before {
            tracing::debug!(action = %action.action_type, "Submitting action");
        }
    }

    fn after(&mut self, action: &LifecycleAction, state_changed: bool) {
        if self.log_after {
            tracing::debug!(
                action = %action.action_type,
                state_changed = state_changed,
                "Action processed"
            );
        }
    }
}

/// Compose multiple middleware into a single middleware
#[derive(Default)]
pub struct ComposedMiddleware {
    middlewares: Vec<Box<dyn Middleware>>,
}

impl fmt::Debug for ComposedMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposedMiddleware")
            .field("middlewares_count", &self.middlewares.len())
            .finish()
    }
}

impl ComposedMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the composition
    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Box::new(middleware));
    }
}

impl Middleware for ComposedMiddleware {
    fn before(&mut self, action: &LifecycleAction) {
        for middleware in &mut self.middlewares {
            middleware.before(action);
        }
    }

    fn after(&mut self, action: &LifecycleAction, state_changed: bool) {
        // Reverse order for proper nesting
        for middleware in self.middlewares.iter_mut().rev() {
            middleware.after(action, state_changed);
        }
    }
}
