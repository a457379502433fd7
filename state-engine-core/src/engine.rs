//! The engine context and the dispatch state machine
//!
//! An [`Engine`] is a cheap, cloneable handle. It owns the tables produced by
//! compiling a controller tree (actions by path, named paths, the root
//! transition) and drives every dispatch through its lifecycle:
//!
//! ```text
//! idle ──► requested ──► in-progress ──► settled (ok | error)
//!            │ submit $in-progress │ run handler │ submit $settled-*
//! ```
//!
//! Immediate handlers settle before `dispatch` returns. Every other shape
//! is spawned onto the current tokio runtime, which submits the settlement
//! once the handler's future resolves whether or not the returned
//! [`Dispatched::Pending`] is ever awaited. Dispatching such a handler
//! outside a runtime settles it as an error.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::IntoFuture;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::{self, BoxFuture, FutureExt};
use serde_json::{Map, Value};

use crate::compiler::{self, Loaded};
use crate::config::EngineConfig;
use crate::controller::Controller;
use crate::error::{CompileError, DispatchError, HandlerError, RoutingReason};
use crate::handler::{drive, Handler, Outcome, SettleFuture};
use crate::lifecycle::{ExpandedAction, LifecycleAction, LifecycleTemplate, Phase};
use crate::path::{self, PathRegistry};
use crate::scope::ActionScope;
use crate::store::{Middleware, StateStore, Store};
use crate::transition::Transition;
use crate::view::CompileStrategies;

/// Per-dispatch state, used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Requested,
    InProgress,
    Settled,
}

/// The result of [`Engine::dispatch`].
///
/// Immediate handlers produce `Ready`; deferred, multi-step and
/// already-settling handlers produce `Pending`. Both can be awaited.
/// Dropping a `Pending` result does not stop the settlement.
#[must_use = "the dispatch runs regardless; use the result to observe its outcome"]
pub enum Dispatched {
    Ready(Result<Value, DispatchError>),
    Pending(BoxFuture<'static, Result<Value, DispatchError>>),
}

impl fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatched::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Dispatched::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

impl Dispatched {
    pub fn is_pending(&self) -> bool {
        matches!(self, Dispatched::Pending(_))
    }

    /// The synchronous result, or `None` if the dispatch is still pending.
    pub fn into_ready(self) -> Option<Result<Value, DispatchError>> {
        match self {
            Dispatched::Ready(result) => Some(result),
            Dispatched::Pending(_) => None,
        }
    }

    /// Run the dispatch to completion on the tokio runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<Value, DispatchError>> {
        tokio::spawn(self.into_future())
    }
}

impl IntoFuture for Dispatched {
    type Output = Result<Value, DispatchError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Dispatched::Ready(result) => future::ready(result).boxed(),
            Dispatched::Pending(future) => future,
        }
    }
}

#[derive(Clone)]
enum RegisteredAction {
    Base {
        scope: Arc<ActionScope>,
        expanded: Arc<ExpandedAction>,
    },
    Lifecycle(LifecycleTemplate),
}

/// A routed dispatch: the owning scope, its lifecycle and the handler.
type Route = (Arc<ActionScope>, Arc<ExpandedAction>, Handler);

#[derive(Default)]
struct Registry {
    actions: HashMap<String, RegisteredAction>,
    named_paths: PathRegistry,
    root: Transition,
    initial_state: Map<String, Value>,
}

struct EngineInner {
    config: EngineConfig,
    registry: RwLock<Registry>,
    store: RwLock<Option<Arc<dyn StateStore>>>,
}

/// Compiled controller tables plus the dispatch engine.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use state_engine_core::{CompileStrategies, Controller, Engine, Handler, StateStore};
///
/// let engine = Engine::new();
/// let counter: Controller = Controller::named("counter")
///     .state("count", json!(0))
///     .action("increment", Handler::immediate(|ctx, _| {
///         let count = ctx.field("count").and_then(|v| v.as_i64()).unwrap_or(0);
///         Ok(json!({ "count": count + 1 }))
///     }));
///
/// engine.load(counter, &CompileStrategies::new()).unwrap();
/// let store = engine.create_store();
///
/// let result = engine.dispatch("counter.increment", vec![]).into_ready().unwrap();
/// assert_eq!(result.unwrap(), json!({ "count": 1 }));
/// assert_eq!(store.state()["counter"]["count"], json!(1));
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry();
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("actions", &registry.actions.len())
            .field("named_paths", &registry.named_paths.len())
            .field("store_attached", &self.store().is_some())
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                registry: RwLock::new(Registry::default()),
                store: RwLock::new(None),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ===== Compilation =====

    /// Compile a controller tree into this engine.
    ///
    /// Registers every action and identifier, retains the root transition
    /// and initial state, and returns the compiled views.
    pub fn load<V: Clone>(
        &self,
        controller: Controller<V>,
        strategies: &CompileStrategies<V>,
    ) -> Result<Loaded<V>, CompileError> {
        compiler::load(self, controller, strategies)
    }

    /// The root transition function (identity before anything is loaded).
    pub fn root_transition(&self) -> Transition {
        self.registry().root.clone()
    }

    /// The initial state of the whole tree.
    pub fn initial_state(&self) -> Value {
        Value::Object(self.registry().initial_state.clone())
    }

    pub fn has_action(&self, action_path: &str) -> bool {
        matches!(
            self.registry().actions.get(action_path),
            Some(RegisteredAction::Base { .. })
        )
    }

    /// Paths of every dispatchable action, sorted.
    pub fn action_paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self
            .registry()
            .actions
            .iter()
            .filter(|(_, action)| matches!(action, RegisteredAction::Base { .. }))
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Lifecycle factory registered under a lifecycle type such as
    /// `counter.increment.$settled-ok`.
    pub fn lifecycle(&self, lifecycle_type: &str) -> Option<LifecycleTemplate> {
        match self.registry().actions.get(lifecycle_type)? {
            RegisteredAction::Lifecycle(template) => Some(template.clone()),
            RegisteredAction::Base { .. } => None,
        }
    }

    /// Resolve `#identifier` references (and plain paths) to absolute paths.
    pub fn resolve_reference(&self, reference: &str) -> Option<String> {
        self.registry()
            .named_paths
            .resolve(reference)
            .map(str::to_string)
    }

    pub(crate) fn register_identifier(&self, identifier: &str, path: &str) -> Result<(), CompileError> {
        self.registry_mut()
            .named_paths
            .register(identifier, path)
            .map_err(|existing| CompileError::DuplicateIdentifier {
                identifier: identifier.to_string(),
                existing,
            })
    }

    pub(crate) fn register_actions(
        &self,
        scope: &Arc<ActionScope>,
        expanded: Vec<ExpandedAction>,
    ) -> Result<(), CompileError> {
        let mut registry = self.registry_mut();

        for action in &expanded {
            let taken = std::iter::once(action.path())
                .chain(action.types())
                .find(|path| registry.actions.contains_key(*path));
            if let Some(path) = taken {
                return Err(CompileError::DuplicateAction {
                    path: path.to_string(),
                });
            }
        }

        for action in expanded {
            for template in action.templates() {
                registry.actions.insert(
                    template.action_type().to_string(),
                    RegisteredAction::Lifecycle(template.clone()),
                );
            }
            tracing::debug!(action = %action.path(), "Registered action");
            registry.actions.insert(
                action.path().to_string(),
                RegisteredAction::Base {
                    scope: Arc::clone(scope),
                    expanded: Arc::new(action),
                },
            );
        }
        Ok(())
    }

    pub(crate) fn install_root(&self, transition: Transition, initial_state: Map<String, Value>) {
        let mut registry = self.registry_mut();
        registry.root = transition;
        registry.initial_state = initial_state;
    }

    // ===== Store =====

    /// Attach the store every dispatch submits to.
    pub fn attach_store(&self, store: Arc<dyn StateStore>) {
        *self.inner.store.write().unwrap_or_else(PoisonError::into_inner) = Some(store);
    }

    /// Detach the current store, returning it.
    pub fn detach_store(&self) -> Option<Arc<dyn StateStore>> {
        self.inner
            .store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Create a [`Store`] from the compiled root and attach it.
    pub fn create_store(&self) -> Arc<Store> {
        let store = Arc::new(Store::new(self.initial_state(), self.root_transition()));
        self.attach_store(store.clone());
        store
    }

    /// Like [`create_store`](Self::create_store), with middleware.
    pub fn create_store_with_middleware<M: Middleware + 'static>(&self, middleware: M) -> Arc<Store<M>> {
        let store = Arc::new(Store::with_middleware(
            self.initial_state(),
            self.root_transition(),
            middleware,
        ));
        self.attach_store(store.clone());
        store
    }

    pub fn store(&self) -> Option<Arc<dyn StateStore>> {
        self.inner
            .store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current state of the attached store.
    pub fn state(&self) -> Option<Value> {
        self.store().map(|store| store.state())
    }

    /// Current state at `node_path` in the attached store.
    pub fn state_at(&self, node_path: &str) -> Option<Value> {
        let state = self.state()?;
        path::lookup(&state, node_path).cloned()
    }

    // ===== Dispatch =====

    /// Dispatch the action registered at `action_path`.
    ///
    /// Fails with [`DispatchError::StoreNotAttached`] (nothing submitted) if
    /// no store is attached, and with [`DispatchError::Routing`] (an `error`
    /// action submitted) if the path does not name a registered action.
    /// Otherwise the handler's own failure is returned after `settled-error`
    /// has been submitted.
    pub fn dispatch(&self, action_path: &str, args: Vec<Value>) -> Dispatched {
        let Some(store) = self.store() else {
            tracing::error!(action = %action_path, "Dispatch without an attached store");
            return Dispatched::Ready(Err(DispatchError::StoreNotAttached));
        };
        let (scope, expanded, handler) = match self.route(store.as_ref(), action_path) {
            Ok(route) => route,
            Err(err) => return Dispatched::Ready(Err(err)),
        };

        let run = Settlement {
            engine: self.clone(),
            store,
            scope,
            expanded,
        };
        run.trace(DispatchState::Requested);
        run.submit(Phase::InProgress, None);
        run.trace(DispatchState::InProgress);

        // Built after the in-progress rebind so the context sees it
        let ctx = run.scope.context(run.expanded.name(), self);

        tracing::trace!(action = %action_path, shape = %handler.shape(), "Running handler");
        match handler {
            Handler::Immediate(f) => match f(&ctx, args.as_slice()) {
                Ok(Outcome::Ready(value)) => run.settle_now(Ok(value)),
                Ok(Outcome::Pending(future)) => run.settle_later(future),
                Err(err) => run.settle_now(Err(err)),
            },
            Handler::Deferred(f) => run.settle_later(f(ctx, args)),
            Handler::AlreadySettling(shared) => run.settle_later(shared.boxed()),
            Handler::MultiStep(f) => {
                let steps = f(ctx, args);
                run.settle_later(drive(steps).boxed())
            }
        }
    }

    /// Submit the `reset` lifecycle action for `action_path`, putting its
    /// status back to `idle`. Never submitted automatically.
    pub fn reset(&self, action_path: &str) -> Result<(), DispatchError> {
        let store = self.store().ok_or(DispatchError::StoreNotAttached)?;
        let (scope, expanded, _) = self.route(store.as_ref(), action_path)?;
        Settlement {
            engine: self.clone(),
            store,
            scope,
            expanded,
        }
        .submit(Phase::Reset, None);
        Ok(())
    }

    /// Find the base action at `action_path` and its handler, submitting an
    /// `error` action if there is none.
    fn route(&self, store: &dyn StateStore, action_path: &str) -> Result<Route, DispatchError> {
        if action_path.is_empty() {
            return Err(self.routing_error(store, action_path, RoutingReason::EmptyPath));
        }
        let registered = self.registry().actions.get(action_path).cloned();
        match registered {
            Some(RegisteredAction::Base { scope, expanded }) => match scope.handler(expanded.name()) {
                Some(handler) => Ok((scope, expanded, handler)),
                None => Err(self.routing_error(store, action_path, RoutingReason::UnknownAction)),
            },
            Some(RegisteredAction::Lifecycle(_)) => {
                Err(self.routing_error(store, action_path, RoutingReason::UnsupportedShape))
            }
            None => Err(self.routing_error(store, action_path, RoutingReason::UnknownAction)),
        }
    }

    fn routing_error(&self, store: &dyn StateStore, action_path: &str, reason: RoutingReason) -> DispatchError {
        tracing::warn!(action = %action_path, reason = %reason, "Cannot route action");
        store.submit(LifecycleAction::error(reason.message()));
        DispatchError::Routing {
            path: action_path.to_string(),
            reason,
        }
    }

    /// Rebind a scope to its node's current state in the store.
    fn rebind(&self, scope: &ActionScope, store: &dyn StateStore) {
        let state = store.state();
        scope.bind(path::lookup(&state, scope.path()));
    }

    fn registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Every registered `#identifier` and the path it points at.
    pub fn named_paths(&self) -> BTreeMap<String, String> {
        self.registry()
            .named_paths
            .iter()
            .map(|(reference, path)| (reference.to_string(), path.to_string()))
            .collect()
    }
}

/// Everything a single dispatch needs to submit its lifecycle.
struct Settlement {
    engine: Engine,
    store: Arc<dyn StateStore>,
    scope: Arc<ActionScope>,
    expanded: Arc<ExpandedAction>,
}

impl Settlement {
    fn trace(&self, state: DispatchState) {
        tracing::debug!(action = %self.expanded.path(), state = ?state, "Dispatch state");
    }

    fn submit(&self, phase: Phase, payload: Option<&Value>) {
        let action = self.expanded.template(phase).create(payload);
        tracing::debug!(action = %action.action_type, "Submitting lifecycle action");
        self.store.submit(action);
        self.engine.rebind(&self.scope, self.store.as_ref());
    }

    fn finish(&self, result: Result<Value, HandlerError>) -> Result<Value, DispatchError> {
        let settled = match result {
            Ok(value) => {
                self.submit(Phase::SettledOk, Some(&value));
                Ok(value)
            }
            Err(err) => {
                self.submit(Phase::SettledError, Some(&err.to_value()));
                Err(DispatchError::Handler(err))
            }
        };
        self.trace(DispatchState::Settled);
        settled
    }

    fn settle_now(self, result: Result<Value, HandlerError>) -> Dispatched {
        Dispatched::Ready(self.finish(result))
    }

    /// Spawn the settlement so it runs even if the caller never polls the
    /// returned [`Dispatched::Pending`].
    fn settle_later(self, future: SettleFuture) -> Dispatched {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(action = %self.expanded.path(), "Pending handler dispatched outside a tokio runtime");
            let failure = HandlerError::new(DispatchError::NoRuntime.to_string());
            let _ = self.finish(Err(failure));
            return Dispatched::Ready(Err(DispatchError::NoRuntime));
        };

        let settlement = runtime.spawn(async move {
            let result = future.await;
            self.finish(result)
        });
        Dispatched::Pending(
            async move {
                settlement
                    .await
                    .unwrap_or_else(|err| Err(DispatchError::Aborted(err.to_string())))
            }
            .boxed(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingStore;
    use serde_json::json;

    fn engine_with(controller: Controller) -> (Engine, Arc<RecordingStore>) {
        let engine = Engine::new();
        engine.load(controller, &CompileStrategies::new()).unwrap();
        let store = RecordingStore::attach(&engine);
        (engine, store)
    }

    #[test]
    fn test_missing_store_is_a_hard_fault() {
        let engine = Engine::new();
        let counter: Controller = Controller::named("counter")
            .action("increment", Handler::immediate(|_, _| Ok(json!(7))));
        engine.load(counter, &CompileStrategies::new()).unwrap();

        let result = engine.dispatch("counter.increment", vec![]).into_ready();
        assert_eq!(result, Some(Err(DispatchError::StoreNotAttached)));
        assert_eq!(engine.reset("counter.increment"), Err(DispatchError::StoreNotAttached));
    }

    #[test]
    fn test_unknown_and_empty_paths_are_soft_errors() {
        let (engine, store) = engine_with(Controller::named("a"));

        let result = engine.dispatch("a.nope", vec![]).into_ready().unwrap();
        assert!(matches!(
            result,
            Err(DispatchError::Routing { reason: RoutingReason::UnknownAction, .. })
        ));

        let result = engine.dispatch("", vec![]).into_ready().unwrap();
        assert!(matches!(
            result,
            Err(DispatchError::Routing { reason: RoutingReason::EmptyPath, .. })
        ));

        let submitted = store.submitted();
        assert_eq!(submitted.len(), 2);
        assert!(submitted.iter().all(LifecycleAction::is_error));
        assert_eq!(submitted[0].data, json!("action does not exist"));
    }

    #[test]
    fn test_lifecycle_paths_are_not_dispatchable() {
        let counter: Controller = Controller::named("counter")
            .action("increment", Handler::immediate(|_, _| Ok(json!(1))));
        let (engine, store) = engine_with(counter);

        let result = engine
            .dispatch("counter.increment.$reset", vec![])
            .into_ready()
            .unwrap();
        assert!(matches!(
            result,
            Err(DispatchError::Routing { reason: RoutingReason::UnsupportedShape, .. })
        ));
        assert_eq!(store.types(), vec!["error"]);
        assert!(engine.lifecycle("counter.increment.$reset").is_some());
        assert!(engine.lifecycle("counter.increment").is_none());
    }

    #[test]
    fn test_immediate_handler_sees_rebound_state() {
        let counter: Controller = Controller::named("counter")
            .state("count", json!(41))
            .action(
                "increment",
                Handler::immediate(|ctx, _| {
                    let count = ctx.field("count").and_then(Value::as_i64).unwrap_or(0);
                    // In-progress was already submitted and bound
                    assert_eq!(ctx.field("increment$status"), Some(&json!("in-progress")));
                    Ok(json!({ "count": count + 1 }))
                }),
            );
        let (engine, store) = engine_with(counter);

        let result = engine.dispatch("counter.increment", vec![]).into_ready().unwrap();
        assert_eq!(result, Ok(json!({ "count": 42 })));
        assert_eq!(store.state()["counter"]["count"], json!(42));
    }

    #[test]
    fn test_reset_returns_status_to_idle() {
        let counter: Controller = Controller::named("counter")
            .action("increment", Handler::immediate(|_, _| Ok(json!(1))));
        let (engine, store) = engine_with(counter);

        let _ = engine.dispatch("counter.increment", vec![]);
        assert_eq!(
            store.state()["counter"]["increment$status"],
            json!("settled-ok")
        );

        engine.reset("counter.increment").unwrap();
        assert_eq!(store.state()["counter"]["increment$status"], json!("idle"));
        assert_eq!(store.types().last().map(String::as_str), Some("counter.increment.$reset"));
    }

    #[tokio::test]
    async fn test_deferred_settles_after_future() {
        let loader: Controller = Controller::unnamed().action(
            "load",
            Handler::deferred(|_, args| async move { Ok(json!({ "items": args })) }),
        );
        let (engine, store) = engine_with(loader);

        let dispatched = engine.dispatch("load", vec![json!(1), json!(2)]);
        assert!(dispatched.is_pending());
        assert_eq!(store.types(), vec!["load.$in-progress"]);

        let result = dispatched.await;
        assert_eq!(result, Ok(json!({ "items": [1, 2] })));
        assert_eq!(store.types(), vec!["load.$in-progress", "load.$settled-ok"]);
        assert_eq!(store.state()["items"], json!([1, 2]));
    }

    #[tokio::test]
    async fn test_spawned_dispatch() {
        let node: Controller = Controller::named("n")
            .action("ping", Handler::deferred(|_, _| async { Ok(json!("pong")) }));
        let (engine, _store) = engine_with(node);

        let handle = engine.dispatch("n.ping", vec![]).spawn();
        assert_eq!(handle.await.unwrap(), Ok(json!("pong")));
    }

    #[tokio::test]
    async fn test_dropped_pending_dispatch_still_settles() {
        let node: Controller = Controller::named("n").action(
            "load",
            Handler::deferred(|_, _| async { Ok(json!(1)) }),
        );
        let (engine, store) = engine_with(node);

        drop(engine.dispatch("n.load", vec![]));
        for _ in 0..100 {
            if store.types().len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(store.types(), vec!["n.load.$in-progress", "n.load.$settled-ok"]);
        assert_eq!(store.state()["n"]["load$status"], json!("settled-ok"));
    }

    #[test]
    fn test_pending_handler_outside_runtime_settles_as_error() {
        let node: Controller = Controller::named("n").action(
            "load",
            Handler::deferred(|_, _| async { Ok(json!(1)) }),
        );
        let (engine, store) = engine_with(node);

        let result = engine.dispatch("n.load", vec![]).into_ready();
        assert_eq!(result, Some(Err(DispatchError::NoRuntime)));
        assert_eq!(store.types(), vec!["n.load.$in-progress", "n.load.$settled-error"]);
        assert_eq!(store.state()["n"]["load$status"], json!("settled-error"));
    }

    #[test]
    fn test_action_paths_and_debug() {
        let node: Controller = Controller::named("n")
            .identifier("node")
            .action("b", Handler::immediate(|_, _| Ok(Value::Null)))
            .action("a", Handler::immediate(|_, _| Ok(Value::Null)));
        let (engine, _store) = engine_with(node);

        assert_eq!(engine.action_paths(), vec!["n.a", "n.b"]);
        assert!(engine.has_action("n.a"));
        assert!(!engine.has_action("n.a.$reset"));
        assert_eq!(
            engine.named_paths(),
            BTreeMap::from([("#node".to_string(), "n".to_string())])
        );
        let debug = format!("{engine:?}");
        assert!(debug.contains("actions: 10"));
        assert!(debug.contains("store_attached: true"));
    }
}
