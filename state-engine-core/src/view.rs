//! Collaborator strategies for views and the mappers handed to them
//!
//! The engine never renders anything. For every named node that declares a
//! view it calls the caller's `connect` strategy with two mappers:
//!
//! - [`StateMapper`]: projects the global state onto what the view needs
//!   (the node's own fields plus any combined paths)
//! - [`DispatchMapper`]: produces callables that dispatch the node's
//!   actions, each with a `reset` companion

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::controller::{Combine, Entry};
use crate::engine::{Dispatched, Engine};
use crate::error::DispatchError;
use crate::path;

type ConvertFn = dyn Fn(&str, Entry) -> Entry;
type ConnectFn<V> = dyn Fn(StateMapper, DispatchMapper, V) -> V;
type WrapFn<V> = dyn Fn(V) -> V;
type AssembleFn<V> = dyn Fn(Option<V>, &BTreeMap<String, V>) -> Option<V>;

/// Caller-supplied strategies used while compiling.
///
/// Every strategy is optional and defaults to the identity.
pub struct CompileStrategies<V> {
    converter: Option<Box<ConvertFn>>,
    connect: Option<Box<ConnectFn<V>>>,
    wrap_routing: Option<Box<WrapFn<V>>>,
    assemble_view: Option<Box<AssembleFn<V>>>,
}

impl<V> Default for CompileStrategies<V> {
    fn default() -> Self {
        Self {
            converter: None,
            connect: None,
            wrap_routing: None,
            assemble_view: None,
        }
    }
}

impl<V> fmt::Debug for CompileStrategies<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileStrategies")
            .field("converter", &self.converter.is_some())
            .field("connect", &self.connect.is_some())
            .field("wrap_routing", &self.wrap_routing.is_some())
            .field("assemble_view", &self.assemble_view.is_some())
            .finish()
    }
}

impl<V> CompileStrategies<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-process every entry before it is classified.
    pub fn with_converter(mut self, f: impl Fn(&str, Entry) -> Entry + 'static) -> Self {
        self.converter = Some(Box::new(f));
        self
    }

    /// Bind a view to its state and dispatch mappers.
    pub fn with_connect(mut self, f: impl Fn(StateMapper, DispatchMapper, V) -> V + 'static) -> Self {
        self.connect = Some(Box::new(f));
        self
    }

    /// Post-process every connected view.
    pub fn with_wrap_routing(mut self, f: impl Fn(V) -> V + 'static) -> Self {
        self.wrap_routing = Some(Box::new(f));
        self
    }

    /// Merge a node's own view with its named children's views.
    pub fn with_assemble_view(
        mut self,
        f: impl Fn(Option<V>, &BTreeMap<String, V>) -> Option<V> + 'static,
    ) -> Self {
        self.assemble_view = Some(Box::new(f));
        self
    }

    pub(crate) fn convert(&self, key: &str, entry: Entry) -> Entry {
        match &self.converter {
            Some(f) => f(key, entry),
            None => entry,
        }
    }

    pub(crate) fn assemble(&self, view: Option<V>, children: &BTreeMap<String, V>) -> Option<V> {
        match &self.assemble_view {
            Some(f) => f(view, children),
            None => view,
        }
    }

    pub(crate) fn connect(&self, state: StateMapper, dispatch: DispatchMapper, view: V) -> V {
        let connected = match &self.connect {
            Some(f) => f(state, dispatch, view),
            None => view,
        };
        match &self.wrap_routing {
            Some(f) => f(connected),
            None => connected,
        }
    }
}

/// Projects the global state onto the props of one view.
#[derive(Debug, Clone)]
pub struct StateMapper {
    node_path: String,
    combine: Option<Combine>,
    engine: Engine,
}

impl StateMapper {
    pub(crate) fn new(node_path: String, combine: Option<Combine>, engine: Engine) -> Self {
        Self {
            node_path,
            combine,
            engine,
        }
    }

    pub fn node_path(&self) -> &str {
        &self.node_path
    }

    /// Combined references resolved to absolute paths, as
    /// `(exposed name, path)`. Unresolved references resolve to `None`.
    ///
    /// References are resolved on every call, so an identifier declared by
    /// a node compiled later is still found.
    pub fn combined_paths(&self) -> Vec<(String, Option<String>)> {
        let Some(combine) = &self.combine else {
            return Vec::new();
        };
        combine
            .entries()
            .into_iter()
            .map(|(name, reference)| {
                let resolved = self.engine.resolve_reference(reference);
                let exposed = name
                    .map(str::to_string)
                    .or_else(|| {
                        resolved
                            .as_deref()
                            .and_then(path::last_segment)
                            .map(str::to_string)
                    })
                    .unwrap_or_else(|| reference.to_string());
                (exposed, resolved)
            })
            .collect()
    }

    /// Props for the view: the node's own fields, then each combined path
    /// under its exposed name. Missing paths are skipped.
    pub fn map(&self, state: &Value) -> Map<String, Value> {
        let mut props = path::lookup(state, &self.node_path)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        for (exposed, resolved) in self.combined_paths() {
            let Some(resolved) = resolved else {
                continue;
            };
            if let Some(value) = path::lookup(state, &resolved) {
                props.insert(exposed, value.clone());
            }
        }
        props
    }

    /// Props computed from the engine's attached store.
    pub fn current(&self) -> Map<String, Value> {
        self.engine
            .state()
            .map(|state| self.map(&state))
            .unwrap_or_default()
    }
}

/// Produces dispatch callables for the actions of one node.
#[derive(Debug, Clone)]
pub struct DispatchMapper {
    node_path: String,
    action_names: Vec<String>,
    engine: Engine,
}

impl DispatchMapper {
    pub(crate) fn new(node_path: String, action_names: Vec<String>, engine: Engine) -> Self {
        Self {
            node_path,
            action_names,
            engine,
        }
    }

    pub fn action_names(&self) -> &[String] {
        &self.action_names
    }

    /// One bound action per handler of the node.
    pub fn bind(&self) -> ViewActions {
        let actions = self
            .action_names
            .iter()
            .map(|name| {
                let bound = BoundAction {
                    path: path::join(&self.node_path, name),
                    engine: self.engine.clone(),
                };
                (name.clone(), bound)
            })
            .collect();
        ViewActions { actions }
    }
}

/// Dispatch callables keyed by action name.
#[derive(Debug, Clone, Default)]
pub struct ViewActions {
    actions: BTreeMap<String, BoundAction>,
}

impl ViewActions {
    pub fn get(&self, name: &str) -> Option<&BoundAction> {
        self.actions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// One action bound to the engine.
#[derive(Debug, Clone)]
pub struct BoundAction {
    path: String,
    engine: Engine,
}

impl BoundAction {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn call(&self, args: Vec<Value>) -> Dispatched {
        self.engine.dispatch(&self.path, args)
    }

    /// Put the action's status back to idle.
    pub fn reset(&self) -> Result<(), DispatchError> {
        self.engine.reset(&self.path)
    }
}
