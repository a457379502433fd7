//! Per-node action scope
//!
//! Each compiled node owns one scope holding its handlers and a bind cache:
//! the node's state as last seen in the store. Handlers read the cache
//! through their [`ActionContext`] instead of querying the store.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};

use crate::engine::Engine;
use crate::handler::{ActionContext, Handler};
use crate::path;

/// Handlers of one node plus their bound state.
#[derive(Debug)]
pub struct ActionScope {
    path: String,
    segments: Vec<String>,
    handlers: Arc<BTreeMap<String, Handler>>,
    bound: RwLock<Map<String, Value>>,
}

impl ActionScope {
    pub fn new(path: impl Into<String>, handlers: BTreeMap<String, Handler>) -> Self {
        let path = path.into();
        Self {
            segments: path::segments(&path),
            path,
            handlers: Arc::new(handlers),
            bound: RwLock::new(Map::new()),
        }
    }

    /// Path of the owning node.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Segments used to locate the node's state in the store.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Rebind the scope to a new state snapshot.
    ///
    /// Does nothing when `candidate` is missing, not a mapping, or an empty
    /// mapping. Otherwise replaces the snapshot for every action at once.
    /// Returns whether the scope was rebound.
    pub fn bind(&self, candidate: Option<&Value>) -> bool {
        let Some(fields) = candidate.and_then(Value::as_object) else {
            return false;
        };
        if fields.is_empty() {
            return false;
        }
        let mut bound = self.bound.write().unwrap_or_else(PoisonError::into_inner);
        *bound = fields.clone();
        true
    }

    /// Current snapshot of the bound state.
    pub fn bound_state(&self) -> Map<String, Value> {
        self.bound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn handler(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).cloned()
    }

    /// Context for running `name` against the current snapshot.
    pub fn context(&self, name: &str, engine: &Engine) -> ActionContext {
        ActionContext::new(
            self.path.clone(),
            name.to_string(),
            self.bound_state(),
            Arc::clone(&self.handlers),
            engine.clone(),
        )
    }

    /// Resolve a handler together with the context it should run in.
    pub fn get_action(&self, name: &str, engine: &Engine) -> Option<(Handler, ActionContext)> {
        let handler = self.handler(name)?;
        Some((handler, self.context(name, engine)))
    }
}
