//! Declarative controller trees
//!
//! A controller describes one node of the application state: its plain state
//! fields, the actions that can change them, an optional view, and child
//! controllers.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use state_engine_core::{Controller, Handler};
//!
//! let app: Controller = Controller::unnamed()
//!     .child(
//!         Controller::named("counter")
//!             .identifier("counter")
//!             .state("count", json!(0))
//!             .action("increment", Handler::immediate(|ctx, _| {
//!                 let count = ctx.field("count").and_then(|v| v.as_i64()).unwrap_or(0);
//!                 Ok(json!({ "count": count + 1 }))
//!             })),
//!     )
//!     .child(Controller::named("toolbar").combine("#counter"));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::handler::Handler;

/// A non-reserved property of a controller.
#[derive(Clone)]
pub enum Entry {
    /// Initial value of a state field
    State(Value),
    /// An action handler
    Action(Handler),
}

impl Entry {
    pub fn is_action(&self) -> bool {
        matches!(self, Entry::Action(_))
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::State(value) => f.debug_tuple("State").field(value).finish(),
            Entry::Action(handler) => f.debug_tuple("Action").field(handler).finish(),
        }
    }
}

impl From<Value> for Entry {
    fn from(value: Value) -> Self {
        Entry::State(value)
    }
}

impl From<Handler> for Entry {
    fn from(handler: Handler) -> Self {
        Entry::Action(handler)
    }
}

/// Other state a node's view should see besides its own.
///
/// Paths may be absolute (`app.settings`) or references (`#settings`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Combine {
    /// One path, exposed under its last segment
    Path(String),
    /// Several paths, each exposed under its last segment
    Paths(Vec<String>),
    /// Paths exposed under custom names (name → path)
    Named(BTreeMap<String, String>),
}

impl Combine {
    /// `(exposed name, path)` pairs. `None` means "use the last segment".
    pub fn entries(&self) -> Vec<(Option<&str>, &str)> {
        match self {
            Combine::Path(path) => vec![(None, path.as_str())],
            Combine::Paths(paths) => paths.iter().map(|p| (None, p.as_str())).collect(),
            Combine::Named(named) => named
                .iter()
                .map(|(name, path)| (Some(name.as_str()), path.as_str()))
                .collect(),
        }
    }
}

impl From<&str> for Combine {
    fn from(path: &str) -> Self {
        Combine::Path(path.to_string())
    }
}

impl From<String> for Combine {
    fn from(path: String) -> Self {
        Combine::Path(path)
    }
}

impl From<Vec<&str>> for Combine {
    fn from(paths: Vec<&str>) -> Self {
        Combine::Paths(paths.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for Combine {
    fn from(paths: Vec<String>) -> Self {
        Combine::Paths(paths)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Combine {
    fn from(named: [(&str, &str); N]) -> Self {
        Combine::Named(
            named
                .into_iter()
                .map(|(name, path)| (name.to_string(), path.to_string()))
                .collect(),
        )
    }
}

/// One node of a controller tree.
///
/// `V` is the caller's view type; the engine never looks inside it.
#[derive(Debug, Clone)]
pub struct Controller<V = ()> {
    pub name: Option<String>,
    pub identifier: Option<String>,
    pub view: Option<V>,
    pub combine: Option<Combine>,
    pub children: Vec<Controller<V>>,
    pub entries: Vec<(String, Entry)>,
}

impl<V> Default for Controller<V> {
    fn default() -> Self {
        Self {
            name: None,
            identifier: None,
            view: None,
            combine: None,
            children: Vec::new(),
            entries: Vec::new(),
        }
    }
}

impl<V> Controller<V> {
    /// A node nested under `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// A transparent node, merged into its parent.
    pub fn unnamed() -> Self {
        Self::default()
    }

    /// Global identifier, reachable as `#identifier`.
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn view(mut self, view: V) -> Self {
        self.view = Some(view);
        self
    }

    pub fn combine(mut self, combine: impl Into<Combine>) -> Self {
        self.combine = Some(combine.into());
        self
    }

    pub fn child(mut self, child: Controller<V>) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Controller<V>>) -> Self {
        self.children.extend(children);
        self
    }

    /// Set an entry. A later entry with the same key replaces the earlier one.
    pub fn entry(mut self, key: impl Into<String>, entry: impl Into<Entry>) -> Self {
        let key = key.into();
        let entry = entry.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = entry,
            None => self.entries.push((key, entry)),
        }
        self
    }

    pub fn state(self, key: impl Into<String>, value: Value) -> Self {
        self.entry(key, Entry::State(value))
    }

    /// Add every field of a JSON object as a state entry.
    pub fn states(mut self, fields: Value) -> Self {
        if let Value::Object(fields) = fields {
            for (key, value) in fields {
                self = self.state(key, value);
            }
        }
        self
    }

    pub fn action(self, key: impl Into<String>, handler: Handler) -> Self {
        self.entry(key, Entry::Action(handler))
    }
}
