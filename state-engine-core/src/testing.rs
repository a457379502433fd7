//! Test utilities for applications built on the engine
//!
//! - [`RecordingStore`]: a [`StateStore`] that records every submission and
//!   optionally runs it through a transition
//! - Assertion macros matching submissions by type, with `*`/`?` globs
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use state_engine_core::testing::RecordingStore;
//! use state_engine_core::{assert_submitted, CompileStrategies, Controller, Engine, Handler};
//!
//! let engine = Engine::new();
//! let node: Controller = Controller::named("n").action("go", Handler::immediate(|_, _| Ok(json!(1))));
//! engine.load(node, &CompileStrategies::new()).unwrap();
//! let store = RecordingStore::attach(&engine);
//!
//! let _ = engine.dispatch("n.go", vec![]);
//! let submitted = store.drain();
//! assert_submitted!(submitted, "n.go.$in-progress");
//! assert_submitted!(submitted, "*.$settled-ok");
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::engine::Engine;
use crate::lifecycle::LifecycleAction;
use crate::store::StateStore;
use crate::transition::Transition;

/// Store double that remembers what it was given.
#[derive(Debug)]
pub struct RecordingStore {
    state: Mutex<Value>,
    transition: Transition,
    submitted: Mutex<Vec<LifecycleAction>>,
}

impl RecordingStore {
    /// Records submissions without ever changing `state`.
    pub fn new(state: Value) -> Self {
        Self::with_transition(state, Transition::identity())
    }

    /// Records submissions and applies them through `transition`.
    pub fn with_transition(state: Value, transition: Transition) -> Self {
        Self {
            state: Mutex::new(state),
            transition,
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// Build from the engine's compiled root and attach it.
    pub fn attach(engine: &Engine) -> Arc<Self> {
        let store = Arc::new(Self::with_transition(
            engine.initial_state(),
            engine.root_transition(),
        ));
        engine.attach_store(store.clone());
        store
    }

    /// Everything submitted so far, oldest first.
    pub fn submitted(&self) -> Vec<LifecycleAction> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Types of everything submitted so far.
    pub fn types(&self) -> Vec<String> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|action| action.action_type.clone())
            .collect()
    }

    /// Take the recorded submissions, leaving the record empty.
    pub fn drain(&self) -> Vec<LifecycleAction> {
        std::mem::take(&mut *self.submitted.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn has_submitted(&self) -> bool {
        !self
            .submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl StateStore for RecordingStore {
    fn state(&self) -> Value {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn submit(&self, action: LifecycleAction) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            self.transition.apply(&mut state, &action);
        }
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
    }
}

/// Assert that a submission with a matching type was recorded.
///
/// The type is a glob: `*` matches any run of characters, `?` one character.
///
/// ```ignore
/// let submitted = store.drain();
/// assert_submitted!(submitted, "counter.increment.$settled-ok");
/// assert_submitted!(submitted, "counter.*.$in-progress");
/// ```
#[macro_export]
macro_rules! assert_submitted {
    ($actions:expr, $pattern:expr) => {
        assert!(
            $actions
                .iter()
                .any(|a| $crate::logger::glob_match($pattern, &a.action_type)),
            "Expected a submission matching `{}`, but got: {:?}",
            $pattern,
            $actions.iter().map(|a| a.action_type.as_str()).collect::<Vec<_>>()
        );
    };
}

/// Assert that no submission with a matching type was recorded.
///
/// ```ignore
/// assert_not_submitted!(store.drain(), "*.$settled-error");
/// ```
#[macro_export]
macro_rules! assert_not_submitted {
    ($actions:expr, $pattern:expr) => {
        assert!(
            !$actions
                .iter()
                .any(|a| $crate::logger::glob_match($pattern, &a.action_type)),
            "Expected NO submission matching `{}`, but got: {:?}",
            $pattern,
            $actions.iter().map(|a| a.action_type.as_str()).collect::<Vec<_>>()
        );
    };
}

/// First submission with a matching type.
///
/// ```ignore
/// let settled = find_submitted!(submitted, "*.$settled-ok").unwrap();
/// assert_eq!(settled.data["count"], json!(3));
/// ```
#[macro_export]
macro_rules! find_submitted {
    ($actions:expr, $pattern:expr) => {
        $actions
            .iter()
            .find(|a| $crate::logger::glob_match($pattern, &a.action_type))
    };
}

/// How many submissions have a matching type.
///
/// ```ignore
/// assert_eq!(count_submitted!(submitted, "error"), 2);
/// ```
#[macro_export]
macro_rules! count_submitted {
    ($actions:expr, $pattern:expr) => {
        $actions
            .iter()
            .filter(|a| $crate::logger::glob_match($pattern, &a.action_type))
            .count()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn status(action_type: &str, status: &str) -> LifecycleAction {
        let mut data = Map::new();
        data.insert("go$status".into(), json!(status));
        LifecycleAction::new(action_type, data)
    }

    #[test]
    fn test_recording_store_without_transition() {
        let store = RecordingStore::new(json!({ "n": {} }));
        store.submit(status("n.go.$in-progress", "in-progress"));

        assert_eq!(store.state(), json!({ "n": {} }));
        assert_eq!(store.types(), vec!["n.go.$in-progress"]);
        assert!(store.has_submitted());

        assert_eq!(store.drain().len(), 1);
        assert!(!store.has_submitted());
    }

    #[test]
    fn test_recording_store_applies_transition() {
        let transition = Transition::nest("n", Transition::leaf("n", ["go"], Map::new()));
        let store = RecordingStore::with_transition(json!({ "n": {} }), transition);

        store.submit(status("n.go.$in-progress", "in-progress"));
        assert_eq!(store.state(), json!({ "n": { "go$status": "in-progress" } }));
    }

    #[test]
    fn test_assert_macros() {
        let submitted = vec![
            status("n.go.$in-progress", "in-progress"),
            status("n.go.$settled-ok", "settled-ok"),
            LifecycleAction::error("action does not exist"),
        ];

        assert_submitted!(submitted, "n.go.$in-progress");
        assert_submitted!(submitted, "*.$settled-*");
        assert_not_submitted!(submitted, "n.go.$reset");

        let found = find_submitted!(submitted, "*.$settled-ok");
        assert_eq!(found.and_then(|a| a.status_of("go")), Some("settled-ok"));

        assert_eq!(count_submitted!(submitted, "n.go.*"), 2);
        assert_eq!(count_submitted!(submitted, "error"), 1);
    }
}
