//! State-transition functions (reducers) built from compiled nodes
//!
//! A transition mutates a state tree in place and returns `true` only if
//! something actually changed. Returning `false` guarantees the tree was
//! not touched, which is what lets subscribers skip work.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::lifecycle::{lifecycle_type, LifecycleAction, Phase};
use crate::path;

type TransitionFn = dyn Fn(&mut Value, &LifecycleAction) -> bool + Send + Sync;

/// A composable state-transition function.
#[derive(Clone)]
pub struct Transition {
    inner: Arc<TransitionFn>,
    identity: bool,
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Default for Transition {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transition {
    /// Wrap an arbitrary transition function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&mut Value, &LifecycleAction) -> bool + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(f),
            identity: false,
        }
    }

    /// A transition that never changes anything.
    pub fn identity() -> Self {
        Self {
            inner: Arc::new(|_: &mut Value, _: &LifecycleAction| false),
            identity: true,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// Apply the transition. Returns whether the state changed.
    pub fn apply(&self, state: &mut Value, action: &LifecycleAction) -> bool {
        (self.inner)(state, action)
    }

    /// Leaf transition for the actions directly owned by `owner_path`.
    ///
    /// Matches every lifecycle type of every named action and shallow-merges
    /// the action's data into the state. A state that is not a mapping is
    /// first replaced by `initial`. With no actions this is the identity.
    pub fn leaf<'a, I>(owner_path: &str, action_names: I, initial: Map<String, Value>) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let types: HashSet<String> = action_names
            .into_iter()
            .flat_map(|name| {
                let action_path = path::join(owner_path, name);
                Phase::ALL.map(|phase| lifecycle_type(&action_path, phase))
            })
            .collect();

        if types.is_empty() {
            return Self::identity();
        }

        Self::from_fn(move |state, action| {
            if !types.contains(&action.action_type) {
                return false;
            }
            let Some(patch) = action.data.as_object() else {
                return false;
            };

            let mut changed = false;
            if !state.is_object() {
                *state = Value::Object(initial.clone());
                changed = true;
            }
            if let Some(fields) = state.as_object_mut() {
                for (key, value) in patch {
                    if fields.get(key) != Some(value) {
                        fields.insert(key.clone(), value.clone());
                        changed = true;
                    }
                }
            }
            changed
        })
    }

    /// Compose a node's own transitions with its keyed children.
    ///
    /// `selfs` run in order against the whole state, then each child runs
    /// against `state[key]`. Identity members are dropped; if nothing
    /// remains the result is the identity.
    pub fn compose(selfs: Vec<Transition>, children: Vec<(String, Transition)>) -> Self {
        let selfs: Vec<_> = selfs.into_iter().filter(|t| !t.identity).collect();
        let children: Vec<_> = children.into_iter().filter(|(_, t)| !t.identity).collect();

        match (selfs.len(), children.len()) {
            (0, 0) => return Self::identity(),
            (1, 0) => return selfs.into_iter().next().unwrap_or_default(),
            _ => {}
        }

        Self::from_fn(move |state, action| {
            let mut changed = false;
            for transition in &selfs {
                changed |= transition.apply(state, action);
            }
            if !children.is_empty() {
                changed |= apply_children(&children, state, action);
            }
            changed
        })
    }

    /// Nest a transition under a single key.
    pub fn nest(key: impl Into<String>, inner: Transition) -> Self {
        Self::compose(Vec::new(), vec![(key.into(), inner)])
    }
}

fn apply_children(
    children: &[(String, Transition)],
    state: &mut Value,
    action: &LifecycleAction,
) -> bool {
    if !state.is_object() {
        let mut fresh = Value::Object(Map::new());
        if apply_children(children, &mut fresh, action) {
            *state = fresh;
            return true;
        }
        return false;
    }
    let Some(fields) = state.as_object_mut() else {
        return false;
    };

    let mut changed = false;
    for (key, child) in children {
        match fields.get_mut(key) {
            Some(slot) => changed |= child.apply(slot, action),
            None => {
                // Only materialise the key if the child actually wrote to it
                let mut slot = Value::Null;
                if child.apply(&mut slot, action) {
                    fields.insert(key.clone(), slot);
                    changed = true;
                }
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn action(action_type: &str, data: Value) -> LifecycleAction {
        LifecycleAction::new(action_type, object(data))
    }

    #[test]
    fn test_leaf_merges_matching_actions() {
        let leaf = Transition::leaf("counter", ["increment"], object(json!({ "count": 0 })));
        let mut state = json!({ "count": 0 });

        let changed = leaf.apply(
            &mut state,
            &action(
                "counter.increment.$settled-ok",
                json!({ "increment$status": "settled-ok", "count": 1 }),
            ),
        );

        assert!(changed);
        assert_eq!(state, json!({ "count": 1, "increment$status": "settled-ok" }));
    }

    #[test]
    fn test_leaf_ignores_other_actions() {
        let leaf = Transition::leaf("counter", ["increment"], Map::new());
        let mut state = json!({ "count": 0 });

        assert!(!leaf.apply(&mut state, &action("counter.decrement.$settled-ok", json!({ "count": 9 }))));
        assert!(!leaf.apply(&mut state, &LifecycleAction::error("nope")));
        assert_eq!(state, json!({ "count": 0 }));
    }

    #[test]
    fn test_leaf_reports_unchanged_when_fields_equal() {
        let leaf = Transition::leaf("", ["load"], Map::new());
        let mut state = json!({ "load$status": "in-progress" });

        assert!(!leaf.apply(
            &mut state,
            &action("load.$in-progress", json!({ "load$status": "in-progress" }))
        ));
    }

    #[test]
    fn test_leaf_seeds_initial_state() {
        let leaf = Transition::leaf("todo", ["add"], object(json!({ "items": [] })));
        let mut state = Value::Null;

        assert!(leaf.apply(&mut state, &action("todo.add.$in-progress", json!({ "add$status": "in-progress" }))));
        assert_eq!(state, json!({ "items": [], "add$status": "in-progress" }));
    }

    #[test]
    fn test_leaf_without_actions_is_identity() {
        let leaf = Transition::leaf("empty", std::iter::empty::<&str>(), object(json!({ "a": 1 })));
        assert!(leaf.is_identity());
    }

    #[test]
    fn test_compose_children() {
        let child = Transition::leaf("app.counter", ["increment"], object(json!({ "count": 0 })));
        let own = Transition::leaf("app", ["load"], Map::new());
        let composed = Transition::compose(vec![own], vec![("counter".into(), child)]);

        let mut state = json!({ "title": "t", "counter": { "count": 0 } });
        let changed = composed.apply(
            &mut state,
            &action("app.counter.increment.$settled-ok", json!({ "count": 5 })),
        );

        assert!(changed);
        assert_eq!(state, json!({ "title": "t", "counter": { "count": 5 } }));

        let changed = composed.apply(
            &mut state,
            &action("app.load.$in-progress", json!({ "load$status": "in-progress" })),
        );
        assert!(changed);
        assert_eq!(state["load$status"], json!("in-progress"));
        assert_eq!(state["counter"], json!({ "count": 5 }));
    }

    #[test]
    fn test_compose_unmatched_leaves_state_untouched() {
        let child = Transition::leaf("a.b", ["go"], Map::new());
        let composed = Transition::compose(
            vec![Transition::leaf("a", ["run"], Map::new())],
            vec![("b".into(), child)],
        );

        let mut state = json!({ "b": { "x": 1 } });
        let before = state.clone();
        assert!(!composed.apply(&mut state, &action("other.$settled-ok", json!({ "x": 2 }))));
        assert_eq!(state, before);
    }

    #[test]
    fn test_compose_missing_child_key_only_materialised_on_change() {
        let child = Transition::leaf("b", ["go"], object(json!({ "ready": false })));
        let composed = Transition::nest("b", child);

        let mut state = json!({});
        assert!(!composed.apply(&mut state, &action("x.$reset", json!({}))));
        assert_eq!(state, json!({}));

        assert!(composed.apply(&mut state, &action("b.go.$in-progress", json!({ "go$status": "in-progress" }))));
        assert_eq!(state, json!({ "b": { "ready": false, "go$status": "in-progress" } }));
    }

    #[test]
    fn test_compose_of_identities_is_identity() {
        let composed = Transition::compose(
            vec![Transition::identity()],
            vec![("child".into(), Transition::identity())],
        );
        assert!(composed.is_identity());

        let mut state = json!({ "child": {} });
        assert!(!composed.apply(&mut state, &action("child.x.$reset", json!({}))));
    }
}
