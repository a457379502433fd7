//! Compiling controller trees
//!
//! Compilation walks the tree depth first. Every node yields its path, its
//! transition, its merged initial state and its view; named children are
//! nested under their name while unnamed children are merged into their
//! parent. Actions and identifiers are registered on the engine on the way.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::controller::{Controller, Entry};
use crate::engine::Engine;
use crate::error::CompileError;
use crate::lifecycle;
use crate::path;
use crate::scope::ActionScope;
use crate::transition::Transition;
use crate::view::{CompileStrategies, DispatchMapper, StateMapper};

/// Views produced by [`Engine::load`].
#[derive(Debug, Clone)]
pub struct Loaded<V> {
    /// The root's assembled (and, if named, connected) view.
    pub root_view: Option<V>,
    /// Views of the root's named children, by name.
    pub views: BTreeMap<String, V>,
    /// Assembled views of every named node, by path, before connecting.
    pub views_by_path: BTreeMap<String, V>,
}

/// Output of compiling one node.
struct Compiled<V> {
    name: Option<String>,
    transition: Transition,
    state: Map<String, Value>,
    view: Option<V>,
    views: BTreeMap<String, V>,
    /// Names this node places at its own state level: its named children
    /// and those contributed by its unnamed children.
    child_names: Vec<String>,
}

pub(crate) fn load<V: Clone>(
    engine: &Engine,
    root: Controller<V>,
    strategies: &CompileStrategies<V>,
) -> Result<Loaded<V>, CompileError> {
    let mut compiler = Compiler {
        engine,
        strategies,
        views_by_path: BTreeMap::new(),
    };
    let compiled = compiler.compile(root, "")?;

    let (transition, state) = match &compiled.name {
        Some(name) => {
            let mut nested = Map::new();
            nested.insert(name.clone(), Value::Object(compiled.state));
            (Transition::nest(name.clone(), compiled.transition), nested)
        }
        None => (compiled.transition, compiled.state),
    };
    engine.install_root(transition, state);

    tracing::info!(
        actions = engine.action_paths().len(),
        views = compiler.views_by_path.len(),
        "Loaded controllers"
    );
    Ok(Loaded {
        root_view: compiled.view,
        views: compiled.views,
        views_by_path: compiler.views_by_path,
    })
}

struct Compiler<'a, V> {
    engine: &'a Engine,
    strategies: &'a CompileStrategies<V>,
    views_by_path: BTreeMap<String, V>,
}

impl<V: Clone> Compiler<'_, V> {
    fn compile(&mut self, node: Controller<V>, parent_path: &str) -> Result<Compiled<V>, CompileError> {
        let Controller {
            name,
            identifier,
            view,
            combine,
            children,
            entries,
        } = node;

        let node_path = match &name {
            Some(name) => path::join(parent_path, name),
            None => parent_path.to_string(),
        };
        if let Some(identifier) = &identifier {
            self.engine.register_identifier(identifier, &node_path)?;
        }

        let mut handlers = BTreeMap::new();
        let mut state = Map::new();
        for (key, entry) in entries {
            match self.strategies.convert(&key, entry) {
                Entry::Action(handler) => {
                    handlers.insert(key, handler);
                }
                Entry::State(value) => {
                    state.insert(key, value);
                }
            }
        }

        let mut merged = Vec::new();
        let mut nested = Vec::new();
        let mut views = BTreeMap::new();
        let mut seen = HashSet::new();
        let mut claim = |child_name: &str| {
            if seen.insert(child_name.to_string()) {
                Ok(())
            } else {
                Err(CompileError::DuplicatePath {
                    path: path::join(&node_path, child_name),
                })
            }
        };
        for child in children {
            let compiled = self.compile(child, &node_path)?;
            match compiled.name {
                None => {
                    for child_name in &compiled.child_names {
                        claim(child_name)?;
                    }
                    merged.push(compiled.transition);
                    state.extend(compiled.state);
                    views.extend(compiled.views);
                }
                Some(child_name) => {
                    claim(&child_name)?;
                    state.insert(child_name.clone(), Value::Object(compiled.state));
                    if let Some(child_view) = compiled.view {
                        views.insert(child_name.clone(), child_view);
                    }
                    nested.push((child_name, compiled.transition));
                }
            }
        }

        let action_names: Vec<String> = handlers.keys().cloned().collect();
        let scope = Arc::new(ActionScope::new(node_path.clone(), handlers));

        let mut view = self.strategies.assemble(view, &views);
        if name.is_some() {
            if let Some(assembled) = view.take() {
                self.views_by_path.insert(node_path.clone(), assembled.clone());
                let state_mapper = StateMapper::new(node_path.clone(), combine, self.engine.clone());
                let dispatch_mapper =
                    DispatchMapper::new(node_path.clone(), action_names.clone(), self.engine.clone());
                view = Some(self.strategies.connect(state_mapper, dispatch_mapper, assembled));
            }
        }

        let expanded = lifecycle::expand(
            &node_path,
            action_names.iter().map(String::as_str),
            self.engine.config(),
        );
        self.engine.register_actions(&scope, expanded)?;

        let leaf = if action_names.is_empty() {
            Transition::identity()
        } else {
            Transition::leaf(&node_path, action_names.iter().map(String::as_str), state.clone())
        };
        merged.insert(0, leaf);
        let transition = Transition::compose(merged, nested);

        tracing::debug!(
            path = %node_path,
            actions = action_names.len(),
            named = name.is_some(),
            identity = transition.is_identity(),
            "Compiled controller"
        );

        Ok(Compiled {
            name,
            transition,
            state,
            view,
            views,
            child_names: seen.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::lifecycle::LifecycleAction;
    use serde_json::json;

    fn noop() -> Handler {
        Handler::immediate(|_, _| Ok(Value::Null))
    }

    #[test]
    fn test_initial_state_nests_named_and_merges_unnamed() {
        let engine = Engine::new();
        let tree: Controller = Controller::named("app")
            .state("title", json!("t"))
            .child(Controller::unnamed().state("flag", json!(true)))
            .child(Controller::named("todos").state("items", json!([])));

        engine.load(tree, &CompileStrategies::new()).unwrap();
        assert_eq!(
            engine.initial_state(),
            json!({ "app": { "title": "t", "flag": true, "todos": { "items": [] } } })
        );
    }

    #[test]
    fn test_action_paths_follow_names() {
        let engine = Engine::new();
        let tree: Controller = Controller::unnamed()
            .action("boot", noop())
            .child(Controller::unnamed().action("ping", noop()))
            .child(Controller::named("a").child(Controller::named("b").action("go", noop())));

        engine.load(tree, &CompileStrategies::new()).unwrap();
        assert_eq!(engine.action_paths(), vec!["a.b.go", "boot", "ping"]);
    }

    #[test]
    fn test_actionless_tree_is_identity() {
        let engine = Engine::new();
        let tree: Controller = Controller::named("a").child(Controller::named("b").state("x", json!(1)));

        engine.load(tree, &CompileStrategies::new()).unwrap();
        assert!(engine.root_transition().is_identity());
    }

    #[test]
    fn test_root_transition_reaches_nested_nodes() {
        let engine = Engine::new();
        let tree: Controller = Controller::named("a").child(Controller::named("b").action("go", noop()));
        engine.load(tree, &CompileStrategies::new()).unwrap();

        let mut state = engine.initial_state();
        let mut data = Map::new();
        data.insert("go$status".into(), json!("in-progress"));
        let changed = engine
            .root_transition()
            .apply(&mut state, &LifecycleAction::new("a.b.go.$in-progress", data));

        assert!(changed);
        assert_eq!(state["a"]["b"]["go$status"], json!("in-progress"));
    }

    #[test]
    fn test_duplicate_sibling_names_fail() {
        let engine = Engine::new();
        let tree: Controller = Controller::unnamed()
            .child(Controller::named("a"))
            .child(Controller::named("a"));

        let err = engine.load(tree, &CompileStrategies::new()).unwrap_err();
        assert_eq!(err, CompileError::DuplicatePath { path: "a".into() });
    }

    #[test]
    fn test_named_node_behind_transparent_child_cannot_reuse_a_path() {
        let tree: Controller = Controller::named("app")
            .child(Controller::named("x").state("a", json!(1)))
            .child(Controller::unnamed().child(Controller::named("x").state("b", json!(2))));
        let err = Engine::new().load(tree, &CompileStrategies::new()).unwrap_err();
        assert_eq!(err, CompileError::DuplicatePath { path: "app.x".into() });

        // Either order, through any depth of transparent nodes
        let tree: Controller = Controller::named("app")
            .child(
                Controller::unnamed()
                    .child(Controller::unnamed().child(Controller::named("x").state("b", json!(2)))),
            )
            .child(Controller::named("x").state("a", json!(1)));
        let err = Engine::new().load(tree, &CompileStrategies::new()).unwrap_err();
        assert_eq!(err, CompileError::DuplicatePath { path: "app.x".into() });
    }

    #[test]
    fn test_transparent_children_may_contribute_distinct_names() {
        let tree: Controller = Controller::named("app")
            .child(Controller::named("x").state("a", json!(1)))
            .child(Controller::unnamed().child(Controller::named("y").state("b", json!(2))));
        let engine = Engine::new();
        engine.load(tree, &CompileStrategies::new()).unwrap();

        assert_eq!(
            engine.initial_state(),
            json!({ "app": { "x": { "a": 1 }, "y": { "b": 2 } } })
        );
    }

    #[test]
    fn test_transparent_child_cannot_shadow_parent_action() {
        let engine = Engine::new();
        let tree: Controller = Controller::named("n")
            .action("go", noop())
            .child(Controller::unnamed().action("go", noop()));

        let err = engine.load(tree, &CompileStrategies::new()).unwrap_err();
        assert_eq!(err, CompileError::DuplicateAction { path: "n.go".into() });
    }

    #[test]
    fn test_duplicate_identifier_fails() {
        let engine = Engine::new();
        let tree: Controller = Controller::unnamed()
            .child(Controller::named("a").identifier("x"))
            .child(Controller::named("b").identifier("x"));

        let err = engine.load(tree, &CompileStrategies::new()).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateIdentifier {
                identifier: "x".into(),
                existing: "a".into(),
            }
        );
    }

    #[test]
    fn test_unnamed_identifier_points_at_parent() {
        let engine = Engine::new();
        let tree: Controller = Controller::named("p").child(Controller::unnamed().identifier("inner"));

        engine.load(tree, &CompileStrategies::new()).unwrap();
        assert_eq!(engine.resolve_reference("#inner").as_deref(), Some("p"));
    }

    #[test]
    fn test_converter_reclassifies_entries() {
        let engine = Engine::new();
        let strategies = CompileStrategies::<()>::new().with_converter(|key, entry| {
            if key.starts_with("on_") {
                Entry::Action(Handler::immediate(|_, _| Ok(Value::Null)))
            } else {
                entry
            }
        });
        let tree: Controller = Controller::named("n")
            .state("on_click", json!("placeholder"))
            .state("label", json!("x"));

        engine.load(tree, &strategies).unwrap();
        assert!(engine.has_action("n.on_click"));
        assert_eq!(engine.initial_state(), json!({ "n": { "label": "x" } }));
    }

    #[test]
    fn test_views_connect_named_nodes_only() {
        let engine = Engine::new();
        let strategies = CompileStrategies::<String>::new()
            .with_connect(|state, dispatch, view| {
                format!("{view}@{}[{}]", state.node_path(), dispatch.action_names().join(","))
            })
            .with_assemble_view(|own, children| {
                let inner: Vec<_> = children.values().cloned().collect();
                match (own, inner.is_empty()) {
                    (Some(own), true) => Some(own),
                    (Some(own), false) => Some(format!("{own}({})", inner.join(","))),
                    (None, false) => Some(inner.join(",")),
                    (None, true) => None,
                }
            });
        let tree = Controller::unnamed()
            .view("Root".to_string())
            .child(
                Controller::named("list")
                    .view("List".to_string())
                    .action("add", noop()),
            )
            .child(Controller::named("empty"));

        let loaded = engine.load(tree, &strategies).unwrap();

        assert_eq!(loaded.root_view.as_deref(), Some("Root(List@list[add])"));
        assert_eq!(loaded.views.get("list").map(String::as_str), Some("List@list[add]"));
        assert!(!loaded.views.contains_key("empty"));
        assert_eq!(
            loaded.views_by_path.get("list").map(String::as_str),
            Some("List")
        );
    }
}
