//! state-engine: declarative controller trees for lifecycle-aware state
//!
//! Describe the application as a tree of controllers, load it into an
//! [`Engine`], and dispatch actions by path. Every dispatch records its
//! progress (`$status`), its result (`$response`) or its failure (`$error`)
//! in the state tree, so views only ever read state.
//!
//! # Example
//! ```
//! use serde_json::json;
//! use state_engine::prelude::*;
//!
//! let engine = Engine::new();
//! let todos: Controller = Controller::named("todos")
//!     .state("items", json!([]))
//!     .action("add", Handler::immediate(|ctx, args| {
//!         let mut items = ctx.field("items").and_then(|v| v.as_array()).cloned().unwrap_or_default();
//!         items.extend(args.iter().cloned());
//!         Ok(json!({ "items": items }))
//!     }));
//!
//! engine.load(todos, &CompileStrategies::new()).unwrap();
//! let store = engine.create_store();
//! let _ = engine.dispatch("todos.add", vec![json!("milk")]);
//!
//! assert_eq!(store.state()["todos"]["items"], json!(["milk"]));
//! ```

// Re-export everything from core
pub use state_engine_core::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use state_engine_core::prelude::*;

    // Test tooling
    pub use state_engine_core::testing::RecordingStore;
    pub use state_engine_core::{
        assert_not_submitted, assert_submitted, count_submitted, find_submitted,
    };
}
