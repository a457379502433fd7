//! Core types for state-engine
//!
//! Compiles a declarative tree of controllers into a single state-transition
//! function plus a registry of dispatchable actions, and runs every dispatch
//! through a uniform lifecycle recorded in the state itself.
//!
//! # Core Concepts
//!
//! - **Controller**: one node of the tree: state fields, actions, a view,
//!   children. Named nodes nest under their name; unnamed ones merge into
//!   their parent.
//! - **Handler**: an action body with an explicit shape (immediate,
//!   deferred, multi-step, already settling)
//! - **Lifecycle**: every action `P.A` expands into `P.A.$in-progress`,
//!   `P.A.$settled-ok`, `P.A.$settled-error` and `P.A.$reset`, which write
//!   `A$status`, `A$response` and `A$error` into the node's state
//! - **Transition**: the compiled reducer, which reports whether anything
//!   changed
//! - **Engine**: owns the compiled tables and dispatches against a
//!   [`StateStore`]
//!
//! # Basic Example
//!
//! ```
//! use serde_json::json;
//! use state_engine_core::prelude::*;
//!
//! let engine = Engine::new();
//! let app: Controller = Controller::unnamed()
//!     .child(
//!         Controller::named("counter")
//!             .identifier("counter")
//!             .state("count", json!(0))
//!             .action("increment", Handler::immediate(|ctx, _| {
//!                 let count = ctx.field("count").and_then(|v| v.as_i64()).unwrap_or(0);
//!                 Ok(json!({ "count": count + 1 }))
//!             })),
//!     );
//!
//! engine.load(app, &CompileStrategies::new()).unwrap();
//! let store = engine.create_store();
//! let _ = engine.dispatch("counter.increment", vec![]);
//!
//! let state = store.state();
//! assert_eq!(state["counter"]["count"], json!(1));
//! assert_eq!(state["counter"]["increment$status"], json!("settled-ok"));
//! ```
//!
//! # Async Handlers
//!
//! Deferred and multi-step handlers return [`Dispatched::Pending`]. The
//! settled lifecycle action is submitted only once the future resolves, so
//! the caller must drive it: `.await` it, or [`Dispatched::spawn`] it onto
//! the tokio runtime.
//!
//! ```ignore
//! let load = Handler::deferred(|ctx, _| async move {
//!     let items = fetch_items().await?;
//!     Ok(json!({ "items": items }))
//! });
//!
//! let _ = engine.dispatch("todos.load", vec![]).spawn();
//! ```

pub mod compiler;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod logger;
pub mod path;
pub mod scope;
pub mod store;
pub mod testing;
pub mod transition;
pub mod view;

// Compilation
pub use compiler::Loaded;
pub use controller::{Combine, Controller, Entry};
pub use view::{BoundAction, CompileStrategies, DispatchMapper, StateMapper, ViewActions};

// Dispatch
pub use engine::{DispatchState, Dispatched, Engine};
pub use handler::{
    ActionContext, Handler, HandlerShape, Outcome, SettleFuture, Step, StepSequence,
};
pub use lifecycle::{ExpandedAction, LifecycleAction, LifecycleTemplate, Phase};
pub use scope::ActionScope;
pub use transition::Transition;

// Store exports
pub use store::{
    ComposedMiddleware, LoggingMiddleware, Middleware, NoopMiddleware, StateStore, Store,
};

pub use config::{EngineConfig, ResponsePolicy};
pub use error::{CompileError, DispatchError, HandlerError, RoutingReason};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{EngineConfig, ResponsePolicy};
    pub use crate::controller::{Combine, Controller, Entry};
    pub use crate::engine::{Dispatched, Engine};
    pub use crate::error::{CompileError, DispatchError, HandlerError};
    pub use crate::handler::{ActionContext, Handler, Outcome, Step};
    pub use crate::lifecycle::{LifecycleAction, Phase};
    pub use crate::logger::{SubmissionLoggerConfig, SubmissionLoggerMiddleware};
    pub use crate::store::{
        ComposedMiddleware, LoggingMiddleware, Middleware, NoopMiddleware, StateStore, Store,
    };
    pub use crate::transition::Transition;
    pub use crate::view::{CompileStrategies, DispatchMapper, StateMapper};
}
