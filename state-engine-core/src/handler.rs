//! Action handlers and the context they run in
//!
//! A handler declares its execution shape when it is registered:
//!
//! - [`Handler::immediate`]: runs synchronously and returns a value, a
//!   failure, or (via [`Outcome::Pending`]) a future to wait on
//! - [`Handler::deferred`]: returns a future
//! - [`Handler::multi_step`]: returns a [`StepSequence`] that yields futures
//!   one at a time and is resumed with each settled result
//! - [`Handler::settling`]: not a callable at all, just a future that is
//!   already running; every dispatch waits on the same result
//!
//! Every callable shape receives an [`ActionContext`] as its first argument.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::{Map, Value};

use crate::engine::{Dispatched, Engine};
use crate::error::HandlerError;
use crate::path;

/// Result of a handler that has not settled yet.
pub type SettleFuture = BoxFuture<'static, Result<Value, HandlerError>>;

/// What an immediate handler returned.
pub enum Outcome {
    /// A final value.
    Ready(Value),
    /// A pending result; the dispatch continues as if the handler were
    /// deferred.
    Pending(SettleFuture),
}

impl Outcome {
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Outcome::Pending(future.boxed())
    }
}

impl From<Value> for Outcome {
    fn from(value: Value) -> Self {
        Outcome::Ready(value)
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Outcome::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// One step of a multi-step handler.
pub enum Step {
    /// Suspend until this future settles, then resume with its result.
    Yield(SettleFuture),
    /// The handler is finished.
    Complete(Result<Value, HandlerError>),
}

impl Step {
    pub fn yield_on<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Step::Yield(future.boxed())
    }
}

/// A handler body expressed as a sequence of suspend points.
///
/// `resume` is first called with `None`, then with the settled result of
/// every future it yielded. A failed step is handed back as `Err`, so the
/// sequence may recover or complete with the failure.
pub trait StepSequence: Send {
    fn resume(&mut self, input: Option<Result<Value, HandlerError>>) -> Step;
}

impl<F> StepSequence for F
where
    F: FnMut(Option<Result<Value, HandlerError>>) -> Step + Send,
{
    fn resume(&mut self, input: Option<Result<Value, HandlerError>>) -> Step {
        self(input)
    }
}

/// Drive a step sequence to completion.
pub async fn drive(mut steps: Box<dyn StepSequence>) -> Result<Value, HandlerError> {
    let mut input = None;
    loop {
        match steps.resume(input.take()) {
            Step::Yield(future) => input = Some(future.await),
            Step::Complete(result) => return result,
        }
    }
}

type ImmediateFn = dyn Fn(&ActionContext, &[Value]) -> Result<Outcome, HandlerError> + Send + Sync;
type DeferredFn = dyn Fn(ActionContext, Vec<Value>) -> SettleFuture + Send + Sync;
type MultiStepFn = dyn Fn(ActionContext, Vec<Value>) -> Box<dyn StepSequence> + Send + Sync;

/// The execution shape of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerShape {
    Immediate,
    Deferred,
    MultiStep,
    AlreadySettling,
}

impl fmt::Display for HandlerShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandlerShape::Immediate => "immediate",
            HandlerShape::Deferred => "deferred",
            HandlerShape::MultiStep => "multi-step",
            HandlerShape::AlreadySettling => "already-settling",
        })
    }
}

/// A registered action handler.
#[derive(Clone)]
pub enum Handler {
    Immediate(Arc<ImmediateFn>),
    Deferred(Arc<DeferredFn>),
    MultiStep(Arc<MultiStepFn>),
    AlreadySettling(Shared<SettleFuture>),
}

impl Handler {
    /// A synchronous handler.
    ///
    /// # Example
    ///
    /// ```
    /// use serde_json::json;
    /// use state_engine_core::Handler;
    ///
    /// let increment = Handler::immediate(|ctx, _args| {
    ///     let count = ctx.field("count").and_then(|v| v.as_i64()).unwrap_or(0);
    ///     Ok(json!({ "count": count + 1 }))
    /// });
    /// ```
    pub fn immediate<F, R>(f: F) -> Self
    where
        F: Fn(&ActionContext, &[Value]) -> Result<R, HandlerError> + Send + Sync + 'static,
        R: Into<Outcome>,
    {
        Handler::Immediate(Arc::new(move |ctx: &ActionContext, args: &[Value]| {
            f(ctx, args).map(Into::into)
        }))
    }

    /// A handler returning a future.
    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: Fn(ActionContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Handler::Deferred(Arc::new(move |ctx: ActionContext, args: Vec<Value>| {
            f(ctx, args).boxed()
        }))
    }

    /// A handler expressed as a sequence of suspend points.
    pub fn multi_step<F, S>(f: F) -> Self
    where
        F: Fn(ActionContext, Vec<Value>) -> S + Send + Sync + 'static,
        S: StepSequence + 'static,
    {
        Handler::MultiStep(Arc::new(move |ctx: ActionContext, args: Vec<Value>| {
            Box::new(f(ctx, args)) as Box<dyn StepSequence>
        }))
    }

    /// A result that is already on its way. Every dispatch of this action
    /// observes the same settled value.
    pub fn settling<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Handler::AlreadySettling(future.boxed().shared())
    }

    pub fn shape(&self) -> HandlerShape {
        match self {
            Handler::Immediate(_) => HandlerShape::Immediate,
            Handler::Deferred(_) => HandlerShape::Deferred,
            Handler::MultiStep(_) => HandlerShape::MultiStep,
            Handler::AlreadySettling(_) => HandlerShape::AlreadySettling,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler::{}", self.shape())
    }
}

/// Explicit receiver passed to every handler.
///
/// Exposes the owning node's state as it was last bound to the scope, the
/// node's other handlers, and the engine for nested dispatches.
#[derive(Clone)]
pub struct ActionContext {
    node_path: String,
    action_name: String,
    state: Map<String, Value>,
    siblings: Arc<BTreeMap<String, Handler>>,
    engine: Engine,
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("node_path", &self.node_path)
            .field("action_name", &self.action_name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ActionContext {
    pub(crate) fn new(
        node_path: String,
        action_name: String,
        state: Map<String, Value>,
        siblings: Arc<BTreeMap<String, Handler>>,
        engine: Engine,
    ) -> Self {
        Self {
            node_path,
            action_name,
            state,
            siblings,
            engine,
        }
    }

    /// Path of the node owning the action.
    pub fn node_path(&self) -> &str {
        &self.node_path
    }

    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    pub fn action_path(&self) -> String {
        path::join(&self.node_path, &self.action_name)
    }

    /// Snapshot of the node's state taken when the scope was last bound.
    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.state.get(name)
    }

    /// Fresh read of the node's state from the store.
    pub fn live_state(&self) -> Option<Value> {
        self.engine.state_at(&self.node_path)
    }

    /// Another handler of the same node.
    pub fn sibling(&self, name: &str) -> Option<&Handler> {
        self.siblings.get(name)
    }

    pub fn sibling_names(&self) -> impl Iterator<Item = &str> {
        self.siblings.keys().map(String::as_str)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Dispatch another action of the same node through the full lifecycle.
    pub fn dispatch_sibling(&self, name: &str, args: Vec<Value>) -> Dispatched {
        self.engine.dispatch(&path::join(&self.node_path, name), args)
    }

    /// Dispatch any action by absolute path.
    pub fn dispatch(&self, action_path: &str, args: Vec<Value>) -> Dispatched {
        self.engine.dispatch(action_path, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shapes() {
        assert_eq!(
            Handler::immediate(|_, _| Ok(json!(1))).shape(),
            HandlerShape::Immediate
        );
        assert_eq!(
            Handler::deferred(|_, _| async { Ok(json!(1)) }).shape(),
            HandlerShape::Deferred
        );
        assert_eq!(
            Handler::multi_step(|_, _| |_: Option<Result<Value, HandlerError>>| {
                Step::Complete(Ok(Value::Null))
            })
            .shape(),
            HandlerShape::MultiStep
        );
        assert_eq!(
            Handler::settling(async { Ok(json!(1)) }).shape(),
            HandlerShape::AlreadySettling
        );
        assert_eq!(HandlerShape::MultiStep.to_string(), "multi-step");
    }

    #[tokio::test]
    async fn test_drive_resumes_with_each_result() {
        let mut seen = Vec::new();
        let steps = move |input: Option<Result<Value, HandlerError>>| {
            if let Some(Ok(value)) = input {
                seen.push(value);
            }
            match seen.len() {
                0 => Step::yield_on(async { Ok(json!(1)) }),
                1 => Step::yield_on(async { Ok(json!(2)) }),
                _ => Step::Complete(Ok(json!(seen.clone()))),
            }
        };

        let result = drive(Box::new(steps)).await;
        assert_eq!(result, Ok(json!([1, 2])));
    }

    #[tokio::test]
    async fn test_drive_hands_failures_back() {
        let mut attempts = 0;
        let steps = move |input: Option<Result<Value, HandlerError>>| {
            attempts += 1;
            match input {
                None => Step::yield_on(async { Err(HandlerError::new("first")) }),
                // Recover once, then give up on the second failure
                Some(Err(err)) if attempts == 2 => {
                    let message = format!("{} again", err.message);
                    Step::yield_on(async move { Err(HandlerError::new(message)) })
                }
                Some(Err(err)) => Step::Complete(Err(err)),
                Some(Ok(value)) => Step::Complete(Ok(value)),
            }
        };

        let result = drive(Box::new(steps)).await;
        assert_eq!(result, Err(HandlerError::new("first again")));
    }

    #[tokio::test]
    async fn test_outcome_pending() {
        match Outcome::pending(async { Ok(json!("later")) }) {
            Outcome::Pending(future) => assert_eq!(future.await, Ok(json!("later"))),
            Outcome::Ready(_) => panic!("expected a pending outcome"),
        }
        assert!(matches!(Outcome::from(json!(1)), Outcome::Ready(_)));
    }
}
