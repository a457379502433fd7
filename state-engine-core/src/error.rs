//! Error types for compilation and dispatch

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while compiling a controller tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Two named siblings produced the same path.
    #[error("duplicate controller path '{path}'")]
    DuplicatePath { path: String },

    /// An action path was registered twice (usually a transparent child
    /// declaring the same action name as its parent).
    #[error("duplicate action '{path}'")]
    DuplicateAction { path: String },

    /// Two nodes declared the same global identifier.
    #[error("identifier '#{identifier}' already points at '{existing}'")]
    DuplicateIdentifier { identifier: String, existing: String },
}

/// Why a dispatch could not be routed to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingReason {
    /// The action path was empty.
    EmptyPath,
    /// No action is registered under the path.
    UnknownAction,
    /// The path names something that is not a dispatchable handler,
    /// e.g. one of the synthesized lifecycle variants.
    UnsupportedShape,
}

impl RoutingReason {
    /// Message submitted to the store alongside the `error` action.
    pub fn message(self) -> &'static str {
        match self {
            RoutingReason::EmptyPath => "action path should be a non-empty string",
            RoutingReason::UnknownAction => "action does not exist",
            RoutingReason::UnsupportedShape => "unsupported action handler type",
        }
    }
}

impl std::fmt::Display for RoutingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Failure value produced by an action handler.
///
/// Serialises into the `<action>$error` field of a `settled-error` payload.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    /// Attach structured detail to the error.
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// JSON form used in lifecycle payloads.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::String(self.message.clone()))
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Errors returned by [`Engine::dispatch`](crate::Engine::dispatch).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// No store was attached before dispatching. Never submitted to a store.
    #[error("controllers must be loaded and a store attached before dispatching actions")]
    StoreNotAttached,

    /// The path could not be routed. An `error` action was submitted.
    #[error("cannot dispatch '{path}': {reason}")]
    Routing { path: String, reason: RoutingReason },

    /// The handler failed. A `settled-error` action was submitted.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// A pending handler was dispatched outside a tokio runtime. A
    /// `settled-error` action was submitted.
    #[error("pending handlers must be dispatched from within a tokio runtime")]
    NoRuntime,

    /// The spawned settlement panicked or its runtime shut down before it
    /// finished.
    #[error("dispatch aborted: {0}")]
    Aborted(String),
}

impl DispatchError {
    /// The handler's own failure value, if this is a handler failure.
    pub fn handler_error(&self) -> Option<&HandlerError> {
        match self {
            DispatchError::Handler(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_routing(&self) -> bool {
        matches!(self, DispatchError::Routing { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handler_error_value_skips_empty_detail() {
        let err = HandlerError::new("boom");
        assert_eq!(err.to_value(), json!({ "message": "boom" }));

        let err = HandlerError::new("boom").with_detail(json!({ "code": 7 }));
        assert_eq!(
            err.to_value(),
            json!({ "message": "boom", "detail": { "code": 7 } })
        );
    }

    #[test]
    fn test_dispatch_error_display() {
        let err = DispatchError::Routing {
            path: "counter.nope".into(),
            reason: RoutingReason::UnknownAction,
        };
        assert_eq!(
            err.to_string(),
            "cannot dispatch 'counter.nope': action does not exist"
        );
        assert!(err.is_routing());

        let err = DispatchError::from(HandlerError::new("boom"));
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.handler_error().map(|e| e.message.as_str()), Some("boom"));
    }
}
