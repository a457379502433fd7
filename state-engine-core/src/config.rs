//! Engine configuration

use serde::{Deserialize, Serialize};

/// How a `settled-ok` payload carries the handler's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponsePolicy {
    /// Every action stores its result under `<action>$response`, and an
    /// object result is additionally merged flat into the node's state.
    #[default]
    FlattenAlways,
    /// Internal actions (names starting with the internal marker) merge an
    /// object result flat with no response field, so the result replaces
    /// matching state fields. Other actions only get `<action>$response`.
    ReplaceInternal,
}

/// Configuration for an [`Engine`](crate::Engine).
///
/// # Example
///
/// ```
/// use state_engine_core::config::{EngineConfig, ResponsePolicy};
///
/// let config = EngineConfig::from_json(r#"{ "response-policy": "replace-internal" }"#).unwrap();
/// assert_eq!(config.response_policy, ResponsePolicy::ReplaceInternal);
/// assert_eq!(config.internal_marker, '_');
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Payload policy for successful results
    pub response_policy: ResponsePolicy,
    /// First character that marks an action as internal
    pub internal_marker: char,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            response_policy: ResponsePolicy::FlattenAlways,
            internal_marker: '_',
        }
    }
}

impl EngineConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_response_policy(mut self, policy: ResponsePolicy) -> Self {
        self.response_policy = policy;
        self
    }

    /// Whether `action_name` is an internal action.
    pub fn is_internal(&self, action_name: &str) -> bool {
        action_name.starts_with(self.internal_marker)
    }
}
