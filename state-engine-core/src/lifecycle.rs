//! Lifecycle actions synthesized for every registered action
//!
//! Dispatching an action never submits the action itself. Instead the engine
//! submits lifecycle actions that describe where the execution is:
//!
//! 1. `<path>.$in-progress` right before the handler runs
//! 2. `<path>.$settled-ok` with the handler's result, or
//!    `<path>.$settled-error` with its failure
//! 3. `<path>.$reset`, submitted by the caller once the result has been
//!    consumed, to put the status back to `idle`
//!
//! Each payload carries `<action>$status`, so the owning node's state always
//! reflects the status of each of its actions.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{EngineConfig, ResponsePolicy};
use crate::path;

/// Action type used for routing failures.
pub const ERROR_TYPE: &str = "error";

/// A submitted lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    InProgress,
    SettledOk,
    SettledError,
    Reset,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::InProgress,
        Phase::SettledOk,
        Phase::SettledError,
        Phase::Reset,
    ];

    /// Suffix used in the action type (`<path>.$<suffix>`).
    pub fn suffix(self) -> &'static str {
        match self {
            Phase::InProgress => "in-progress",
            Phase::SettledOk => "settled-ok",
            Phase::SettledError => "settled-error",
            Phase::Reset => "reset",
        }
    }

    /// Value written to `<action>$status`.
    pub fn status(self) -> &'static str {
        match self {
            Phase::Reset => "idle",
            other => other.suffix(),
        }
    }

    /// Parse a lifecycle type back into its base path and phase.
    pub fn split_type(action_type: &str) -> Option<(&str, Phase)> {
        let (base, suffix) = action_type.rsplit_once(".$")?;
        let phase = Phase::ALL.into_iter().find(|p| p.suffix() == suffix)?;
        Some((base, phase))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// `<action_path>.$<phase>`
pub fn lifecycle_type(action_path: &str, phase: Phase) -> String {
    format!("{action_path}.${}", phase.suffix())
}

pub fn status_field(action_name: &str) -> String {
    format!("{action_name}$status")
}

pub fn response_field(action_name: &str) -> String {
    format!("{action_name}$response")
}

pub fn error_field(action_name: &str) -> String {
    format!("{action_name}$error")
}

/// An action submitted to the store.
///
/// Serialises as `{ "type": ..., "data": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub data: Value,
}

impl LifecycleAction {
    pub fn new(action_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            action_type: action_type.into(),
            data: Value::Object(data),
        }
    }

    /// A routing failure (`{ "type": "error", "data": message }`).
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            action_type: ERROR_TYPE.to_string(),
            data: Value::String(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.action_type == ERROR_TYPE
    }

    /// Phase of this action, if it is a lifecycle action.
    pub fn phase(&self) -> Option<Phase> {
        Phase::split_type(&self.action_type).map(|(_, phase)| phase)
    }

    /// Field of the payload, if the payload is a mapping.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.as_object()?.get(name)
    }

    /// Status this action writes for `action_name`.
    pub fn status_of(&self, action_name: &str) -> Option<&str> {
        self.field(&status_field(action_name))?.as_str()
    }
}

/// Factory for one lifecycle phase of one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleTemplate {
    action_name: String,
    action_type: String,
    phase: Phase,
    policy: ResponsePolicy,
    internal: bool,
}

impl LifecycleTemplate {
    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Build the lifecycle action. `payload` is the result for
    /// `settled-ok`, the failure for `settled-error`, and ignored otherwise.
    pub fn create(&self, payload: Option<&Value>) -> LifecycleAction {
        let mut data = Map::new();
        data.insert(
            status_field(&self.action_name),
            Value::String(self.phase.status().to_string()),
        );

        match self.phase {
            Phase::SettledOk => {
                let result = payload.cloned().unwrap_or(Value::Null);
                let (with_response, flatten) = match self.policy {
                    ResponsePolicy::FlattenAlways => (true, true),
                    ResponsePolicy::ReplaceInternal => (!self.internal, self.internal),
                };
                if with_response {
                    data.insert(response_field(&self.action_name), result.clone());
                }
                if flatten {
                    if let Value::Object(fields) = result {
                        data.extend(fields);
                    }
                }
            }
            Phase::SettledError => {
                data.insert(
                    error_field(&self.action_name),
                    payload.cloned().unwrap_or(Value::Null),
                );
            }
            Phase::InProgress | Phase::Reset => {}
        }

        LifecycleAction::new(self.action_type.clone(), data)
    }
}

/// The four lifecycle factories of one base action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedAction {
    name: String,
    path: String,
    templates: [LifecycleTemplate; 4],
}

impl ExpandedAction {
    /// Base action name, e.g. `increment`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute action path, e.g. `counter.increment`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn template(&self, phase: Phase) -> &LifecycleTemplate {
        match phase {
            Phase::InProgress => &self.templates[0],
            Phase::SettledOk => &self.templates[1],
            Phase::SettledError => &self.templates[2],
            Phase::Reset => &self.templates[3],
        }
    }

    pub fn templates(&self) -> impl Iterator<Item = &LifecycleTemplate> {
        self.templates.iter()
    }

    /// All lifecycle identifiers of this action.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.templates.iter().map(LifecycleTemplate::action_type)
    }
}

/// Synthesize lifecycle factories for every action owned by `owner_path`.
pub fn expand<'a, I>(owner_path: &str, action_names: I, config: &EngineConfig) -> Vec<ExpandedAction>
where
    I: IntoIterator<Item = &'a str>,
{
    action_names
        .into_iter()
        .map(|name| {
            let action_path = path::join(owner_path, name);
            let internal = config.is_internal(name);
            let templates = Phase::ALL.map(|phase| LifecycleTemplate {
                action_name: name.to_string(),
                action_type: lifecycle_type(&action_path, phase),
                phase,
                policy: config.response_policy,
                internal,
            });
            ExpandedAction {
                name: name.to_string(),
                path: action_path,
                templates,
            }
        })
        .collect()
}
