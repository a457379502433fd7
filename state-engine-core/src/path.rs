//! Dot-delimited path addressing and the named-path registry
//!
//! Every compiled node lives at a path such as `app.todos.filter`. Unnamed
//! nodes do not add a segment, so they share their parent's path.
//!
//! Nodes that declare an identifier can be referenced from anywhere with
//! `#identifier`; the [`PathRegistry`] turns such references back into
//! absolute paths.

use std::collections::HashMap;

use serde_json::Value;

/// Prefix marking a symbolic reference to a node identifier.
pub const REFERENCE_SIGIL: char = '#';

/// Join a parent path and a child name.
///
/// # Example
///
/// ```
/// use state_engine_core::path::join;
///
/// assert_eq!(join("", "app"), "app");
/// assert_eq!(join("app", "todos"), "app.todos");
/// ```
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

/// Split a path into its non-empty segments.
pub fn segments(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Last segment of a path (the node's own name).
pub fn last_segment(path: &str) -> Option<&str> {
    path.split('.').rev().find(|s| !s.is_empty())
}

/// Walk `state` along `path`.
///
/// An empty path yields the whole state. Any missing segment, or a segment
/// that walks into a non-object, yields `None`.
pub fn lookup<'a>(state: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = state;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

/// Maps `#identifier` references to the absolute path of the declaring node.
///
/// Entries are added once per identified node and never removed.
#[derive(Debug, Clone, Default)]
pub struct PathRegistry {
    paths: HashMap<String, String>,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `identifier` (without the sigil) at `path`.
    ///
    /// Returns the path already registered under the identifier, if any, in
    /// which case the registry is left unchanged.
    pub fn register(&mut self, identifier: &str, path: &str) -> Result<(), String> {
        let key = format!("{REFERENCE_SIGIL}{identifier}");
        if let Some(existing) = self.paths.get(&key) {
            return Err(existing.clone());
        }
        tracing::debug!(reference = %key, path = %path, "Registered named path");
        self.paths.insert(key, path.to_string());
        Ok(())
    }

    /// Resolve a reference to an absolute path.
    ///
    /// `#id` references go through the registry and yield `None` when the
    /// identifier is unknown. Plain paths resolve to themselves.
    pub fn resolve<'a>(&'a self, reference: &'a str) -> Option<&'a str> {
        if reference.starts_with(REFERENCE_SIGIL) {
            self.paths.get(reference).map(String::as_str)
        } else {
            Some(reference)
        }
    }

    /// `(reference, path)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.paths.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a", "b"), "a.b");
        assert_eq!(join("a.b", "c"), "a.b.c");
    }

    #[test]
    fn test_segments_skip_empty() {
        assert_eq!(segments(""), Vec::<String>::new());
        assert_eq!(segments("a.b"), vec!["a", "b"]);
        assert_eq!(segments(".a..b."), vec!["a", "b"]);
        assert_eq!(last_segment("a.b.c"), Some("c"));
        assert_eq!(last_segment(""), None);
    }

    #[test]
    fn test_lookup() {
        let state = json!({ "app": { "todos": { "items": [1, 2] }, "flag": true } });

        assert_eq!(lookup(&state, ""), Some(&state));
        assert_eq!(lookup(&state, "app.todos.items"), Some(&json!([1, 2])));
        assert_eq!(lookup(&state, "app.flag"), Some(&json!(true)));
        assert_eq!(lookup(&state, "app.missing"), None);
        // Walking through a non-object is a miss, not a panic
        assert_eq!(lookup(&state, "app.flag.deeper"), None);
    }

    #[test]
    fn test_registry_resolve() {
        let mut registry = PathRegistry::new();
        registry.register("x", "app.left").unwrap();

        assert_eq!(registry.resolve("#x"), Some("app.left"));
        assert_eq!(registry.resolve("#y"), None);
        assert_eq!(registry.resolve("app.right"), Some("app.right"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = PathRegistry::new();
        registry.register("x", "a").unwrap();

        assert_eq!(registry.register("x", "b"), Err("a".to_string()));
        assert_eq!(registry.resolve("#x"), Some("a"));
    }
}
