//! Submission logging with pattern-based filtering
//!
//! Filters lifecycle submissions by their type using glob patterns and
//! optionally keeps the most recent ones in a ring buffer, for inspecting
//! what a store has seen.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use state_engine_core::logger::{SubmissionLogConfig, SubmissionLoggerMiddleware};
//! use state_engine_core::{LifecycleAction, StateStore, Store, Transition};
//!
//! let logger = SubmissionLoggerMiddleware::with_log(SubmissionLogConfig::default());
//! let store = Store::with_middleware(json!({}), Transition::identity(), logger);
//! store.submit(LifecycleAction::error("action does not exist"));
//!
//! store.inspect_middleware(|m| {
//!     let log = m.log().unwrap();
//!     assert_eq!(log.len(), 1);
//!     assert_eq!(log.entries().next().unwrap().action_type, "error");
//! });
//! ```

use std::collections::VecDeque;
use std::time::Instant;

use crate::lifecycle::LifecycleAction;
use crate::store::Middleware;

/// Which submission types to log.
///
/// Patterns use `*` for any run of characters and `?` for exactly one;
/// everything else is literal. `todos.*` matches every lifecycle under
/// `todos`, `*.$settled-error` every failure.
#[derive(Debug, Clone, Default)]
pub struct SubmissionLoggerConfig {
    /// If non-empty, only log types matching one of these
    pub include_patterns: Vec<String>,
    /// Never log types matching one of these
    pub exclude_patterns: Vec<String>,
}

impl SubmissionLoggerConfig {
    /// Create a config from comma-separated pattern lists.
    ///
    /// # Example
    /// ```
    /// use state_engine_core::logger::SubmissionLoggerConfig;
    ///
    /// let config = SubmissionLoggerConfig::new(Some("todos.*"), Some("*.$in-progress"));
    /// assert!(config.should_log("todos.add.$settled-ok"));
    /// assert!(!config.should_log("todos.add.$in-progress"));
    /// assert!(!config.should_log("user.load.$settled-ok"));
    /// ```
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Self {
        let split = |patterns: &str| -> Vec<String> {
            patterns
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        };
        Self {
            include_patterns: include.map(split).unwrap_or_default(),
            exclude_patterns: exclude.map(split).unwrap_or_default(),
        }
    }

    pub fn should_log(&self, action_type: &str) -> bool {
        let included = self.include_patterns.is_empty()
            || self.include_patterns.iter().any(|p| glob_match(p, action_type));
        included && !self.exclude_patterns.iter().any(|p| glob_match(p, action_type))
    }
}

/// One recorded submission.
#[derive(Debug, Clone)]
pub struct SubmissionLogEntry {
    pub action_type: String,
    pub sequence: u64,
    pub timestamp: Instant,
    /// Set once the transition has run
    pub state_changed: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct SubmissionLogConfig {
    /// Maximum number of entries kept
    pub capacity: usize,
    pub filter: SubmissionLoggerConfig,
}

impl Default for SubmissionLogConfig {
    fn default() -> Self {
        Self::new(100, SubmissionLoggerConfig::default())
    }
}

impl SubmissionLogConfig {
    pub fn new(capacity: usize, filter: SubmissionLoggerConfig) -> Self {
        Self { capacity, filter }
    }
}

/// Ring buffer of recent submissions; the oldest entry goes first.
#[derive(Debug, Clone)]
pub struct SubmissionLog {
    entries: VecDeque<SubmissionLogEntry>,
    config: SubmissionLogConfig,
    next_sequence: u64,
}

impl SubmissionLog {
    pub fn new(config: SubmissionLogConfig) -> Self {
        Self {
            entries: VecDeque::with_capacity(config.capacity),
            config,
            next_sequence: 0,
        }
    }

    /// Record a submission if it passes the filter. Returns whether it did.
    pub fn record(&mut self, action: &LifecycleAction) -> bool {
        if self.config.capacity == 0 || !self.config.filter.should_log(&action.action_type) {
            return false;
        }
        if self.entries.len() == self.config.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(SubmissionLogEntry {
            action_type: action.action_type.clone(),
            sequence: self.next_sequence,
            timestamp: Instant::now(),
            state_changed: None,
        });
        self.next_sequence += 1;
        true
    }

    fn mark_last(&mut self, changed: bool) {
        if let Some(entry) = self.entries.back_mut() {
            entry.state_changed = Some(changed);
        }
    }

    /// Oldest first
    pub fn entries(&self) -> impl Iterator<Item = &SubmissionLogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Store middleware tracing filtered submissions, and optionally recording
/// them into a [`SubmissionLog`].
#[derive(Debug, Clone)]
pub struct SubmissionLoggerMiddleware {
    filter: SubmissionLoggerConfig,
    log: Option<SubmissionLog>,
    /// Whether the submission in flight was recorded
    recorded: bool,
}

impl SubmissionLoggerMiddleware {
    /// Tracing only
    pub fn new(filter: SubmissionLoggerConfig) -> Self {
        Self {
            filter,
            log: None,
            recorded: false,
        }
    }

    pub fn with_log(config: SubmissionLogConfig) -> Self {
        Self {
            filter: config.filter.clone(),
            log: Some(SubmissionLog::new(config)),
            recorded: false,
        }
    }

    pub fn log(&self) -> Option<&SubmissionLog> {
        self.log.as_ref()
    }
}

impl Middleware for SubmissionLoggerMiddleware {
    fn before(&mut self, action: &LifecycleAction) {
        if self.filter.should_log(&action.action_type) {
            tracing::debug!(action = %action.action_type, data = %action.data, "submission");
        }
        self.recorded = self.log.as_mut().is_some_and(|log| log.record(action));
    }

    fn after(&mut self, _action: &LifecycleAction, state_changed: bool) {
        if let (true, Some(log)) = (self.recorded, self.log.as_mut()) {
            log.mark_last(state_changed);
        }
    }
}

/// Match `text` against a glob of `*` and `?` wildcards.
///
/// The pattern is cut at every `*` into fixed-width segments. The first
/// and last are anchored at the ends of the text; the ones in between are
/// found left to right.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let segments: Vec<Vec<char>> = pattern.split('*').map(|s| s.chars().collect()).collect();

    let (head, rest) = match segments.split_first() {
        Some(split) => split,
        None => return text.is_empty(),
    };
    let Some((tail, middle)) = rest.split_last() else {
        return segment_matches(head, &text);
    };

    if text.len() < head.len() + tail.len()
        || !segment_matches(head, &text[..head.len()])
        || !segment_matches(tail, &text[text.len() - tail.len()..])
    {
        return false;
    }

    let mut window = &text[head.len()..text.len() - tail.len()];
    for segment in middle {
        match find_segment(segment, window) {
            Some(at) => window = &window[at + segment.len()..],
            None => return false,
        }
    }
    true
}

fn segment_matches(segment: &[char], text: &[char]) -> bool {
    segment.len() == text.len() && segment.iter().zip(text).all(|(s, t)| *s == '?' || s == t)
}

fn find_segment(segment: &[char], text: &[char]) -> Option<usize> {
    let last_start = text.len().checked_sub(segment.len())?;
    (0..=last_start).find(|&at| segment_matches(segment, &text[at..at + segment.len()]))
}
