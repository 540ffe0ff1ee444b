//! Failure classification for failed log entries
//!
//! A [`FailureClassifier`] holds an ordered list of [`FailurePattern`]s. Every
//! pattern that matches a failed entry yields a named [`Failure`]; when none
//! match, the catch-all pattern does, so a failed entry is never left without
//! an explanation.

mod patterns;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use fleet_models::LogEntry;
use regex::Regex;

use crate::errors::FarmError;

pub use patterns::{GitError, GitKeyError, GitMergeError, StorageAuthentication, Uncategorized};

/// Lines of context shown on each side of a matching line
pub const DISPLAY_AROUND: usize = 4;

/// Data a pattern may weave into its remediation text
#[derive(Debug, Clone, Default)]
pub struct FailureContext {
    pub farm_id: String,
    pub server_name: String,
    pub task_id: Option<String>,

    /// Farm configuration variables, by name
    pub variables: BTreeMap<String, String>,
}

/// A recognizable kind of deployment failure
pub trait FailurePattern: Send + Sync + fmt::Debug {
    /// Short human-readable name
    fn name(&self) -> &str;

    /// Regex locating the interesting lines of a message
    fn pattern(&self) -> &Regex;

    /// Remediation text
    fn description(&self, context: &FailureContext) -> String;

    fn matches(&self, entry: &LogEntry) -> bool {
        self.pattern().is_match(entry.message())
    }

    fn lines_before(&self) -> usize {
        DISPLAY_AROUND
    }

    fn lines_after(&self) -> usize {
        DISPLAY_AROUND
    }

    /// The part of the message worth showing
    fn excerpt(&self, message: &str) -> String {
        excerpt(message, self.pattern(), self.lines_before(), self.lines_after())
    }
}

fn message_lines(message: &str) -> Vec<&str> {
    message
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

/// Numbered windows of `before`/`after` lines around every line matching
/// `pattern`, joined by a separator line.
pub fn excerpt(message: &str, pattern: &Regex, before: usize, after: usize) -> String {
    let lines = message_lines(message);
    let last = lines.len().saturating_sub(1);

    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| pattern.is_match(line))
        .map(|(index, _)| {
            let start = index.saturating_sub(before);
            let end = (index + after).min(last);
            (start..=end)
                .map(|i| format!("{}: {}", i, lines[i]))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n----\n")
}

/// The last `count` lines of a message, numbered
pub fn tail(message: &str, count: usize) -> String {
    let lines = message_lines(message);
    let start = lines.len().saturating_sub(count);
    lines
        .iter()
        .enumerate()
        .skip(start)
        .map(|(i, line)| format!("{}: {}", i, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One classified failure of one log entry
#[derive(Debug, Clone)]
pub struct Failure {
    pattern: Arc<dyn FailurePattern>,
    entry: LogEntry,
}

impl Failure {
    pub fn name(&self) -> &str {
        self.pattern.name()
    }

    pub fn description(&self, context: &FailureContext) -> String {
        self.pattern.description(context)
    }

    pub fn excerpt(&self) -> String {
        self.pattern.excerpt(self.entry.message())
    }

    pub fn entry(&self) -> &LogEntry {
        &self.entry
    }

    /// Name, remediation and excerpt, one block per failure
    pub fn render(&self, context: &FailureContext) -> String {
        [
            self.name().to_string(),
            self.description(context),
            self.excerpt(),
        ]
        .join("\n")
    }
}

/// Ordered set of failure patterns plus the catch-all
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    patterns: Vec<Arc<dyn FailurePattern>>,
    fallback: Arc<dyn FailurePattern>,
}

impl FailureClassifier {
    /// Classifier over an explicit list of patterns, queried in order
    pub fn new(patterns: Vec<Arc<dyn FailurePattern>>) -> Result<Self, FarmError> {
        Ok(Self {
            patterns,
            fallback: Arc::new(Uncategorized::new()?),
        })
    }

    /// The built-in patterns. `credential_variables` names the variables shown
    /// when storage authentication fails.
    pub fn standard(credential_variables: Vec<String>) -> Result<Self, FarmError> {
        let patterns: Vec<Arc<dyn FailurePattern>> = vec![
            Arc::new(GitMergeError::new()?),
            Arc::new(GitKeyError::new()?),
            Arc::new(GitError::new()?),
            Arc::new(StorageAuthentication::new(credential_variables)?),
        ];
        Self::new(patterns)
    }

    /// Names of the registered patterns, in query order
    pub fn pattern_names(&self) -> Vec<&str> {
        self.patterns.iter().map(|pattern| pattern.name()).collect()
    }

    /// Every matching failure, or the catch-all when nothing matches
    pub fn classify(&self, entry: &LogEntry) -> Vec<Failure> {
        let mut failures: Vec<Failure> = self
            .patterns
            .iter()
            .filter(|pattern| pattern.matches(entry))
            .map(|pattern| Failure {
                pattern: pattern.clone(),
                entry: entry.clone(),
            })
            .collect();

        if failures.is_empty() {
            failures.push(Failure {
                pattern: self.fallback.clone(),
                entry: entry.clone(),
            });
        }
        failures
    }
}
