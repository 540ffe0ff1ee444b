//! Deduplicating store of one server's log entries

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleet_models::{LogEntry, LogKind, ScriptLogEntry};
use tracing::debug;

use crate::deploy::failure::{Failure, FailureClassifier};

/// A failed entry together with its classification
#[derive(Debug, Clone)]
pub struct ClassifiedEntry {
    pub entry: LogEntry,
    pub failures: Vec<Failure>,
}

/// Log entries seen for one server.
///
/// Entries are keyed by [`LogEntry::identifier`]; adding an entry that is
/// already present is a no-op. Failed entries are classified exactly once,
/// when first added. Nothing is ever removed.
#[derive(Debug)]
pub struct LogSink {
    server_id: String,
    start_time: DateTime<Utc>,
    completion_script: String,
    classifier: Arc<FailureClassifier>,
    seen: HashSet<String>,
    entries: Vec<LogEntry>,
    failures: Vec<ClassifiedEntry>,
}

impl LogSink {
    /// Create an empty sink. `completion_script` names the script that runs
    /// last in every deployment.
    pub fn new(
        server_id: impl Into<String>,
        completion_script: impl Into<String>,
        classifier: Arc<FailureClassifier>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            start_time: Utc::now(),
            completion_script: completion_script.into(),
            classifier,
            seen: HashSet::new(),
            entries: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// When the sink was created; the widest window ever scanned
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Add an entry. Returns false if an entry with the same identifier exists.
    pub fn add(&mut self, entry: LogEntry) -> bool {
        if !self.seen.insert(entry.identifier()) {
            return false;
        }

        if entry.is_failure() {
            let failures = self.classifier.classify(&entry);
            debug!(
                server_id = %self.server_id,
                kind = %entry.kind(),
                failures = failures.len(),
                "Classified failed log entry"
            );
            self.failures.push(ClassifiedEntry {
                entry: entry.clone(),
                failures,
            });
        }

        self.entries.push(entry);
        true
    }

    /// Add many entries; returns how many were new
    pub fn extend(&mut self, entries: impl IntoIterator<Item = LogEntry>) -> usize {
        entries
            .into_iter()
            .map(|entry| self.add(entry))
            .filter(|added| *added)
            .count()
    }

    /// The most recent run of the completion script, if any
    pub fn end_of_deployment_entry(&self) -> Option<&ScriptLogEntry> {
        self.entries
            .iter()
            .filter_map(LogEntry::as_script)
            .filter(|entry| entry.script_name == self.completion_script)
            .max_by_key(|entry| entry.timestamp)
    }

    /// Failed entries in arrival order
    pub fn failures(&self) -> &[ClassifiedEntry] {
        &self.failures
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn entries_of(&self, kind: LogKind) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |entry| entry.kind() == kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
