//! Log records returned by the control plane

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a system log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
    Fatal,
}

/// An entry from a server's system log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemLogEntry {
    pub server_id: String,
    pub severity: Severity,
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// An entry from a server's scripting log: one script execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptLogEntry {
    pub server_id: String,
    pub script_name: String,
    pub exit_code: i32,

    /// Execution time in seconds
    #[serde(default)]
    pub exec_time: f64,

    pub message: String,
    pub timestamp: DateTime<Utc>,

    /// Event that triggered the script (e.g. `HostUp`)
    #[serde(default)]
    pub event: String,
}

impl ScriptLogEntry {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An entry from a deployment task's own log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub task_id: String,
    pub server_id: String,

    #[serde(rename = "type")]
    pub kind: String,

    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl TaskLogEntry {
    pub fn is_error(&self) -> bool {
        self.kind.eq_ignore_ascii_case("error")
    }
}

/// Which stream a log entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    System,
    Script,
    Task,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogKind::System => write!(f, "system"),
            LogKind::Script => write!(f, "script"),
            LogKind::Task => write!(f, "task"),
        }
    }
}

/// Any log entry the orchestrator tracks for a server
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    System(SystemLogEntry),
    Script(ScriptLogEntry),
    Task(TaskLogEntry),
}

impl LogEntry {
    pub fn kind(&self) -> LogKind {
        match self {
            LogEntry::System(_) => LogKind::System,
            LogEntry::Script(_) => LogKind::Script,
            LogEntry::Task(_) => LogKind::Task,
        }
    }

    pub fn server_id(&self) -> &str {
        match self {
            LogEntry::System(entry) => &entry.server_id,
            LogEntry::Script(entry) => &entry.server_id,
            LogEntry::Task(entry) => &entry.server_id,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            LogEntry::System(entry) => &entry.message,
            LogEntry::Script(entry) => &entry.message,
            LogEntry::Task(entry) => &entry.message,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LogEntry::System(entry) => entry.timestamp,
            LogEntry::Script(entry) => entry.timestamp,
            LogEntry::Task(entry) => entry.timestamp,
        }
    }

    pub fn as_script(&self) -> Option<&ScriptLogEntry> {
        match self {
            LogEntry::Script(entry) => Some(entry),
            _ => None,
        }
    }

    /// Stable deduplication key. The control plane returns overlapping
    /// windows, so the same entry is usually seen more than once.
    pub fn identifier(&self) -> String {
        let stamp = self.timestamp().to_rfc3339_opts(SecondsFormat::Nanos, true);
        match self {
            LogEntry::System(entry) => format!("system:{}:{}", entry.server_id, stamp),
            LogEntry::Script(entry) => {
                format!("script:{}:{}:{}", entry.server_id, stamp, entry.script_name)
            }
            LogEntry::Task(entry) => format!("task:{}:{}:{}", entry.server_id, entry.task_id, stamp),
        }
    }

    /// Strictly newer than `instant`
    pub fn is_after(&self, instant: DateTime<Utc>) -> bool {
        self.timestamp() > instant
    }

    /// Whether this entry records a failure worth classifying. Only failed
    /// script executions and task errors count; system logs are context.
    pub fn is_failure(&self) -> bool {
        match self {
            LogEntry::System(_) => false,
            LogEntry::Script(entry) => !entry.is_success(),
            LogEntry::Task(entry) => entry.is_error(),
        }
    }
}

impl From<SystemLogEntry> for LogEntry {
    fn from(entry: SystemLogEntry) -> Self {
        LogEntry::System(entry)
    }
}

impl From<ScriptLogEntry> for LogEntry {
    fn from(entry: ScriptLogEntry) -> Self {
        LogEntry::Script(entry)
    }
}

impl From<TaskLogEntry> for LogEntry {
    fn from(entry: TaskLogEntry) -> Self {
        LogEntry::Task(entry)
    }
}
