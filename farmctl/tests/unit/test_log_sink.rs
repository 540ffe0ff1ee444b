//! Log sink unit tests

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use farmctl::deploy::failure::FailureClassifier;
use farmctl::deploy::log_sink::LogSink;
use fleet_models::{LogEntry, LogKind, ScriptLogEntry, Severity, SystemLogEntry, TaskLogEntry};

const MARKER: &str = "AppConfigAndLaunch";

fn create_sink() -> LogSink {
    let classifier = FailureClassifier::standard(vec![]).unwrap();
    LogSink::new("s1", MARKER, Arc::new(classifier))
}

fn script(name: &str, exit_code: i32, minute: u32) -> LogEntry {
    LogEntry::Script(ScriptLogEntry {
        server_id: "s1".to_string(),
        script_name: name.to_string(),
        exit_code,
        exec_time: 1.5,
        message: format!("{} output", name),
        timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 12, minute, 0).unwrap(),
        event: "DeployApplication".to_string(),
    })
}

fn system(message: &str) -> LogEntry {
    LogEntry::System(SystemLogEntry {
        server_id: "s1".to_string(),
        severity: Severity::Error,
        source: "agent".to_string(),
        message: message.to_string(),
        timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
    })
}

#[test]
fn test_duplicate_add_is_a_noop() {
    let mut sink = create_sink();

    assert!(sink.add(script("BundleInstall", 1, 1)));
    assert!(!sink.add(script("BundleInstall", 1, 1)));

    assert_eq!(sink.len(), 1);
    assert_eq!(sink.failures().len(), 1);
}

#[test]
fn test_extend_counts_new_entries_only() {
    let mut sink = create_sink();
    sink.add(script("BundleInstall", 0, 1));

    let added = sink.extend(vec![
        script("BundleInstall", 0, 1),
        script("Migrate", 0, 2),
        system("agent restarted"),
    ]);

    assert_eq!(added, 2);
    assert_eq!(sink.entries_of(LogKind::Script).count(), 2);
    assert_eq!(sink.entries_of(LogKind::System).count(), 1);
}

#[test]
fn test_system_entries_never_fail() {
    let mut sink = create_sink();
    sink.add(system("Git error: something looked wrong"));

    assert!(sink.failures().is_empty());
}

#[test]
fn test_task_errors_are_classified() {
    let mut sink = create_sink();
    sink.add(LogEntry::Task(TaskLogEntry {
        task_id: "t1".to_string(),
        server_id: "s1".to_string(),
        kind: "error".to_string(),
        message: "Git error: unable to fetch".to_string(),
        timestamp: Utc::now(),
    }));
    sink.add(LogEntry::Task(TaskLogEntry {
        task_id: "t1".to_string(),
        server_id: "s1".to_string(),
        kind: "info".to_string(),
        message: "fetching".to_string(),
        timestamp: Utc::now() + Duration::seconds(1),
    }));

    assert_eq!(sink.len(), 2);
    assert_eq!(sink.failures().len(), 1);
    assert_eq!(sink.failures()[0].failures[0].name(), "Problem with git");
}

#[test]
fn test_end_of_deployment_entry_is_most_recent_marker() {
    let mut sink = create_sink();
    assert!(sink.end_of_deployment_entry().is_none());

    sink.add(script(MARKER, 0, 9));
    sink.add(script(MARKER, 1, 3));
    sink.add(script("Cleanup", 0, 10));

    let marker = sink.end_of_deployment_entry().unwrap();
    assert_eq!(marker.exit_code, 0);
    assert!(marker.is_success());
}

#[test]
fn test_every_failure_gets_an_explanation() {
    let mut sink = create_sink();
    sink.add(script("Migrate", 2, 4));

    let classified = &sink.failures()[0];
    assert_eq!(classified.failures.len(), 1);
    assert_eq!(classified.failures[0].name(), "Uncategorized failure");
}
