//! Failure classification unit tests

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use farmctl::deploy::failure::{FailureClassifier, FailureContext, FailurePattern, GitError};
use fleet_models::{LogEntry, ScriptLogEntry};

fn failed_script(message: &str) -> LogEntry {
    LogEntry::Script(ScriptLogEntry {
        server_id: "s1".to_string(),
        script_name: "AppConfigAndLaunch".to_string(),
        exit_code: 1,
        exec_time: 12.0,
        message: message.to_string(),
        timestamp: Utc::now(),
        event: "DeployApplication".to_string(),
    })
}

fn context() -> FailureContext {
    FailureContext {
        farm_id: "1234".to_string(),
        server_name: "RailsAppServer.3".to_string(),
        task_id: Some("task-9".to_string()),
        variables: BTreeMap::from([("S3_ACCESS_KEY".to_string(), "AKIA0000".to_string())]),
    }
}

#[test]
fn test_standard_patterns_are_registered_in_order() {
    let classifier = FailureClassifier::standard(vec![]).unwrap();
    assert_eq!(
        classifier.pattern_names(),
        vec![
            "Git repository on server out of date",
            "No keys for git",
            "Problem with git",
            "Storage authentication failed during asset upload",
        ]
    );
}

#[test]
fn test_merge_conflict_names_server_and_task() {
    let classifier = FailureClassifier::standard(vec![]).unwrap();
    let entry = failed_script(
        "Updating 1a2b..3c4d\n\
         error: Your local changes to the following files would be overwritten by merge:\n\
         \tconfig/database.yml\n\
         Aborting",
    );

    let failures = classifier.classify(&entry);
    assert_eq!(failures.len(), 1);

    let rendered = failures[0].render(&context());
    assert!(rendered.starts_with("Git repository on server out of date\n"));
    assert!(rendered.contains("RailsAppServer.3"));
    assert!(rendered.contains("task-9"));
    assert!(rendered.contains("1: error: Your local changes"));
    assert!(rendered.contains("3: Aborting"));
}

#[test]
fn test_missing_key_also_matches_git_error() {
    let classifier = FailureClassifier::standard(vec![]).unwrap();
    let entry = failed_script(
        "cloning\n\
         Warning: Identity file /root/.ssh/deploy_id: No such file or directory\n\
         Git error: command `git fetch` has failed",
    );

    let names: Vec<String> = classifier
        .classify(&entry)
        .iter()
        .map(|failure| failure.name().to_string())
        .collect();
    assert_eq!(names, vec!["No keys for git", "Problem with git"]);
}

#[test]
fn test_storage_failure_lists_credentials() {
    let classifier = FailureClassifier::standard(vec![
        "S3_ACCESS_KEY".to_string(),
        "S3_SECRET_KEY".to_string(),
    ])
    .unwrap();
    let entry = failed_script(
        "rake assets:sync\n\
         The AWS Access Key Id you provided does not exist in our records.",
    );

    let failures = classifier.classify(&entry);
    let description = failures[0].description(&context());
    assert!(description.contains("S3_ACCESS_KEY"));
    assert!(description.contains("AKIA0000"));
    assert!(description.contains("(not set)"));
}

#[test]
fn test_unknown_failure_shows_message_tail() {
    let classifier = FailureClassifier::standard(vec![]).unwrap();
    let message: Vec<String> = (0..30).map(|i| format!("line {}", i)).collect();
    let entry = failed_script(&message.join("\n"));

    let failures = classifier.classify(&entry);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].description(&context()), "(see log message)");

    let excerpt = failures[0].excerpt();
    assert_eq!(excerpt.lines().count(), 20);
    assert!(excerpt.starts_with("10: line 10"));
    assert!(excerpt.ends_with("29: line 29"));
}

#[test]
fn test_custom_pattern_list() {
    let patterns: Vec<Arc<dyn FailurePattern>> = vec![Arc::new(GitError::new().unwrap())];
    let classifier = FailureClassifier::new(patterns).unwrap();
    let git = GitError::new().unwrap();

    assert_eq!(classifier.pattern_names(), vec![git.name()]);
    assert_eq!(git.lines_before(), 1);
    assert_eq!(git.lines_after(), 4);
}
