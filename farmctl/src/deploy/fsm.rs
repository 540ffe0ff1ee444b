//! Finite State Machine for one server's deployment

use std::fmt;

use fleet_models::TaskStatus;
use serde::{Deserialize, Serialize};

/// Deployment state of a single server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// Nothing has been asked of the control plane yet
    NotStarted,

    /// The start call was accepted
    Started,

    /// Task reported as queued
    Pending,

    /// Task reported as running
    Deploying,

    /// Task reported as finished; the logs have not confirmed it yet
    Deployed,

    /// Completion marker script succeeded
    Completed,

    /// Start call, task or completion marker failed
    Failed,
}

impl DeploymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentState::Completed | DeploymentState::Failed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeploymentState::NotStarted => "not_started",
            DeploymentState::Started => "started",
            DeploymentState::Pending => "pending",
            DeploymentState::Deploying => "deploying",
            DeploymentState::Deployed => "deployed",
            DeploymentState::Completed => "completed",
            DeploymentState::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<TaskStatus> for DeploymentState {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Pending => DeploymentState::Pending,
            TaskStatus::Deploying => DeploymentState::Deploying,
            TaskStatus::Deployed => DeploymentState::Deployed,
            TaskStatus::Failed => DeploymentState::Failed,
        }
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Start call accepted
    Start,

    /// Start call refused
    StartFailed(String),

    /// Task status as last polled
    TaskReported(TaskStatus),

    /// Completion marker script found in the logs
    MarkerFound { success: bool },
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentState,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in the not-started state
    pub fn new() -> Self {
        Self {
            state: DeploymentState::NotStarted,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    /// Process an event and transition state. Returns whether the state changed.
    pub fn process(&mut self, event: DeploymentEvent) -> Result<bool, String> {
        use DeploymentState::*;

        let new_state = match (self.state, &event) {
            (NotStarted, DeploymentEvent::Start) => Started,
            (NotStarted, DeploymentEvent::StartFailed(err)) => {
                self.error = Some(err.clone());
                Failed
            }

            (Started | Pending | Deploying | Deployed, DeploymentEvent::TaskReported(status)) => {
                if *status == TaskStatus::Failed {
                    self.error = Some("deployment task failed".to_string());
                }
                DeploymentState::from(*status)
            }

            (Started | Pending | Deploying | Deployed, DeploymentEvent::MarkerFound { success }) => {
                if *success {
                    Completed
                } else {
                    self.error = Some("completion script failed".to_string());
                    Failed
                }
            }

            // Completed and Failed never transition again
            (state, event) => {
                return Err(format!("{:?} -> {:?}", state, event));
            }
        };

        let changed = new_state != self.state;
        self.state = new_state;
        Ok(changed)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
