//! Control-plane client interface
//!
//! The control plane answers every action with an envelope that is either a
//! success carrying typed content or a failure carrying a message. Request
//! signing and response decoding live behind [`FleetClient`]; the
//! orchestration layer only ever sees typed records.

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use fleet_models::{
    DeployApplication, DeploymentTask, ExecuteScript, GlobalVariable, LaunchServer,
    MissingInputs, Role, ScriptLogEntry, SystemLogEntry, TaskLogEntry, TaskStatus,
    TerminateServer, VariableScope,
};

/// Remote actions used by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    FarmGetDetails,
    DeploymentTaskStart,
    DeploymentTaskGetStatus,
    DeploymentTaskGetLog,
    LogsList,
    ScriptLogsList,
    ScriptExecute,
    ServerLaunch,
    ServerTerminate,
    GlobalVariablesList,
}

impl Action {
    /// Name of the action on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Action::FarmGetDetails => "FarmGetDetails",
            Action::DeploymentTaskStart => "DmApplicationDeploy",
            Action::DeploymentTaskGetStatus => "DmDeploymentTaskGetStatus",
            Action::DeploymentTaskGetLog => "DmDeploymentTaskGetLog",
            Action::LogsList => "LogsList",
            Action::ScriptLogsList => "ScriptingLogsList",
            Action::ScriptExecute => "ScriptExecute",
            Action::ServerLaunch => "ServerLaunch",
            Action::ServerTerminate => "ServerTerminate",
            Action::GlobalVariablesList => "GlobalVariablesList",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure envelope from the control plane
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// A required input was missing or unknown; nothing was sent
    #[error("{action}: invalid input: {message}")]
    InvalidInput { action: Action, message: String },

    /// The control plane answered with a non-success envelope
    #[error("{action}: {message}")]
    Rejected { action: Action, message: String },

    /// The request never got an answer
    #[error("{action}: transport failure: {message}")]
    Transport { action: Action, message: String },
}

impl ApiError {
    pub fn invalid_input(action: Action, missing: MissingInputs) -> Self {
        ApiError::InvalidInput {
            action,
            message: missing.to_string(),
        }
    }

    pub fn action(&self) -> Action {
        match self {
            ApiError::InvalidInput { action, .. }
            | ApiError::Rejected { action, .. }
            | ApiError::Transport { action, .. } => *action,
        }
    }

    /// The message without the action prefix
    pub fn message(&self) -> &str {
        match self {
            ApiError::InvalidInput { message, .. }
            | ApiError::Rejected { message, .. }
            | ApiError::Transport { message, .. } => message,
        }
    }

    /// Validation errors abort a run; everything else is per-operation
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::InvalidInput { .. })
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Typed access to the control plane.
///
/// Every call is safe to retry: the orchestrator polls and never assumes a
/// call's effect was applied at most once.
#[async_trait]
pub trait FleetClient: Send + Sync {
    /// Roles of a farm with their current servers
    async fn farm_roles(&self, farm_id: &str) -> ApiResult<Vec<Role>>;

    /// Start deployment tasks for a role; one task per targeted server
    async fn deploy_application(
        &self,
        request: &DeployApplication,
    ) -> ApiResult<Vec<DeploymentTask>>;

    async fn deployment_task_status(&self, task_id: &str) -> ApiResult<TaskStatus>;

    async fn deployment_task_log(
        &self,
        task_id: &str,
        after: DateTime<Utc>,
    ) -> ApiResult<Vec<TaskLogEntry>>;

    async fn system_logs(
        &self,
        farm_id: &str,
        server_id: &str,
        after: DateTime<Utc>,
    ) -> ApiResult<Vec<SystemLogEntry>>;

    /// Script logs of one server, or of the whole farm when `server_id` is None
    async fn script_logs(
        &self,
        farm_id: &str,
        server_id: Option<&str>,
        after: DateTime<Utc>,
    ) -> ApiResult<Vec<ScriptLogEntry>>;

    async fn execute_script(&self, request: &ExecuteScript) -> ApiResult<()>;

    /// Returns the id of the newly launched server
    async fn launch_server(&self, request: &LaunchServer) -> ApiResult<String>;

    async fn terminate_server(&self, request: &TerminateServer) -> ApiResult<()>;

    async fn global_variables(&self, scope: &VariableScope) -> ApiResult<Vec<GlobalVariable>>;
}
