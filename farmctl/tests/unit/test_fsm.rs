//! FSM unit tests

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use farmctl::client::{Action, ApiError, ApiResult, FleetClient};
use farmctl::deploy::failure::FailureClassifier;
use farmctl::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState};
use farmctl::deploy::log_sink::LogSink;
use farmctl::deploy::server::ServerDeployment;
use fleet_models::{
    DeployApplication, DeploymentTask, ExecuteScript, GlobalVariable, LaunchServer, Role,
    ScriptLogEntry, Server, ServerStatus, SystemLogEntry, TaskLogEntry, TaskStatus,
    TerminateServer, VariableScope,
};

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), DeploymentState::NotStarted);
    assert!(fsm.error().is_none());
    assert!(!fsm.is_done());
}

#[test]
fn test_fsm_task_status_flow() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::TaskReported(TaskStatus::Pending)).unwrap();
    assert_eq!(fsm.state(), DeploymentState::Pending);

    fsm.process(DeploymentEvent::TaskReported(TaskStatus::Deploying)).unwrap();
    fsm.process(DeploymentEvent::TaskReported(TaskStatus::Deployed)).unwrap();
    assert_eq!(fsm.state(), DeploymentState::Deployed);
    assert!(!fsm.is_done());
}

#[test]
fn test_fsm_task_failure_is_terminal() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::TaskReported(TaskStatus::Failed)).unwrap();

    assert_eq!(fsm.state(), DeploymentState::Failed);
    assert_eq!(fsm.error(), Some("deployment task failed"));
    assert!(fsm.process(DeploymentEvent::MarkerFound { success: true }).is_err());
}

#[test]
fn test_fsm_failed_marker() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::MarkerFound { success: false }).unwrap();

    assert_eq!(fsm.state(), DeploymentState::Failed);
    assert_eq!(fsm.error(), Some("completion script failed"));
}

#[test]
fn test_fsm_rejects_events_before_start() {
    let mut fsm = DeploymentFsm::new();
    assert!(fsm
        .process(DeploymentEvent::TaskReported(TaskStatus::Deploying))
        .is_err());
    assert_eq!(fsm.state(), DeploymentState::NotStarted);
}

#[test]
fn test_state_labels() {
    assert_eq!(DeploymentState::NotStarted.to_string(), "not_started");
    assert_eq!(DeploymentState::from(TaskStatus::Deployed), DeploymentState::Deployed);
    assert!(DeploymentState::Completed.is_terminal());
    assert!(!DeploymentState::Deploying.is_terminal());
}

/// Reports one fixed task status and no logs
struct TaskOnlyClient {
    status: Mutex<TaskStatus>,
}

#[async_trait]
impl FleetClient for TaskOnlyClient {
    async fn farm_roles(&self, _farm_id: &str) -> ApiResult<Vec<Role>> {
        Ok(Vec::new())
    }

    async fn deploy_application(
        &self,
        request: &DeployApplication,
    ) -> ApiResult<Vec<DeploymentTask>> {
        let server_id = request.server_id.clone().ok_or(ApiError::InvalidInput {
            action: Action::DeploymentTaskStart,
            message: "server_id".to_string(),
        })?;
        Ok(vec![DeploymentTask {
            id: "t1".to_string(),
            server_id,
            farm_role_id: request.farm_role_id.clone(),
            remote_path: request.remote_path.clone(),
            status: TaskStatus::Pending,
        }])
    }

    async fn deployment_task_status(&self, _task_id: &str) -> ApiResult<TaskStatus> {
        Ok(*self.status.lock().unwrap())
    }

    async fn deployment_task_log(
        &self,
        _task_id: &str,
        _after: DateTime<Utc>,
    ) -> ApiResult<Vec<TaskLogEntry>> {
        Ok(Vec::new())
    }

    async fn system_logs(
        &self,
        _farm_id: &str,
        _server_id: &str,
        _after: DateTime<Utc>,
    ) -> ApiResult<Vec<SystemLogEntry>> {
        Err(ApiError::Transport {
            action: Action::LogsList,
            message: "connection reset".to_string(),
        })
    }

    async fn script_logs(
        &self,
        _farm_id: &str,
        _server_id: Option<&str>,
        _after: DateTime<Utc>,
    ) -> ApiResult<Vec<ScriptLogEntry>> {
        Ok(Vec::new())
    }

    async fn execute_script(&self, _request: &ExecuteScript) -> ApiResult<()> {
        Ok(())
    }

    async fn launch_server(&self, _request: &LaunchServer) -> ApiResult<String> {
        Ok("unused".to_string())
    }

    async fn terminate_server(&self, _request: &TerminateServer) -> ApiResult<()> {
        Ok(())
    }

    async fn global_variables(&self, _scope: &VariableScope) -> ApiResult<Vec<GlobalVariable>> {
        Ok(Vec::new())
    }
}

#[test]
fn test_server_deployment_follows_task_status() {
    let server = Server {
        id: "s1".to_string(),
        index: 4,
        status: ServerStatus::Running,
        external_ip: None,
        internal_ip: None,
    };
    let role = Role {
        id: "r1".to_string(),
        name: "Sidekiq".to_string(),
        servers: vec![server.clone()],
    };
    let classifier = Arc::new(FailureClassifier::standard(vec![]).unwrap());
    let mut deployment = ServerDeployment::new(
        "farm-1",
        &role,
        server,
        LogSink::new("s1", "AppConfigAndLaunch", classifier),
    );
    let client = TaskOnlyClient {
        status: Mutex::new(TaskStatus::Deploying),
    };
    let request = DeployApplication {
        farm_id: "farm-1".to_string(),
        farm_role_id: String::new(),
        application_id: "7".to_string(),
        remote_path: "/var/www".to_string(),
        server_id: None,
    };

    tokio_test::block_on(async {
        deployment.start(&client, Some(&request)).await.unwrap();
        assert_eq!(deployment.name(), "Sidekiq.4");
        assert_eq!(deployment.status(), DeploymentState::Pending);

        // A failing log stream does not stop the status poll
        deployment.scan_logs(&client).await.unwrap();
        assert!(deployment.refresh(&client).await.unwrap());
        assert_eq!(deployment.status(), DeploymentState::Deploying);

        *client.status.lock().unwrap() = TaskStatus::Failed;
        assert!(deployment.refresh(&client).await.unwrap());
        assert!(deployment.is_done());

        *client.status.lock().unwrap() = TaskStatus::Deployed;
        assert!(!deployment.refresh(&client).await.unwrap());
        assert_eq!(deployment.status(), DeploymentState::Failed);
    });
}
