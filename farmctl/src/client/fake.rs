//! Scripted in-memory control plane for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use fleet_models::{
    DeployApplication, DeploymentTask, ExecuteScript, GlobalVariable, LaunchServer, Role,
    ScriptLogEntry, Server, ServerStatus, Severity, SystemLogEntry, TaskLogEntry, TaskStatus,
    TerminateServer, VariableScope,
};

use super::{Action, ApiError, ApiResult, FleetClient};

static SEQ: AtomicI64 = AtomicI64::new(0);

/// A timestamp safely after any window the code under test opens
pub(crate) fn future_timestamp() -> DateTime<Utc> {
    Utc::now() + Duration::hours(1) + Duration::milliseconds(SEQ.fetch_add(1, Ordering::SeqCst))
}

pub(crate) fn script_log(server_id: &str, script_name: &str, exit_code: i32, message: &str) -> ScriptLogEntry {
    ScriptLogEntry {
        server_id: server_id.to_string(),
        script_name: script_name.to_string(),
        exit_code,
        exec_time: 2.0,
        message: message.to_string(),
        timestamp: future_timestamp(),
        event: "DeployApplication".to_string(),
    }
}

pub(crate) fn system_log(server_id: &str, message: &str) -> SystemLogEntry {
    SystemLogEntry {
        server_id: server_id.to_string(),
        severity: Severity::Info,
        source: "agent".to_string(),
        message: message.to_string(),
        timestamp: future_timestamp(),
    }
}

pub(crate) fn server(id: &str, index: u32, status: ServerStatus) -> Server {
    Server {
        id: id.to_string(),
        index,
        status,
        external_ip: Some(format!("10.0.0.{}", index)),
        internal_ip: None,
    }
}

pub(crate) fn role(id: &str, name: &str, servers: Vec<Server>) -> Role {
    Role {
        id: id.to_string(),
        name: name.to_string(),
        servers,
    }
}

#[derive(Default)]
struct FakeState {
    roles: Vec<Role>,
    roles_error: Option<ApiError>,
    deploy_errors: HashMap<String, ApiError>,
    server_deploy_errors: HashMap<String, ApiError>,
    status_errors: HashMap<String, ApiError>,
    extra_tasks: HashMap<String, Vec<DeploymentTask>>,
    task_statuses: HashMap<String, TaskStatus>,
    system_logs: HashMap<String, Vec<SystemLogEntry>>,
    script_logs: HashMap<String, Vec<ScriptLogEntry>>,
    task_logs: HashMap<String, Vec<TaskLogEntry>>,
    script_error: Option<ApiError>,
    variables: Vec<GlobalVariable>,
    launch_status: Option<ServerStatus>,
    launched: u32,
    calls: Vec<String>,
}

/// Answers every action from in-memory state and records the calls made
#[derive(Default)]
pub(crate) struct FakeFleetClient {
    state: Mutex<FakeState>,
}

impl FakeFleetClient {
    pub fn with_roles(roles: Vec<Role>) -> Self {
        let client = Self::default();
        client.state.lock().unwrap().roles = roles;
        client
    }

    pub fn fail_farm_details(&self, error: ApiError) {
        self.state.lock().unwrap().roles_error = Some(error);
    }

    pub fn fail_deploy(&self, farm_role_id: &str, error: ApiError) {
        self.state
            .lock()
            .unwrap()
            .deploy_errors
            .insert(farm_role_id.to_string(), error);
    }

    /// Refuse the start call scoped to one server only
    pub fn fail_deploy_server(&self, server_id: &str, error: ApiError) {
        self.state
            .lock()
            .unwrap()
            .server_deploy_errors
            .insert(server_id.to_string(), error);
    }

    pub fn fail_task_status(&self, task_id: &str, error: ApiError) {
        self.state
            .lock()
            .unwrap()
            .status_errors
            .insert(task_id.to_string(), error);
    }

    /// Tasks returned in addition to the regular one-per-server tasks
    pub fn add_extra_task(&self, farm_role_id: &str, task: DeploymentTask) {
        self.state
            .lock()
            .unwrap()
            .extra_tasks
            .entry(farm_role_id.to_string())
            .or_default()
            .push(task);
    }

    pub fn fail_script(&self, error: ApiError) {
        self.state.lock().unwrap().script_error = Some(error);
    }

    pub fn set_task_status(&self, task_id: &str, status: TaskStatus) {
        self.state
            .lock()
            .unwrap()
            .task_statuses
            .insert(task_id.to_string(), status);
    }

    pub fn push_script_log(&self, entry: ScriptLogEntry) {
        self.state
            .lock()
            .unwrap()
            .script_logs
            .entry(entry.server_id.clone())
            .or_default()
            .push(entry);
    }

    pub fn push_system_log(&self, entry: SystemLogEntry) {
        self.state
            .lock()
            .unwrap()
            .system_logs
            .entry(entry.server_id.clone())
            .or_default()
            .push(entry);
    }

    pub fn push_task_log(&self, entry: TaskLogEntry) {
        self.state
            .lock()
            .unwrap()
            .task_logs
            .entry(entry.task_id.clone())
            .or_default()
            .push(entry);
    }

    pub fn set_variables(&self, variables: Vec<GlobalVariable>) {
        self.state.lock().unwrap().variables = variables;
    }

    /// Status newly launched servers report; defaults to Running
    pub fn set_launch_status(&self, status: ServerStatus) {
        self.state.lock().unwrap().launch_status = Some(status);
    }

    /// Change the status of an existing server
    pub fn set_server_status(&self, server_id: &str, status: ServerStatus) {
        let mut state = self.state.lock().unwrap();
        for role in state.roles.iter_mut() {
            for server in role.servers.iter_mut().filter(|s| s.id == server_id) {
                server.status = status;
            }
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl FleetClient for FakeFleetClient {
    async fn farm_roles(&self, farm_id: &str) -> ApiResult<Vec<Role>> {
        self.record(format!("farm_roles:{}", farm_id));
        let state = self.state.lock().unwrap();
        match &state.roles_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.roles.clone()),
        }
    }

    async fn deploy_application(
        &self,
        request: &DeployApplication,
    ) -> ApiResult<Vec<DeploymentTask>> {
        self.record(format!(
            "deploy:{}:{}",
            request.farm_role_id,
            request.server_id.as_deref().unwrap_or("*")
        ));
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.deploy_errors.get(&request.farm_role_id) {
            return Err(error.clone());
        }
        if let Some(error) = request
            .server_id
            .as_ref()
            .and_then(|id| state.server_deploy_errors.get(id))
        {
            return Err(error.clone());
        }

        let mut tasks: Vec<DeploymentTask> = state
            .roles
            .iter()
            .filter(|role| role.id == request.farm_role_id)
            .flat_map(|role| role.running_servers())
            .filter(|server| {
                request
                    .server_id
                    .as_deref()
                    .map_or(true, |id| id == server.id)
            })
            .map(|server| DeploymentTask {
                id: format!("task-{}", server.id),
                server_id: server.id.clone(),
                farm_role_id: request.farm_role_id.clone(),
                remote_path: request.remote_path.clone(),
                status: TaskStatus::Pending,
            })
            .collect();
        if let Some(extra) = state.extra_tasks.remove(&request.farm_role_id) {
            tasks.extend(extra);
        }
        for task in &tasks {
            state
                .task_statuses
                .entry(task.id.clone())
                .or_insert(task.status);
        }
        Ok(tasks)
    }

    async fn deployment_task_status(&self, task_id: &str) -> ApiResult<TaskStatus> {
        self.record(format!("task_status:{}", task_id));
        let state = self.state.lock().unwrap();
        if let Some(error) = state.status_errors.get(task_id) {
            return Err(error.clone());
        }
        state
            .task_statuses
            .get(task_id)
            .copied()
            .ok_or_else(|| ApiError::Rejected {
                action: Action::DeploymentTaskGetStatus,
                message: format!("unknown task {}", task_id),
            })
    }

    // Windows are inclusive, so an entry stamped exactly at `after` comes
    // back on the next poll as well, like the real control plane answers.
    async fn deployment_task_log(
        &self,
        task_id: &str,
        after: DateTime<Utc>,
    ) -> ApiResult<Vec<TaskLogEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .task_logs
            .get(task_id)
            .into_iter()
            .flatten()
            .filter(|entry| entry.timestamp >= after)
            .cloned()
            .collect())
    }

    async fn system_logs(
        &self,
        _farm_id: &str,
        server_id: &str,
        after: DateTime<Utc>,
    ) -> ApiResult<Vec<SystemLogEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .system_logs
            .get(server_id)
            .into_iter()
            .flatten()
            .filter(|entry| entry.timestamp >= after)
            .cloned()
            .collect())
    }

    async fn script_logs(
        &self,
        _farm_id: &str,
        server_id: Option<&str>,
        after: DateTime<Utc>,
    ) -> ApiResult<Vec<ScriptLogEntry>> {
        let state = self.state.lock().unwrap();
        let entries: Vec<&ScriptLogEntry> = match server_id {
            Some(id) => state.script_logs.get(id).into_iter().flatten().collect(),
            None => state.script_logs.values().flatten().collect(),
        };
        Ok(entries
            .into_iter()
            .filter(|entry| entry.timestamp >= after)
            .cloned()
            .collect())
    }

    async fn execute_script(&self, request: &ExecuteScript) -> ApiResult<()> {
        self.record(format!("execute_script:{}", request.script_id));
        match &self.state.lock().unwrap().script_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn launch_server(&self, request: &LaunchServer) -> ApiResult<String> {
        self.record(format!("launch:{}", request.farm_role_id));
        let mut state = self.state.lock().unwrap();
        state.launched += 1;
        let id = format!("new-{}", state.launched);
        let status = state.launch_status.unwrap_or(ServerStatus::Running);
        let index = 100 + state.launched;
        if let Some(role) = state
            .roles
            .iter_mut()
            .find(|role| role.id == request.farm_role_id)
        {
            role.servers.push(server(&id, index, status));
        }
        Ok(id)
    }

    async fn terminate_server(&self, request: &TerminateServer) -> ApiResult<()> {
        self.record(format!("terminate:{}", request.server_id));
        self.set_server_status(&request.server_id, ServerStatus::Terminated);
        Ok(())
    }

    async fn global_variables(&self, scope: &VariableScope) -> ApiResult<Vec<GlobalVariable>> {
        self.record(format!("variables:{}", scope.farm_id));
        Ok(self.state.lock().unwrap().variables.clone())
    }
}
