//! Deployment monitoring for every server of one role

use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_models::{DeployApplication, DeploymentTask, Role, Server, ServerStatus};
use tracing::{debug, error, info};

use crate::client::FleetClient;
use crate::deploy::failure::FailureClassifier;
use crate::deploy::fsm::DeploymentState;
use crate::deploy::log_sink::LogSink;
use crate::deploy::server::{ServerDeployment, MAX_SCANS_WITHOUT_CHANGE};
use crate::errors::FarmError;

/// Settings shared by every server a monitor tracks
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub completion_script: String,
    pub max_scans_without_change: u32,
    pub classifier: Arc<FailureClassifier>,
}

impl MonitorOptions {
    pub fn new(completion_script: impl Into<String>, classifier: Arc<FailureClassifier>) -> Self {
        Self {
            completion_script: completion_script.into(),
            max_scans_without_change: MAX_SCANS_WITHOUT_CHANGE,
            classifier,
        }
    }
}

/// Tracks the deployment of one role
#[derive(Debug)]
pub struct DeploymentMonitor {
    farm_id: String,
    role: Role,
    options: MonitorOptions,
    servers: Vec<ServerDeployment>,

    /// Last state every server agreed on; for display only
    status: Option<DeploymentState>,
    error: Option<String>,
}

impl DeploymentMonitor {
    /// Monitor the servers of `role` that are currently running
    pub fn new(farm_id: impl Into<String>, role: Role, options: MonitorOptions) -> Self {
        let farm_id = farm_id.into();
        let servers = role
            .running_servers()
            .map(|server| Self::deployment_for(&farm_id, &role, server.clone(), &options))
            .collect();

        Self {
            farm_id,
            role,
            options,
            servers,
            status: None,
            error: None,
        }
    }

    fn deployment_for(
        farm_id: &str,
        role: &Role,
        server: Server,
        options: &MonitorOptions,
    ) -> ServerDeployment {
        let sink = LogSink::new(
            server.id.clone(),
            options.completion_script.clone(),
            options.classifier.clone(),
        );
        ServerDeployment::new(farm_id, role, server, sink)
            .with_max_scans_without_change(options.max_scans_without_change)
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn servers(&self) -> &[ServerDeployment] {
        &self.servers
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Aggregate status, only ever set from a unanimous view
    pub fn status(&self) -> Option<DeploymentState> {
        self.status
    }

    /// Start every server. `request` is the role-agnostic deploy request in
    /// per-server mode and None when a farm-wide script already started the
    /// deployment.
    pub async fn start(
        &mut self,
        client: &dyn FleetClient,
        request: Option<&DeployApplication>,
    ) -> Result<(), FarmError> {
        info!(
            farm_id = %self.farm_id,
            role = %self.role.name,
            servers = self.servers.len(),
            "Starting deployment"
        );

        let mut strays = Vec::new();
        for server in self.servers.iter_mut() {
            strays.extend(server.start(client, request).await?);
        }
        for task in strays {
            self.route_task(task);
        }

        let all_failed = !self.servers.is_empty()
            && self
                .servers
                .iter()
                .all(|server| server.status() == DeploymentState::Failed);
        if all_failed {
            let reason = self
                .servers
                .iter()
                .find_map(|server| server.error())
                .unwrap_or("deployment start failed")
                .to_string();
            error!(role = %self.role.name, error = %reason, "Role deployment failed to start");
            self.error = Some(reason);
        }

        self.update_status();
        Ok(())
    }

    /// Bind a task returned for another server of the role
    fn route_task(&mut self, task: DeploymentTask) {
        if let Some(server) = self
            .servers
            .iter_mut()
            .find(|server| server.id() == task.server_id)
        {
            if let Err(e) = server.assign_task(task) {
                error!(role = %self.role.name, "Unexpected: {}", e);
            }
            return;
        }

        error!(
            role = %self.role.name,
            server_id = %task.server_id,
            task_id = %task.id,
            "Unexpected: deployment task for a server not being tracked"
        );
        let server = Server {
            id: task.server_id.clone(),
            index: 0,
            status: ServerStatus::Running,
            external_ip: None,
            internal_ip: None,
        };
        let mut deployment = Self::deployment_for(&self.farm_id, &self.role, server, &self.options);
        deployment.mark_started();
        if let Err(e) = deployment.assign_task(task) {
            error!(role = %self.role.name, "Unexpected: {}", e);
        }
        self.servers.push(deployment);
    }

    /// One tick: scan logs, then refresh task status, server by server
    pub async fn poll(&mut self, client: &dyn FleetClient) -> Result<(), FarmError> {
        if self.is_done() {
            return Ok(());
        }

        for server in self.servers.iter_mut() {
            server.scan_logs(client).await?;
            server.refresh(client).await?;
        }

        self.update_status();
        debug!(
            role = %self.role.name,
            remaining = self.remaining(),
            status = ?self.status,
            "Polled role"
        );
        Ok(())
    }

    fn update_status(&mut self) {
        let Some(first) = self.servers.first().map(ServerDeployment::status) else {
            return;
        };
        if self.servers.iter().all(|server| server.status() == first) {
            self.status = Some(first);
        }
    }

    pub fn is_done(&self) -> bool {
        self.servers.iter().all(ServerDeployment::is_done)
    }

    /// Every server finished with a successful completion script
    pub fn is_completed(&self) -> bool {
        self.servers.iter().all(ServerDeployment::is_completed)
    }

    /// Servers still in progress
    pub fn remaining(&self) -> usize {
        self.servers.iter().filter(|server| !server.is_done()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.servers
            .iter()
            .any(|server| !server.failures().is_empty())
    }

    /// Per-server outcome text
    pub fn summaries(&self, variables: &BTreeMap<String, String>) -> Vec<String> {
        self.servers
            .iter()
            .map(|server| server.summary(variables))
            .collect()
    }
}
