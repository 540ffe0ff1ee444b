//! Deployment tracking for a single server
//!
//! A server's deployment has two independent completion signals: the status
//! of its deployment task and its logs. Task status does not reliably reach a
//! terminal value in every execution mode, while the completion script always
//! runs last, so a run of that script found in the logs decides the outcome.

use chrono::{DateTime, Utc};
use fleet_models::{DeployApplication, DeploymentTask, LogEntry, Role, Server};
use tracing::{debug, error, info, warn};

use crate::client::{ApiError, FleetClient};
use crate::deploy::failure::{Failure, FailureContext};
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState};
use crate::deploy::log_sink::LogSink;
use crate::errors::FarmError;

/// Scans without a new entry before the window is widened back to the start
pub const MAX_SCANS_WITHOUT_CHANGE: u32 = 10;

/// Deployment of one server
#[derive(Debug)]
pub struct ServerDeployment {
    farm_id: String,
    role_id: String,
    role_name: String,
    server: Server,
    task: Option<DeploymentTask>,
    fsm: DeploymentFsm,
    log_sink: LogSink,
    last_seen: DateTime<Utc>,
    scans_without_change: u32,
    max_scans_without_change: u32,
}

impl ServerDeployment {
    pub fn new(farm_id: impl Into<String>, role: &Role, server: Server, log_sink: LogSink) -> Self {
        Self {
            farm_id: farm_id.into(),
            role_id: role.id.clone(),
            role_name: role.name.clone(),
            server,
            task: None,
            fsm: DeploymentFsm::new(),
            log_sink,
            last_seen: Utc::now(),
            scans_without_change: 0,
            max_scans_without_change: MAX_SCANS_WITHOUT_CHANGE,
        }
    }

    pub fn with_max_scans_without_change(mut self, max: u32) -> Self {
        self.max_scans_without_change = max;
        self
    }

    pub fn id(&self) -> &str {
        &self.server.id
    }

    /// `role.index`, the way operators refer to servers
    pub fn name(&self) -> String {
        format!("{}.{}", self.role_name, self.server.index)
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn role_id(&self) -> &str {
        &self.role_id
    }

    pub fn status(&self) -> DeploymentState {
        self.fsm.state()
    }

    pub fn error(&self) -> Option<&str> {
        self.fsm.error()
    }

    pub fn task(&self) -> Option<&DeploymentTask> {
        self.task.as_ref()
    }

    pub fn log_sink(&self) -> &LogSink {
        &self.log_sink
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn is_done(&self) -> bool {
        self.fsm.is_done()
    }

    pub fn is_completed(&self) -> bool {
        self.status() == DeploymentState::Completed
    }

    /// Start the deployment on this server.
    ///
    /// With `request` set, asks the control plane for a deployment task scoped
    /// to this server and binds the task returned for it. Tasks returned for
    /// other servers are handed back to the caller. Without `request` the
    /// deployment was triggered farm-wide and only the logs are followed.
    ///
    /// A refused call fails this server only; invalid input is returned as an
    /// error.
    pub async fn start(
        &mut self,
        client: &dyn FleetClient,
        request: Option<&DeployApplication>,
    ) -> Result<Vec<DeploymentTask>, FarmError> {
        let Some(request) = request else {
            self.transition(DeploymentEvent::Start);
            return Ok(Vec::new());
        };

        let request = DeployApplication {
            farm_role_id: self.role_id.clone(),
            server_id: Some(self.server.id.clone()),
            ..request.clone()
        };

        let tasks = match client.deploy_application(&request).await {
            Ok(tasks) => tasks,
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => {
                warn!(server = %self.name(), error = %err, "Deployment start refused");
                self.transition(DeploymentEvent::StartFailed(err.message().to_string()));
                return Ok(Vec::new());
            }
        };

        self.transition(DeploymentEvent::Start);

        let (own, others): (Vec<_>, Vec<_>) = tasks
            .into_iter()
            .partition(|task| task.server_id == self.server.id);

        if own.is_empty() {
            warn!(server = %self.name(), "No deployment task returned; following logs only");
        }
        for task in own {
            if let Err(e) = self.assign_task(task) {
                error!(server = %self.name(), "Unexpected: {}", e);
            }
        }

        Ok(others)
    }

    /// Mark as started without a start call of its own
    pub fn mark_started(&mut self) {
        if self.status() == DeploymentState::NotStarted {
            self.transition(DeploymentEvent::Start);
        }
    }

    /// Bind the deployment task for this server. A second task means the
    /// control plane created two tasks for one server.
    pub fn assign_task(&mut self, task: DeploymentTask) -> Result<(), FarmError> {
        if let Some(existing) = &self.task {
            return Err(FarmError::TaskAlreadyAssigned {
                server_id: self.server.id.clone(),
                existing: existing.id.clone(),
                offered: task.id,
            });
        }

        debug!(server = %self.name(), task_id = %task.id, status = %task.status, "Assigned task");
        let status = task.status;
        self.task = Some(task);
        if !self.is_done() {
            self.transition(DeploymentEvent::TaskReported(status));
        }
        Ok(())
    }

    /// Re-poll the task status. Returns whether the server's status changed.
    pub async fn refresh(&mut self, client: &dyn FleetClient) -> Result<bool, FarmError> {
        if self.is_done() {
            return Ok(false);
        }
        let Some(task_id) = self.task.as_ref().map(|task| task.id.clone()) else {
            return Ok(false);
        };

        let status = match client.deployment_task_status(&task_id).await {
            Ok(status) => status,
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => {
                warn!(server = %self.name(), task_id = %task_id, error = %err, "Task status unavailable");
                return Ok(false);
            }
        };

        if let Some(task) = self.task.as_mut() {
            task.status = status;
        }
        let changed = self.transition(DeploymentEvent::TaskReported(status));
        if changed {
            info!(server = %self.name(), status = %self.status(), "Task status changed");
        }
        Ok(changed)
    }

    /// Pull new log entries and look for the completion script
    pub async fn scan_logs(&mut self, client: &dyn FleetClient) -> Result<(), FarmError> {
        if self.is_done() {
            return Ok(());
        }

        let scan_started = Utc::now();
        let added = self.fetch_logs(client).await?;
        if added > 0 {
            self.scans_without_change = 0;
        } else {
            self.scans_without_change += 1;
        }

        if self.scans_without_change > self.max_scans_without_change {
            debug!(
                server = %self.name(),
                scans = self.scans_without_change,
                "No new log entries; widening window back to start"
            );
            self.last_seen = self.log_sink.start_time();
            self.scans_without_change = 0;
        } else {
            self.last_seen = scan_started;
        }

        if let Some(marker) = self.log_sink.end_of_deployment_entry() {
            let success = marker.is_success();
            if self.transition(DeploymentEvent::MarkerFound { success }) {
                info!(server = %self.name(), status = %self.status(), "Completion script finished");
            }
        }
        Ok(())
    }

    async fn fetch_logs(&mut self, client: &dyn FleetClient) -> Result<usize, FarmError> {
        let after = self.last_seen;
        let mut fetched: Vec<LogEntry> = Vec::new();

        let system = client
            .system_logs(&self.farm_id, &self.server.id, after)
            .await;
        fetched.extend(self.usable(system)?.into_iter().map(LogEntry::from));

        let script = client
            .script_logs(&self.farm_id, Some(&self.server.id), after)
            .await;
        fetched.extend(self.usable(script)?.into_iter().map(LogEntry::from));

        if let Some(task_id) = self.task.as_ref().map(|task| task.id.clone()) {
            let task_log = client.deployment_task_log(&task_id, after).await;
            fetched.extend(self.usable(task_log)?.into_iter().map(LogEntry::from));
        }

        let added = self
            .log_sink
            .extend(fetched.into_iter().filter(|entry| entry.is_after(after)));
        if added > 0 {
            debug!(server = %self.name(), added, "New log entries");
        }
        Ok(added)
    }

    /// Unwrap a log response; a refused fetch is treated as an empty window
    fn usable<T>(&self, response: Result<Vec<T>, ApiError>) -> Result<Vec<T>, FarmError> {
        match response {
            Ok(entries) => Ok(entries),
            Err(err) if err.is_fatal() => Err(err.into()),
            Err(err) => {
                warn!(server = %self.name(), error = %err, "Log fetch failed");
                Ok(Vec::new())
            }
        }
    }

    fn transition(&mut self, event: DeploymentEvent) -> bool {
        match self.fsm.process(event) {
            Ok(changed) => changed,
            Err(e) => {
                debug!(server = %self.name(), "Ignored transition: {}", e);
                false
            }
        }
    }

    /// Every classified failure seen so far
    pub fn failures(&self) -> Vec<&Failure> {
        self.log_sink
            .failures()
            .iter()
            .flat_map(|classified| classified.failures.iter())
            .collect()
    }

    pub fn failure_context(&self, variables: &std::collections::BTreeMap<String, String>) -> FailureContext {
        FailureContext {
            farm_id: self.farm_id.clone(),
            server_name: self.name(),
            task_id: self.task.as_ref().map(|task| task.id.clone()),
            variables: variables.clone(),
        }
    }

    /// One-line outcome, followed by the rendered failures if there are any
    pub fn summary(&self, variables: &std::collections::BTreeMap<String, String>) -> String {
        let failures = self.failures();
        if self.is_done() && failures.is_empty() && self.is_completed() {
            return format!("{}: OK", self.name());
        }

        let mut line = format!("{}: {}", self.name(), self.status().label().to_uppercase());
        if let Some(error) = self.error() {
            line.push_str(&format!(" ({})", error));
        }
        if failures.is_empty() {
            return line;
        }

        let context = self.failure_context(variables);
        let rendered: Vec<String> = failures
            .iter()
            .map(|failure| failure.render(&context))
            .collect();
        format!("{}\n{}", line, rendered.join("\n\n"))
    }
}
