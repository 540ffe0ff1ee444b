//! Deployment driver
//!
//! Starts a deployment on every deployable role of a farm, then polls the
//! per-role monitors on a fixed tick until all of them are done or the poll
//! ceiling is reached.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fleet_models::{DeployApplication, ExecuteScript, Role, VariableScope};

use crate::client::{Action, ApiError, FleetClient};
use crate::deploy::failure::FailureClassifier;
use crate::deploy::monitor::{DeploymentMonitor, MonitorOptions};
use crate::deploy::report::DeploymentOutcome;
use crate::deploy::server::MAX_SCANS_WITHOUT_CHANGE;
use crate::errors::FarmError;

/// Roles that never receive application deployments
pub const EXCLUDED_ROLES: &str = r"(PGSQL|lb-nginx|DataLoad)";

/// Deployer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between two polls of every monitor
    pub poll_interval: Duration,

    /// Polls before the run is reported as timed out
    pub max_polls: u32,

    /// Script that runs last in every deployment
    pub completion_script: String,

    /// Roles whose name matches are skipped
    pub excluded_roles: Regex,

    /// How long the farm-wide script may run
    pub script_timeout: Duration,

    pub max_scans_without_change: u32,

    /// Variables listed when storage authentication fails
    pub credential_variables: Vec<String>,
}

impl Options {
    pub fn new(excluded_roles: &str) -> Result<Self, FarmError> {
        Ok(Self {
            poll_interval: Duration::from_secs(10),
            max_polls: 60,
            completion_script: "AppConfigAndLaunch".to_string(),
            excluded_roles: Regex::new(excluded_roles)?,
            script_timeout: Duration::from_secs(1200),
            max_scans_without_change: MAX_SCANS_WITHOUT_CHANGE,
            credential_variables: Vec::new(),
        })
    }
}

/// How the deployment is triggered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployMode {
    /// One deployment task per server, tracked by task status and logs
    PerServer {
        application_id: String,
        remote_path: String,
    },

    /// One farm-wide script run, tracked by logs only
    FarmScript {
        script_id: String,
        application_name: String,
    },
}

#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub farm_id: String,
    pub mode: DeployMode,

    /// Restart application processes instead of reloading them
    pub hard_restart: bool,

    /// Correlates the script run with its log entries
    pub deployment_key: String,
}

impl DeploymentRequest {
    pub fn new(farm_id: impl Into<String>, mode: DeployMode) -> Self {
        Self {
            farm_id: farm_id.into(),
            mode,
            hard_restart: false,
            deployment_key: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_hard_restart(mut self, hard_restart: bool) -> Self {
        self.hard_restart = hard_restart;
        self
    }

    pub fn with_deployment_key(mut self, key: impl Into<String>) -> Self {
        self.deployment_key = key.into();
        self
    }
}

/// Drives one deployment run
pub struct Deployer {
    client: Arc<dyn FleetClient>,
    options: Options,
    request: DeploymentRequest,
}

impl Deployer {
    pub fn new(client: Arc<dyn FleetClient>, options: Options, request: DeploymentRequest) -> Self {
        Self {
            client,
            options,
            request,
        }
    }

    pub fn deployment_key(&self) -> &str {
        &self.request.deployment_key
    }

    /// Run the deployment, sleeping on the tokio timer between polls
    pub async fn execute(&self) -> Result<DeploymentOutcome, FarmError> {
        self.execute_with(tokio::time::sleep).await
    }

    /// Run the deployment with a custom sleep function
    pub async fn execute_with<S, F>(&self, sleep_fn: S) -> Result<DeploymentOutcome, FarmError>
    where
        S: Fn(Duration) -> F,
        F: Future<Output = ()>,
    {
        let client = self.client.as_ref();
        let farm_id = &self.request.farm_id;

        let mut monitors = self.initialize_monitors().await?;
        info!(
            farm_id = %farm_id,
            deployment_key = %self.request.deployment_key,
            roles = %monitors.iter().map(|m| m.role().name.as_str()).collect::<Vec<_>>().join(", "),
            "Deploying"
        );

        match &self.request.mode {
            DeployMode::PerServer {
                application_id,
                remote_path,
            } => {
                let request = DeployApplication {
                    farm_id: farm_id.clone(),
                    farm_role_id: String::new(),
                    application_id: application_id.clone(),
                    remote_path: remote_path.clone(),
                    server_id: None,
                };
                for monitor in &monitors {
                    let scoped = DeployApplication {
                        farm_role_id: monitor.role().id.clone(),
                        ..request.clone()
                    };
                    scoped
                        .validate()
                        .map_err(|missing| ApiError::invalid_input(Action::DeploymentTaskStart, missing))?;
                }

                if self.request.hard_restart {
                    warn!(
                        farm_id = %farm_id,
                        "Hard restart cannot be requested for per-server deployments; restart the application manually once complete"
                    );
                }

                for monitor in monitors.iter_mut() {
                    monitor.start(client, Some(&request)).await?;
                }
            }
            DeployMode::FarmScript {
                script_id,
                application_name,
            } => {
                self.execute_script(script_id, application_name).await?;
                for monitor in monitors.iter_mut() {
                    monitor.start(client, None).await?;
                }
            }
        }

        let (polls, aborted) = self.poll_monitors(&mut monitors, sleep_fn).await;

        let variables = if monitors.iter().any(DeploymentMonitor::has_failures) {
            self.variables().await
        } else {
            BTreeMap::new()
        };

        let mut outcome = DeploymentOutcome::from_monitors(
            farm_id.clone(),
            self.request.deployment_key.clone(),
            polls,
            &monitors,
            &variables,
        );
        if let Some(err) = aborted {
            outcome = outcome.aborted(err.to_string());
        }
        info!(farm_id = %farm_id, verdict = %outcome.verdict, polls, "Deployment finished");
        Ok(outcome)
    }

    async fn initialize_monitors(&self) -> Result<Vec<DeploymentMonitor>, FarmError> {
        let farm_id = &self.request.farm_id;
        let roles = self
            .client
            .farm_roles(farm_id)
            .await
            .map_err(|err| FarmError::FarmDetails {
                farm_id: farm_id.clone(),
                reason: err.to_string(),
            })?;

        let (excluded, deployable): (Vec<Role>, Vec<Role>) = roles
            .into_iter()
            .partition(|role| self.options.excluded_roles.is_match(&role.name));
        for role in &excluded {
            debug!(role = %role.name, "Skipping excluded role");
        }

        if deployable.is_empty() {
            return Err(FarmError::NoDeployableRoles {
                available: excluded
                    .iter()
                    .map(|role| role.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        let classifier = Arc::new(FailureClassifier::standard(
            self.options.credential_variables.clone(),
        )?);
        let monitor_options = MonitorOptions {
            completion_script: self.options.completion_script.clone(),
            max_scans_without_change: self.options.max_scans_without_change,
            classifier,
        };

        let (monitors, idle): (Vec<_>, Vec<_>) = deployable
            .into_iter()
            .map(|role| DeploymentMonitor::new(farm_id.clone(), role, monitor_options.clone()))
            .partition(|monitor| !monitor.servers().is_empty());
        for monitor in &idle {
            warn!(farm_id = %farm_id, role = %monitor.role().name, "Skipping role without running servers");
        }

        if monitors.is_empty() {
            return Err(FarmError::NoRunningServers {
                roles: idle
                    .iter()
                    .map(|monitor| monitor.role().name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        Ok(monitors)
    }

    async fn execute_script(&self, script_id: &str, application_name: &str) -> Result<(), FarmError> {
        let request = ExecuteScript {
            farm_id: self.request.farm_id.clone(),
            script_id: script_id.to_string(),
            timeout: self.options.script_timeout.as_secs(),
            is_async: true,
            config_variables: BTreeMap::from([
                (
                    "restart_on_deploy".to_string(),
                    self.request.hard_restart.to_string(),
                ),
                ("my_app".to_string(), application_name.to_string()),
                (
                    "deployment_key".to_string(),
                    self.request.deployment_key.clone(),
                ),
            ]),
        };
        request
            .validate()
            .map_err(|missing| ApiError::invalid_input(Action::ScriptExecute, missing))?;

        match self.client.execute_script(&request).await {
            Ok(()) => {
                info!(farm_id = %request.farm_id, script_id = %script_id, "Deployment script started");
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(err.into()),
            Err(err) => {
                error!(farm_id = %request.farm_id, script_id = %script_id, error = %err, "Script failure, see the scripting logs");
                Err(FarmError::ScriptExecution(err.message().to_string()))
            }
        }
    }

    /// Returns how many polls were made, and the error that stopped polling
    /// early if there was one
    async fn poll_monitors<S, F>(
        &self,
        monitors: &mut [DeploymentMonitor],
        sleep_fn: S,
    ) -> (u32, Option<FarmError>)
    where
        S: Fn(Duration) -> F,
        F: Future<Output = ()>,
    {
        let client = self.client.as_ref();
        let max_polls = self.options.max_polls;
        let mut polls = 0;

        for count in 1..=max_polls {
            if monitors.iter().all(DeploymentMonitor::is_done) {
                break;
            }

            polls = count;
            for monitor in monitors.iter_mut() {
                if let Err(err) = monitor.poll(client).await {
                    error!(
                        farm_id = %self.request.farm_id,
                        role = %monitor.role().name,
                        poll = count,
                        error = %err,
                        "Polling aborted"
                    );
                    return (polls, Some(err));
                }
            }

            let remaining: usize = monitors.iter().map(DeploymentMonitor::remaining).sum();
            info!("Poll {} of {}: {} servers remain", count, max_polls, remaining);

            sleep_fn(self.options.poll_interval).await;
        }

        if !monitors.iter().all(DeploymentMonitor::is_done) {
            warn!(
                farm_id = %self.request.farm_id,
                waited_secs = self.options.poll_interval.as_secs() * u64::from(max_polls),
                "Timed out waiting for the deployment to finish"
            );
        }
        (polls, None)
    }

    /// Farm variables for failure descriptions; empty if they cannot be read
    async fn variables(&self) -> BTreeMap<String, String> {
        let scope = VariableScope {
            farm_id: self.request.farm_id.clone(),
            farm_role_id: None,
        };
        match self.client.global_variables(&scope).await {
            Ok(variables) => variables
                .into_iter()
                .map(|variable| (variable.name, variable.value))
                .collect(),
            Err(err) => {
                warn!(farm_id = %scope.farm_id, error = %err, "Cannot read farm variables");
                BTreeMap::new()
            }
        }
    }
}
