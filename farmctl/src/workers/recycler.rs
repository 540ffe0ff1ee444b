//! Rolling replacement of the servers of a farm's roles
//!
//! Replacement proceeds in waves. Each wave launches up to a batch of new
//! servers per role, waits until they have booted, health-checks them and
//! terminates the originals they replace. Unlike a deployment there is no
//! poll ceiling: a replacement that never becomes healthy holds its wave
//! until an operator steps in.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use fleet_models::{LaunchServer, Role, ServerStatus, TerminateServer};

use crate::client::{Action, ApiError, FleetClient};
use crate::errors::FarmError;
use crate::recycle::{HealthCheck, ReplacementServer, RoleProgress};

/// Recycler worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between two status checks
    pub poll_interval: Duration,

    /// Replacements in flight per wave, by role name
    pub batch_sizes: HashMap<String, usize>,

    /// Batch size for roles not listed in `batch_sizes`
    pub default_batch_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_sizes: HashMap::from([
                ("RailsAppServer".to_string(), 5),
                ("Sidekiq".to_string(), 2),
            ]),
            default_batch_size: 1,
        }
    }
}

impl Options {
    pub fn batch_size(&self, role_name: &str) -> usize {
        self.batch_sizes
            .get(role_name)
            .copied()
            .unwrap_or(self.default_batch_size)
            .max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OriginalState {
    /// Still serving, no replacement yet
    Original,

    /// Replacement launched
    Launched,
}

#[derive(Debug, Clone)]
struct OriginalServer {
    server_id: String,
    name: String,
    role_id: String,
    state: OriginalState,
}

/// Servers launched and terminated by a run, in call order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecycleSummary {
    pub launched: Vec<String>,
    pub terminated: Vec<String>,
}

/// Replaces every running server of the target roles
pub struct ReplacementOrchestrator {
    client: Arc<dyn FleetClient>,
    health_check: Arc<dyn HealthCheck>,
    options: Options,
    farm_id: String,
    roles: Vec<Role>,
}

impl ReplacementOrchestrator {
    pub fn new(
        client: Arc<dyn FleetClient>,
        health_check: Arc<dyn HealthCheck>,
        options: Options,
        farm_id: impl Into<String>,
        roles: Vec<Role>,
    ) -> Self {
        Self {
            client,
            health_check,
            options,
            farm_id: farm_id.into(),
            roles,
        }
    }

    /// Replace servers in batches sized per role
    pub async fn recycle(&self) -> Result<RecycleSummary, FarmError> {
        self.recycle_with(tokio::time::sleep).await
    }

    pub async fn recycle_with<S, F>(&self, sleep_fn: S) -> Result<RecycleSummary, FarmError>
    where
        S: Fn(Duration) -> F,
        F: Future<Output = ()>,
    {
        self.run(false, &sleep_fn).await
    }

    /// Replace every server in a single wave
    pub async fn relaunch(&self) -> Result<RecycleSummary, FarmError> {
        self.relaunch_with(tokio::time::sleep).await
    }

    pub async fn relaunch_with<S, F>(&self, sleep_fn: S) -> Result<RecycleSummary, FarmError>
    where
        S: Fn(Duration) -> F,
        F: Future<Output = ()>,
    {
        self.run(true, &sleep_fn).await
    }

    async fn run<S, F>(&self, single_wave: bool, sleep_fn: &S) -> Result<RecycleSummary, FarmError>
    where
        S: Fn(Duration) -> F,
        F: Future<Output = ()>,
    {
        let mut originals = self.setup();
        let mut replacements: Vec<ReplacementServer> = Vec::new();
        let mut progress: Vec<RoleProgress> = self
            .roles
            .iter()
            .map(|role| RoleProgress::new(role.name.clone()))
            .collect();
        let mut summary = RecycleSummary::default();

        info!(
            farm_id = %self.farm_id,
            servers = originals.len(),
            "Replacing servers"
        );

        let mut wave = 0;
        while !originals.is_empty() {
            wave += 1;
            let launched = self
                .launch_replacements(&mut originals, &mut replacements, single_wave, &mut summary)
                .await?;
            if launched == 0 && replacements.is_empty() {
                warn!(farm_id = %self.farm_id, wave, "No replacement could be launched; retrying");
                sleep_fn(self.options.poll_interval).await;
                continue;
            }
            info!(farm_id = %self.farm_id, wave, launched, "Launched replacements");

            self.monitor_startup(&mut replacements, sleep_fn).await?;
            self.replace_originals(
                &mut originals,
                &mut replacements,
                &mut progress,
                &mut summary,
                sleep_fn,
            )
            .await?;
        }

        info!(
            farm_id = %self.farm_id,
            launched = summary.launched.len(),
            terminated = summary.terminated.len(),
            "All servers replaced"
        );
        Ok(summary)
    }

    fn setup(&self) -> Vec<OriginalServer> {
        self.roles
            .iter()
            .flat_map(|role| {
                role.running_servers().map(move |server| OriginalServer {
                    server_id: server.id.clone(),
                    name: format!("{}.{}", role.name, server.index),
                    role_id: role.id.clone(),
                    state: OriginalState::Original,
                })
            })
            .collect()
    }

    /// Returns how many servers were launched
    async fn launch_replacements(
        &self,
        originals: &mut [OriginalServer],
        replacements: &mut Vec<ReplacementServer>,
        single_wave: bool,
        summary: &mut RecycleSummary,
    ) -> Result<usize, FarmError> {
        let mut launched = 0;

        for role in &self.roles {
            let batch = if single_wave {
                usize::MAX
            } else {
                self.options.batch_size(&role.name)
            };
            let in_flight = originals
                .iter()
                .filter(|o| o.role_id == role.id && o.state == OriginalState::Launched)
                .count();
            let slots = batch.saturating_sub(in_flight);

            let candidates: Vec<usize> = originals
                .iter()
                .enumerate()
                .filter(|(_, o)| o.role_id == role.id && o.state == OriginalState::Original)
                .map(|(index, _)| index)
                .take(slots)
                .collect();

            for index in candidates {
                let request = LaunchServer {
                    farm_id: self.farm_id.clone(),
                    farm_role_id: role.id.clone(),
                    increase_max_instances: true,
                };
                request
                    .validate()
                    .map_err(|missing| ApiError::invalid_input(Action::ServerLaunch, missing))?;

                let server_id = match self.client.launch_server(&request).await {
                    Ok(server_id) => server_id,
                    Err(err) if err.is_fatal() => return Err(err.into()),
                    Err(err) => {
                        warn!(role = %role.name, error = %err, "Launch refused");
                        continue;
                    }
                };

                let original = &mut originals[index];
                info!(
                    role = %role.name,
                    "Launching {} as a replacement for {}", server_id, original.name
                );
                original.state = OriginalState::Launched;
                summary.launched.push(server_id.clone());
                replacements.push(ReplacementServer::new(
                    server_id,
                    original.server_id.clone(),
                    original.name.clone(),
                    role.id.clone(),
                    role.name.clone(),
                ));
                launched += 1;
            }
        }

        Ok(launched)
    }

    /// Wait until no replacement is still booting
    async fn monitor_startup<S, F>(
        &self,
        replacements: &mut [ReplacementServer],
        sleep_fn: &S,
    ) -> Result<(), FarmError>
    where
        S: Fn(Duration) -> F,
        F: Future<Output = ()>,
    {
        loop {
            self.update_status(replacements).await?;
            let starting = replacements.iter().filter(|r| r.is_starting()).count();
            if starting == 0 {
                return Ok(());
            }
            info!("Waiting for {} server(s) to transition to Running", starting);
            sleep_fn(self.options.poll_interval).await;
        }
    }

    /// Health-check replacements and terminate the originals they stand in
    /// for, until every replacement of the wave has taken over
    async fn replace_originals<S, F>(
        &self,
        originals: &mut Vec<OriginalServer>,
        replacements: &mut Vec<ReplacementServer>,
        progress: &mut [RoleProgress],
        summary: &mut RecycleSummary,
        sleep_fn: &S,
    ) -> Result<(), FarmError>
    where
        S: Fn(Duration) -> F,
        F: Future<Output = ()>,
    {
        loop {
            let ready: Vec<ReplacementServer> = replacements
                .iter()
                .filter(|r| r.ok_to_terminate)
                .cloned()
                .collect();
            for replacement in ready {
                if !self.terminate_original(&replacement).await? {
                    continue;
                }
                originals.retain(|o| o.server_id != replacement.original_server_id);
                replacements.retain(|r| r.server_id != replacement.server_id);
                summary.terminated.push(replacement.original_server_id.clone());
                if let Some(role) = progress
                    .iter_mut()
                    .find(|p| p.role_name == replacement.role_name)
                {
                    role.terminated += 1;
                }
            }

            if replacements.is_empty() {
                return Ok(());
            }

            self.update_status(replacements).await?;
            for replacement in replacements.iter_mut() {
                match replacement.status {
                    ServerStatus::Running if !replacement.ok_to_terminate => {
                        match self.health_check.check(replacement).await {
                            Ok(healthy) => replacement.ok_to_terminate = healthy,
                            Err(e) => {
                                warn!(server_id = %replacement.server_id, error = %e, "Health check failed");
                            }
                        }
                    }
                    ServerStatus::Failed => {
                        warn!(
                            server_id = %replacement.server_id,
                            original = %replacement.original_name,
                            "Replacement failed; its original is kept until this is resolved"
                        );
                    }
                    _ => {}
                }
            }

            for role in progress.iter_mut() {
                role.tally(replacements.iter());
                debug!("{}", role);
            }

            sleep_fn(self.options.poll_interval).await;
        }
    }

    /// Returns false if the control plane refused
    async fn terminate_original(&self, replacement: &ReplacementServer) -> Result<bool, FarmError> {
        let request = TerminateServer {
            farm_id: self.farm_id.clone(),
            server_id: replacement.original_server_id.clone(),
            decrease_min_instances: true,
        };
        request
            .validate()
            .map_err(|missing| ApiError::invalid_input(Action::ServerTerminate, missing))?;

        info!(role = %replacement.role_name, "Terminating {}", replacement.original_name);
        match self.client.terminate_server(&request).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_fatal() => Err(err.into()),
            Err(err) => {
                warn!(server_id = %request.server_id, error = %err, "Terminate refused");
                Ok(false)
            }
        }
    }

    /// Copy status and address of each replacement from the farm listing
    async fn update_status(&self, replacements: &mut [ReplacementServer]) -> Result<(), FarmError> {
        let roles = match self.client.farm_roles(&self.farm_id).await {
            Ok(roles) => roles,
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => {
                warn!(farm_id = %self.farm_id, error = %err, "Cannot get farm status");
                return Ok(());
            }
        };

        for replacement in replacements.iter_mut() {
            let server = roles
                .iter()
                .filter(|role| role.id == replacement.role_id)
                .find_map(|role| role.server(&replacement.server_id));
            if let Some(server) = server {
                if server.status != replacement.status {
                    debug!(server_id = %server.id, status = %server.status, "Replacement status");
                }
                replacement.status = server.status;
                replacement.ip = server.external_ip.clone().or_else(|| replacement.ip.take());
            }
        }
        Ok(())
    }
}
