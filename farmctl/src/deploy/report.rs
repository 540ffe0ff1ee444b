//! Final per-role, per-server outcome of a deployment

use std::collections::BTreeMap;
use std::fmt;

use colored::Colorize;
use serde::Serialize;

use crate::deploy::fsm::DeploymentState;
use crate::deploy::monitor::DeploymentMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Every server ran the completion script successfully
    Succeeded,

    /// All servers are done and at least one failed
    Failed,

    /// The poll ceiling was reached first
    TimedOut,

    /// Polling stopped on an unrecoverable error
    Aborted,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Verdict::Succeeded => "succeeded",
            Verdict::Failed => "failed",
            Verdict::TimedOut => "timed out",
            Verdict::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerReport {
    pub server_id: String,
    pub name: String,
    pub status: DeploymentState,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleReport {
    pub role_id: String,
    pub role_name: String,
    pub status: Option<DeploymentState>,
    pub error: Option<String>,
    pub servers: Vec<ServerReport>,
}

impl RoleReport {
    pub fn from_monitor(monitor: &DeploymentMonitor, variables: &BTreeMap<String, String>) -> Self {
        Self {
            role_id: monitor.role().id.clone(),
            role_name: monitor.role().name.clone(),
            status: monitor.status(),
            error: monitor.error().map(str::to_string),
            servers: monitor
                .servers()
                .iter()
                .map(|server| ServerReport {
                    server_id: server.id().to_string(),
                    name: server.name(),
                    status: server.status(),
                    summary: server.summary(variables),
                })
                .collect(),
        }
    }
}

/// What a deployment run ended with
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentOutcome {
    pub farm_id: String,
    pub deployment_key: String,
    pub verdict: Verdict,
    pub polls: u32,

    /// Why polling stopped early, set together with [`Verdict::Aborted`]
    pub error: Option<String>,
    pub roles: Vec<RoleReport>,
}

impl DeploymentOutcome {
    pub fn from_monitors(
        farm_id: impl Into<String>,
        deployment_key: impl Into<String>,
        polls: u32,
        monitors: &[DeploymentMonitor],
        variables: &BTreeMap<String, String>,
    ) -> Self {
        let verdict = if !monitors.iter().all(DeploymentMonitor::is_done) {
            Verdict::TimedOut
        } else if monitors.iter().all(DeploymentMonitor::is_completed) {
            Verdict::Succeeded
        } else {
            Verdict::Failed
        };

        Self {
            farm_id: farm_id.into(),
            deployment_key: deployment_key.into(),
            verdict,
            polls,
            error: None,
            roles: monitors
                .iter()
                .map(|monitor| RoleReport::from_monitor(monitor, variables))
                .collect(),
        }
    }

    /// Mark the run as stopped by `error`, keeping the per-server state
    /// collected up to that point
    pub fn aborted(mut self, error: impl Into<String>) -> Self {
        self.verdict = Verdict::Aborted;
        self.error = Some(error.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.verdict == Verdict::Succeeded
    }
}

impl fmt::Display for DeploymentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match self.verdict {
            Verdict::Succeeded => self.verdict.to_string().green().bold(),
            Verdict::Failed => self.verdict.to_string().red().bold(),
            Verdict::TimedOut => self.verdict.to_string().yellow().bold(),
            Verdict::Aborted => self.verdict.to_string().magenta().bold(),
        };
        writeln!(
            f,
            "{} {} ({}, {} polls): {}",
            "Deployment".bold(),
            self.deployment_key,
            self.farm_id,
            self.polls,
            verdict
        )?;
        if let Some(error) = &self.error {
            writeln!(f, "{}", error.red())?;
        }

        for role in &self.roles {
            writeln!(f)?;
            writeln!(f, "{}", role.role_name.bold().cyan())?;
            if let Some(error) = &role.error {
                writeln!(f, "  {}", error.red())?;
            }
            for server in &role.servers {
                let mut lines = server.summary.lines();
                if let Some(first) = lines.next() {
                    let first = match server.status {
                        DeploymentState::Completed => first.green(),
                        DeploymentState::Failed => first.red(),
                        _ => first.yellow(),
                    };
                    writeln!(f, "  {}", first)?;
                }
                for line in lines {
                    writeln!(f, "    {}", line)?;
                }
            }
        }
        Ok(())
    }
}
