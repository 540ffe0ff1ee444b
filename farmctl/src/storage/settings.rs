//! Settings file management

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::deploy::server::MAX_SCANS_WITHOUT_CHANGE;
use crate::errors::FarmError;
use crate::logs::{LogLevel, LogOptions};
use crate::recycle::HealthCheckOptions;
use crate::workers::{deployer, recycler};

/// farmctl settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for a log file in addition to stdout
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    #[serde(default)]
    pub deploy: DeploySettings,

    #[serde(default)]
    pub recycle: RecycleSettings,
}

impl Settings {
    pub fn from_json(contents: &str) -> Result<Self, FarmError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Read settings from a JSON file
    pub async fn read(path: impl AsRef<Path>) -> Result<Self, FarmError> {
        let contents = fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&contents)
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            log_level: self.log_level,
            stdout: true,
            log_dir: self.log_dir.clone(),
            json_format: self.json_logs,
        }
    }

    pub fn deployer_options(&self) -> Result<deployer::Options, FarmError> {
        let deploy = &self.deploy;
        let mut options = deployer::Options::new(&deploy.excluded_roles)?;
        options.poll_interval = Duration::from_secs(deploy.poll_interval_secs);
        options.max_polls = deploy.max_polls;
        options.completion_script = deploy.completion_script.clone();
        options.script_timeout = Duration::from_secs(deploy.script_timeout_secs);
        options.max_scans_without_change = deploy.max_scans_without_change;
        options.credential_variables = deploy.credential_variables.clone();

        if options.completion_script.trim().is_empty() {
            return Err(FarmError::ConfigError(
                "deploy.completion_script must not be empty".to_string(),
            ));
        }
        Ok(options)
    }

    pub fn recycler_options(&self) -> recycler::Options {
        let recycle = &self.recycle;
        recycler::Options {
            poll_interval: Duration::from_secs(recycle.poll_interval_secs),
            batch_sizes: recycle.batch_sizes.clone(),
            default_batch_size: recycle.default_batch_size,
        }
    }

    pub fn health_check_options(&self) -> Result<HealthCheckOptions, FarmError> {
        let health = &self.recycle.health_check;
        if !health.path.starts_with('/') {
            return Err(FarmError::ConfigError(format!(
                "recycle.health_check.path must start with '/': {}",
                health.path
            )));
        }
        Ok(HealthCheckOptions {
            path: health.path.clone(),
            expected_marker: health.expected_marker.clone(),
            marker_roles: Regex::new(&health.marker_roles)?,
            timeout: Duration::from_secs(health.timeout_secs),
        })
    }
}

/// Deployment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    /// Script that runs last in every deployment
    #[serde(default = "default_completion_script")]
    pub completion_script: String,

    /// Regex of role names that are never deployed to
    #[serde(default = "default_excluded_roles")]
    pub excluded_roles: String,

    #[serde(default = "default_script_timeout")]
    pub script_timeout_secs: u64,

    #[serde(default = "default_max_scans_without_change")]
    pub max_scans_without_change: u32,

    #[serde(default)]
    pub credential_variables: Vec<String>,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_max_polls() -> u32 {
    60
}

fn default_completion_script() -> String {
    "AppConfigAndLaunch".to_string()
}

fn default_excluded_roles() -> String {
    deployer::EXCLUDED_ROLES.to_string()
}

fn default_script_timeout() -> u64 {
    1200
}

fn default_max_scans_without_change() -> u32 {
    MAX_SCANS_WITHOUT_CHANGE
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_polls: default_max_polls(),
            completion_script: default_completion_script(),
            excluded_roles: default_excluded_roles(),
            script_timeout_secs: default_script_timeout(),
            max_scans_without_change: default_max_scans_without_change(),
            credential_variables: Vec::new(),
        }
    }
}

/// Server replacement settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecycleSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Replacements per wave, by role name
    #[serde(default = "default_batch_sizes")]
    pub batch_sizes: HashMap<String, usize>,

    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,

    #[serde(default)]
    pub health_check: HealthCheckSettings,
}

fn default_batch_sizes() -> HashMap<String, usize> {
    HashMap::from([("RailsAppServer".to_string(), 5), ("Sidekiq".to_string(), 2)])
}

fn default_batch_size() -> usize {
    1
}

impl Default for RecycleSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_sizes: default_batch_sizes(),
            default_batch_size: default_batch_size(),
            health_check: HealthCheckSettings::default(),
        }
    }
}

/// HTTP readiness check for replacement servers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSettings {
    #[serde(default = "default_health_path")]
    pub path: String,

    #[serde(default = "default_expected_marker")]
    pub expected_marker: String,

    /// Regex of role names that must pass the HTTP check
    #[serde(default = "default_marker_roles")]
    pub marker_roles: String,

    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
}

fn default_health_path() -> String {
    "/users/sign_in".to_string()
}

fn default_expected_marker() -> String {
    "Welcome".to_string()
}

fn default_marker_roles() -> String {
    "RailsAppServer".to_string()
}

fn default_health_timeout() -> u64 {
    10
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            expected_marker: default_expected_marker(),
            marker_roles: default_marker_roles(),
            timeout_secs: default_health_timeout(),
        }
    }
}
