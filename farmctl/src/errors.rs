//! Error types for farmctl

use thiserror::Error;

use crate::client::ApiError;

/// Main error type for farmctl
#[derive(Error, Debug)]
pub enum FarmError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Pattern error: {0}")]
    PatternError(#[from] regex::Error),

    #[error("API error: {0}")]
    ApiError(#[from] ApiError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cannot fetch roles for farm {farm_id}: {reason}")]
    FarmDetails { farm_id: String, reason: String },

    #[error("Cannot deploy to a farm with only excluded roles (available roles: {available})")]
    NoDeployableRoles { available: String },

    #[error("No running servers to deploy to in roles: {roles}")]
    NoRunningServers { roles: String },

    #[error("Script execution failed: {0}")]
    ScriptExecution(String),

    #[error("Task already assigned to server {server_id} (existing: {existing}, offered: {offered})")]
    TaskAlreadyAssigned {
        server_id: String,
        existing: String,
        offered: String,
    },

    #[error("Health check error: {0}")]
    HealthCheckError(String),
}

impl FarmError {
    /// Errors that must abort a run before (or instead of) polling
    pub fn is_fatal(&self) -> bool {
        match self {
            FarmError::ApiError(err) => err.is_fatal(),
            FarmError::TaskAlreadyAssigned { .. }
            | FarmError::HttpError(_)
            | FarmError::HealthCheckError(_) => false,
            _ => true,
        }
    }
}
