//! Readiness checks for replacement servers

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::errors::FarmError;
use crate::recycle::ReplacementServer;

/// Decides whether a running replacement can take over from its original
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// `Ok(false)` means not ready yet; errors are retried by the caller
    async fn check(&self, replacement: &ReplacementServer) -> Result<bool, FarmError>;
}

#[derive(Debug, Clone)]
pub struct HealthCheckOptions {
    /// Path requested on the replacement
    pub path: String,

    /// Text the response body must contain
    pub expected_marker: String,

    /// Roles that serve HTTP and must pass the HTTP check
    pub marker_roles: Regex,

    pub timeout: Duration,
}

/// Requests `http://{ip}{path}` for roles that serve HTTP; every other role is
/// ready as soon as it runs.
#[derive(Debug, Clone)]
pub struct HttpHealthCheck {
    client: Client,
    options: HealthCheckOptions,
}

impl HttpHealthCheck {
    pub fn new(options: HealthCheckOptions) -> Result<Self, FarmError> {
        let client = Client::builder().timeout(options.timeout).build()?;
        Ok(Self { client, options })
    }

    pub fn needs_check(&self, role_name: &str) -> bool {
        self.options.marker_roles.is_match(role_name)
    }

    pub fn url(&self, ip: &str) -> Result<Url, FarmError> {
        let base = Url::parse(&format!("http://{}", ip))?;
        Ok(base.join(&self.options.path)?)
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, replacement: &ReplacementServer) -> Result<bool, FarmError> {
        if !self.needs_check(&replacement.role_name) {
            return Ok(true);
        }

        let ip = replacement.ip.as_deref().ok_or_else(|| {
            FarmError::HealthCheckError(format!("{} has no address yet", replacement.server_id))
        })?;
        let url = self.url(ip)?;
        debug!("GET {}", url);

        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            debug!(url = %url, status = %response.status(), "Replacement not ready");
            return Ok(false);
        }

        let body = response.text().await?;
        Ok(body.contains(&self.options.expected_marker))
    }
}
