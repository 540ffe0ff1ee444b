//! Polling for the outcome of an ad-hoc script run
//!
//! Executing a script only tells whether the control plane accepted it. The
//! per-server result shows up later in the scripting log, so it has to be
//! polled for.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleet_models::ScriptLogEntry;
use tracing::{debug, info};

use crate::client::FleetClient;
use crate::errors::FarmError;

/// Poller worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Delay before each fetch
    pub interval: Duration,

    pub max_polls: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_polls: 5,
        }
    }
}

/// Collects script log entries for a set of servers
pub struct ScriptLogPoller {
    client: Arc<dyn FleetClient>,
    options: Options,
    farm_id: String,
    server_ids: Vec<String>,
}

impl ScriptLogPoller {
    /// With no `server_ids`, any one matching entry is enough
    pub fn new(
        client: Arc<dyn FleetClient>,
        options: Options,
        farm_id: impl Into<String>,
        server_ids: Vec<String>,
    ) -> Self {
        Self {
            client,
            options,
            farm_id: farm_id.into(),
            server_ids,
        }
    }

    pub fn server_count(&self) -> usize {
        self.server_ids.len()
    }

    pub async fn script_logs(
        &self,
        script_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ScriptLogEntry>, FarmError> {
        self.script_logs_with(script_name, since, tokio::time::sleep)
            .await
    }

    /// Entries of `script_name` newer than `since`, once every expected
    /// server has one or the poll budget is spent
    pub async fn script_logs_with<S, F>(
        &self,
        script_name: &str,
        since: DateTime<Utc>,
        sleep_fn: S,
    ) -> Result<Vec<ScriptLogEntry>, FarmError>
    where
        S: Fn(Duration) -> F,
        F: Future<Output = ()>,
    {
        let mut matching: Vec<ScriptLogEntry> = Vec::new();

        for count in 1..=self.options.max_polls {
            if self.is_satisfied(&matching) {
                break;
            }

            sleep_fn(self.options.interval).await;
            debug!(farm_id = %self.farm_id, script = %script_name, count, "Polling script logs");

            let entries = self
                .client
                .script_logs(&self.farm_id, None, since)
                .await?;
            matching = entries
                .into_iter()
                .filter(|entry| entry.timestamp > since && entry.script_name == script_name)
                .filter(|entry| self.server_ids.is_empty() || self.server_ids.contains(&entry.server_id))
                .collect();
        }

        info!(
            farm_id = %self.farm_id,
            script = %script_name,
            found = matching.len(),
            expected = self.server_count(),
            "Script log poll finished"
        );
        Ok(matching)
    }

    fn is_satisfied(&self, matching: &[ScriptLogEntry]) -> bool {
        if self.server_ids.is_empty() {
            !matching.is_empty()
        } else {
            matching.len() >= self.server_ids.len()
        }
    }
}
