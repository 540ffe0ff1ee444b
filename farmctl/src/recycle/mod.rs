//! Server replacement bookkeeping

pub mod health;

use std::fmt;

use fleet_models::ServerStatus;
use serde::Serialize;

pub use health::{HealthCheck, HealthCheckOptions, HttpHealthCheck};

/// A freshly launched server standing in for an original
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplacementServer {
    pub server_id: String,
    pub original_server_id: String,

    /// `role.index` of the original
    pub original_name: String,
    pub role_id: String,
    pub role_name: String,
    pub status: ServerStatus,
    pub ip: Option<String>,

    /// Health check passed; the original may go
    pub ok_to_terminate: bool,
}

impl ReplacementServer {
    pub fn new(
        server_id: impl Into<String>,
        original_server_id: impl Into<String>,
        original_name: impl Into<String>,
        role_id: impl Into<String>,
        role_name: impl Into<String>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            original_server_id: original_server_id.into(),
            original_name: original_name.into(),
            role_id: role_id.into(),
            role_name: role_name.into(),
            status: ServerStatus::Pending,
            ip: None,
            ok_to_terminate: false,
        }
    }

    pub fn is_starting(&self) -> bool {
        self.status.is_booting()
    }
}

/// Per-role counts shown while replacements come up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleProgress {
    pub role_name: String,
    pub booting: usize,
    pub running: usize,
    pub failed: usize,
    pub terminate_ready: usize,
    pub terminated: usize,
}

impl RoleProgress {
    pub fn new(role_name: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            ..Default::default()
        }
    }

    /// Recount from the replacements currently tracked for this role
    pub fn tally<'a>(&mut self, replacements: impl Iterator<Item = &'a ReplacementServer>) {
        self.booting = 0;
        self.running = 0;
        self.failed = 0;
        self.terminate_ready = 0;
        for replacement in replacements.filter(|r| r.role_name == self.role_name) {
            match replacement.status {
                ServerStatus::Running => self.running += 1,
                ServerStatus::Failed => self.failed += 1,
                ServerStatus::Pending | ServerStatus::Booting => self.booting += 1,
                ServerStatus::Terminated => {}
            }
            if replacement.ok_to_terminate {
                self.terminate_ready += 1;
            }
        }
    }
}

impl fmt::Display for RoleProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: booting {}, running {}, failed {}, ready {}, terminated {}",
            self.role_name, self.booting, self.running, self.failed, self.terminate_ready, self.terminated
        )
    }
}
