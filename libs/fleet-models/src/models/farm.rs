//! Farm, role and server records

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a server as reported by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerStatus {
    #[serde(alias = "Pending launch")]
    Pending,

    #[serde(alias = "Initializing")]
    Booting,

    Running,

    Failed,

    #[serde(alias = "Pending terminate")]
    Terminated,
}

impl ServerStatus {
    /// Still on its way to `Running`
    pub fn is_booting(&self) -> bool {
        matches!(self, ServerStatus::Pending | ServerStatus::Booting)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerStatus::Pending => write!(f, "Pending"),
            ServerStatus::Booting => write!(f, "Booting"),
            ServerStatus::Running => write!(f, "Running"),
            ServerStatus::Failed => write!(f, "Failed"),
            ServerStatus::Terminated => write!(f, "Terminated"),
        }
    }
}

/// A server owned by a farm role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    #[serde(rename = "server_id")]
    pub id: String,

    /// Position of the server within its role (1-based)
    pub index: u32,

    pub status: ServerStatus,

    #[serde(default)]
    pub external_ip: Option<String>,

    #[serde(default)]
    pub internal_ip: Option<String>,
}

impl Server {
    pub fn is_running(&self) -> bool {
        self.status == ServerStatus::Running
    }
}

/// A farm role and the servers it currently owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Farm role id
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub servers: Vec<Server>,
}

impl Role {
    /// Servers currently in the `Running` state, in the order reported
    pub fn running_servers(&self) -> impl Iterator<Item = &Server> {
        self.servers.iter().filter(|server| server.is_running())
    }

    /// Find a server of this role by id
    pub fn server(&self, server_id: &str) -> Option<&Server> {
        self.servers.iter().find(|server| server.id == server_id)
    }
}

/// Status of a deployment task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Deploying,
    Deployed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Deploying => write!(f, "deploying"),
            TaskStatus::Deployed => write!(f, "deployed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A remote-tracked "deploy application X to server Y" unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTask {
    #[serde(rename = "deployment_task_id")]
    pub id: String,

    pub server_id: String,

    pub farm_role_id: String,

    pub remote_path: String,

    pub status: TaskStatus,
}

/// A configuration variable defined for a farm or farm role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub name: String,

    #[serde(default)]
    pub value: String,
}
