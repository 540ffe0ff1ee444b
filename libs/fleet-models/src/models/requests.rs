//! Request records for control-plane actions
//!
//! Each action has a fixed set of required inputs. `validate()` reports the
//! ones that are missing so callers can fail before anything is sent.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Required inputs that were empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingInputs(pub Vec<&'static str>);

impl fmt::Display for MissingInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing required input: {}", self.0.join(", "))
    }
}

impl std::error::Error for MissingInputs {}

fn check(inputs: &[(&'static str, &str)]) -> Result<(), MissingInputs> {
    let missing: Vec<_> = inputs
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(MissingInputs(missing))
    }
}

/// Deploy an application to the servers of one farm role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployApplication {
    pub farm_id: String,
    pub farm_role_id: String,
    pub application_id: String,
    pub remote_path: String,

    /// Restrict the deployment to one server of the role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

impl DeployApplication {
    pub fn validate(&self) -> Result<(), MissingInputs> {
        check(&[
            ("farm_id", &self.farm_id),
            ("farm_role_id", &self.farm_role_id),
            ("application_id", &self.application_id),
            ("remote_path", &self.remote_path),
        ])
    }
}

/// Execute a script on every server of a farm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteScript {
    pub farm_id: String,
    pub script_id: String,

    /// Seconds the control plane lets the script run
    pub timeout: u64,

    pub is_async: bool,

    #[serde(default)]
    pub config_variables: BTreeMap<String, String>,
}

impl ExecuteScript {
    pub fn validate(&self) -> Result<(), MissingInputs> {
        check(&[("farm_id", &self.farm_id), ("script_id", &self.script_id)])
    }
}

/// Launch one more server in a farm role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchServer {
    pub farm_id: String,
    pub farm_role_id: String,

    /// Raise the role's max instances so the launch is not refused
    pub increase_max_instances: bool,
}

impl LaunchServer {
    pub fn validate(&self) -> Result<(), MissingInputs> {
        check(&[("farm_id", &self.farm_id), ("farm_role_id", &self.farm_role_id)])
    }
}

/// Terminate one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminateServer {
    pub farm_id: String,
    pub server_id: String,

    /// Lower the role's min instances so the server is not relaunched
    pub decrease_min_instances: bool,
}

impl TerminateServer {
    pub fn validate(&self) -> Result<(), MissingInputs> {
        check(&[("farm_id", &self.farm_id), ("server_id", &self.server_id)])
    }
}

/// Scope to read configuration variables from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableScope {
    pub farm_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farm_role_id: Option<String>,
}
