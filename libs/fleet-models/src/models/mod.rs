//! API models

mod farm;
mod logs;
mod requests;

pub use farm::{DeploymentTask, GlobalVariable, Role, Server, ServerStatus, TaskStatus};
pub use logs::{LogEntry, LogKind, ScriptLogEntry, Severity, SystemLogEntry, TaskLogEntry};
pub use requests::{
    DeployApplication, ExecuteScript, LaunchServer, MissingInputs, TerminateServer,
    VariableScope,
};
