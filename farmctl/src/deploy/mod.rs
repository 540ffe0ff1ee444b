//! Deployment tracking
//!
//! One [`monitor::DeploymentMonitor`] per role, one
//! [`server::ServerDeployment`] per running server, each with its own
//! [`log_sink::LogSink`].

pub mod failure;
pub mod fsm;
pub mod log_sink;
pub mod monitor;
pub mod report;
pub mod server;

pub use fsm::DeploymentState;
pub use monitor::{DeploymentMonitor, MonitorOptions};
pub use report::{DeploymentOutcome, Verdict};
pub use server::ServerDeployment;
