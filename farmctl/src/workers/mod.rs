//! Long-running drivers

pub mod deployer;
pub mod poller;
pub mod recycler;

pub use deployer::{DeployMode, Deployer, DeploymentRequest};
pub use poller::ScriptLogPoller;
pub use recycler::{RecycleSummary, ReplacementOrchestrator};
