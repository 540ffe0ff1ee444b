//! Typed records for the farm control-plane API.
//!
//! Every shape the orchestrator reads from (or sends to) the control plane is
//! declared here with an explicit field mapping, so the client implementation
//! never has to coerce fields dynamically.

pub mod models;

pub use models::*;
