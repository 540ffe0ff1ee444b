//! farmctl library
//!
//! Rolling application deployments and server replacement for farms managed
//! by a remote control plane.

pub mod client;
pub mod deploy;
pub mod errors;
pub mod logs;
pub mod recycle;
pub mod storage;
pub mod workers;
