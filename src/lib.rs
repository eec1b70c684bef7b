//! Polling agents that run `sar`, `pidstat` or `vmware-toolbox-cmd`, parse their
//! text output and write one timestamped JSON snapshot per collection cycle.

pub mod collectors;
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod snapshot;
