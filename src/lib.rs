//! TASQUE: a zero-configuration, single-node workload manager.
//!
//! See `DESIGN.md` for the grounding ledger behind each module.

pub mod client;
pub mod daemonize;
pub mod defs;
pub mod error;
pub mod logging;
pub mod resource;
pub mod store;
pub mod supervisor;
pub mod task;
pub mod util;
pub mod worker;

pub use error::{Result, TasqueError};
