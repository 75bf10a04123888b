//! Distributed test harness for Cassandra clusters.
//!
//! The harness provisions one ad hoc cluster per test through an external
//! cluster manager (`ccm`), hands out driver sessions that wait for the
//! cluster to start serving, runs background validation loops, batches
//! scenario variants, and scans node logs for unexpected errors at teardown.

mod constants;
mod errors;
pub mod assertions;
pub mod cluster;
pub mod config;
pub mod harness;
pub mod logging;
pub mod retry;
pub mod runner;
pub mod scenario;
pub mod session;
pub mod utils;

pub use crate::constants::*;
pub use crate::errors::*;

pub use crate::assertions::*;
pub use crate::cluster::*;
pub use crate::config::*;
pub use crate::harness::*;
pub use crate::retry::*;
pub use crate::runner::*;
pub use crate::scenario::*;
pub use crate::session::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
