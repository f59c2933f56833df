//! Test infrastructure for the SONiC QoS resolver
//!
//! Provides:
//! - In-memory [`ConfigStore`](sonic_qos_common::ConfigStore) with call accounting
//! - Scripted [`CommandRunner`](sonic_qos_common::CommandRunner)
//! - Buffer table and testbed fixtures
//! - Store verification helpers

pub mod fixtures;
mod memory_store;
mod runner;
mod verification;

pub use fixtures::*;
pub use memory_store::{glob_match, MemoryStore, StoreOp};
pub use runner::ScriptedRunner;
pub use verification::*;
