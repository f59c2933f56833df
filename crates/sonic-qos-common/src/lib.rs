//! Shared infrastructure for the SONiC QoS test harness.
//!
//! The resolver never talks to a switch directly. It goes through two
//! collaborator seams defined here:
//!
//! - [`ConfigStore`]: HGET/HGETALL/KEYS/HSET against one ASIC's databases,
//!   backed by [`RedisStore`] or by [`CliStore`] (redis-cli over a shell)
//! - [`CommandRunner`]: shell commands on a host, see [`shell`]
//!
//! plus [`pool::run_bounded`] for fanning out per-device setup and teardown,
//! and the [`HarnessError`] type shared by all of them.

pub mod cli_store;
pub mod error;
pub mod pool;
pub mod redis_store;
pub mod shell;
pub mod store;

pub use cli_store::CliStore;
pub use error::{HarnessError, HarnessResult};
pub use pool::{run_bounded, DEFAULT_MAX_WORKERS};
pub use redis_store::{RedisConfig, RedisStore};
pub use shell::{CommandRunner, ExecResult, LocalShell};
pub use store::{ConfigStore, DbId, FieldValues};
