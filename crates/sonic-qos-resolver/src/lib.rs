//! Topology-aware test port and buffer threshold resolution for SONiC QoS
//! tests.
//!
//! Given a testbed and a scenario tag, the resolver decides which ports on
//! which ASICs send and receive test traffic, then reads the buffer and
//! scheduler configuration bound to those ports and turns it into the
//! numbers the traffic runner checks against.
//!
//! # Modules
//!
//! - [`topology`]: testbed shape and long-link classification
//! - [`selector`]: source/destination ASIC choice per [`SelectionCriterion`]
//! - [`test_ports`]: candidate test ports and the final port choice
//! - [`buffer`]: buffer profile lookup and dynamic threshold conversion
//! - [`scheduler`], [`headroom`]: scheduler weights and shared headroom
//! - [`params`]: baseline parameter table per vendor
//! - [`services`]: quiescing switch services around a scenario
//! - [`orchestrator`]: all of the above for one scenario
//!
//! Infeasible scenarios surface as [`QosError::Unsupported`]; check
//! [`QosError::is_skip`] before treating an error as a failure.

pub mod buffer;
pub mod client;
pub mod config;
pub mod dualtor;
pub mod error;
pub mod headroom;
pub mod interfaces;
pub mod orchestrator;
pub mod params;
pub mod scheduler;
pub mod selector;
pub mod services;
pub mod tables;
pub mod test_ports;
pub mod topology;

pub use buffer::{resolve_buffer_profile, BufferProfile};
pub use client::{AsicContext, BufferScheme, BufferTableKind, ConfigDbClient, DutHandles};
pub use config::{load_testbed, HarnessOptions, QosParamFile};
pub use error::{QosError, QosResult};
pub use orchestrator::{ParameterBundle, QosResolver};
pub use params::{ParamStrategy, QosParamSet};
pub use scheduler::{resolve_scheduler, SchedulerProfile, WrrOverride, WrrWeights};
pub use selector::{PortAsicSelector, ResolvedTopology, SelectionCriterion};
pub use services::{DualTorPair, ServiceController, ServiceTarget};
pub use test_ports::{build_test_ports, collect_port_maps, PortMaps, TestPortBundle};
pub use topology::{classify_testbed_topology, is_long_link, TopologyClass};
