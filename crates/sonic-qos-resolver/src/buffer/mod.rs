//! Buffer profile and threshold resolution.

mod profile;
mod threshold;

pub use profile::{resolve_buffer_profile, BufferProfile};
pub use threshold::{
    generic_static_threshold, nvidia_alpha, nvidia_static_threshold, parse_dynamic_th,
    NvidiaInputs, NvidiaThreshold, ThresholdFormula, NVIDIA_ALPHA_PLATFORMS,
};
