//! Dynamic threshold to static threshold conversion.
//!
//! A dynamic threshold `dth` lets a queue or PG grow to `alpha / (1 + alpha)`
//! of the free pool, with `alpha = 2^dth`. The harness needs the equivalent
//! absolute byte count to know when drops or pauses should start.

use crate::error::{QosError, QosResult};
use serde::{Deserialize, Serialize};

/// Platforms whose SDK accounts for the port-level alpha as well.
pub const NVIDIA_ALPHA_PLATFORMS: &[&str] = &[
    "x86_64-nvidia_sn5600-r0",
    "x86_64-nvidia_sn5640-r0",
    "x86_64-nvidia_sn5400-r0",
];

/// `dynamic_th` value that the Nvidia SDK maps to alpha 64 instead of 128.
const NVIDIA_MAX_DYNAMIC_TH: &str = "7";
const NVIDIA_MAX_ALPHA: f64 = 64.0;

/// Conversion formula, chosen once per device from its platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThresholdFormula {
    Generic,
    NvidiaAlpha,
}

impl ThresholdFormula {
    pub fn for_platform(platform: &str) -> Self {
        if NVIDIA_ALPHA_PLATFORMS.contains(&platform) {
            ThresholdFormula::NvidiaAlpha
        } else {
            ThresholdFormula::Generic
        }
    }
}

/// Parses a `dynamic_th` attribute. Negative values are valid.
pub fn parse_dynamic_th(value: &str) -> QosResult<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| QosError::buffer_resolution(value, "dynamic_th is not a number"))
}

/// `size + floor(2^dth / (2^dth + 1) * pool_size)`.
///
/// ```
/// use sonic_qos_resolver::buffer::generic_static_threshold;
///
/// assert_eq!(generic_static_threshold(0, 3.0, 1_000_000), Some(888_888));
/// assert_eq!(generic_static_threshold(1000, 0.0, 1_000_000), Some(501_000));
/// assert_eq!(generic_static_threshold(u64::MAX, 0.0, 2), None);
/// ```
///
/// `None` when the sum does not fit in 64 bits.
pub fn generic_static_threshold(size: u64, dynamic_th: f64, pool_size: u64) -> Option<u64> {
    let alpha = 2f64.powf(dynamic_th);
    let scale = alpha / (alpha + 1.0);
    size.checked_add((scale * pool_size as f64) as u64)
}

/// Alpha as programmed by the Nvidia SDK.
pub fn nvidia_alpha(dynamic_th: &str) -> QosResult<f64> {
    if dynamic_th.trim() == NVIDIA_MAX_DYNAMIC_TH {
        Ok(NVIDIA_MAX_ALPHA)
    } else {
        Ok(2f64.powf(parse_dynamic_th(dynamic_th)?))
    }
}

/// Result of the Nvidia conversion, with the intermediate alphas kept for
/// the traffic runner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NvidiaThreshold {
    pub static_th: u64,
    pub pg_q_alpha: f64,
    pub port_alpha: f64,
}

/// Inputs of the Nvidia conversion.
#[derive(Debug, Clone, Copy)]
pub struct NvidiaInputs<'a> {
    /// `dynamic_th` of the PG/queue profile.
    pub entry_dynamic_th: &'a str,
    /// `size` of the PG/queue profile.
    pub entry_size: u64,
    /// `dynamic_th` of the port profile sharing the entry's pool.
    pub port_dynamic_th: &'a str,
    /// `size` of that port profile.
    pub port_size: u64,
    pub pool_size: u64,
}

pub fn nvidia_static_threshold(inputs: NvidiaInputs<'_>) -> QosResult<NvidiaThreshold> {
    let pg_q_alpha = nvidia_alpha(inputs.entry_dynamic_th)?;
    let port_alpha = nvidia_alpha(inputs.port_dynamic_th)?;

    let pg_q_reserved = inputs.port_size as f64 * pg_q_alpha / (1.0 + pg_q_alpha);
    let reserved = if pg_q_reserved > inputs.entry_size as f64 {
        pg_q_reserved
    } else {
        inputs.entry_size as f64
    };

    let entry_is_max = inputs.entry_dynamic_th.trim() == NVIDIA_MAX_DYNAMIC_TH;
    let port_is_max = inputs.port_dynamic_th.trim() == NVIDIA_MAX_DYNAMIC_TH;
    let scale = if entry_is_max && !port_is_max {
        port_alpha / (1.0 + port_alpha)
    } else {
        port_alpha * pg_q_alpha / (port_alpha * pg_q_alpha + pg_q_alpha + 1.0)
    };

    let max_occupancy = (inputs.pool_size as f64 * scale) as u64;
    let static_th = max_occupancy.checked_add(reserved as u64).ok_or_else(|| {
        QosError::buffer_resolution(
            "static_th",
            format!("{} + {} overflows a byte count", max_occupancy, reserved as u64),
        )
    })?;
    Ok(NvidiaThreshold {
        static_th,
        pg_q_alpha,
        port_alpha,
    })
}
