//! Error types for QoS resolution.
//!
//! Errors fall in two groups: [`QosError::Unsupported`] means the scenario
//! does not apply to this testbed and the caller should skip it. Every other
//! variant aborts the current scenario.

use sonic_qos_common::HarnessError;
use sonic_qos_types::ParseError;
use thiserror::Error;

/// Result type alias for resolver operations.
pub type QosResult<T> = Result<T, QosError>;

#[derive(Debug, Error)]
pub enum QosError {
    /// Preconditions for the scenario are not met on this testbed.
    #[error("Scenario not supported: {0}")]
    Unsupported(String),

    /// A lossless profile name does not follow the cable-length convention.
    #[error("Cannot classify {device}: {message}")]
    Classification {
        /// Device being classified.
        device: String,
        /// Error message.
        message: String,
    },

    /// Source and destination ports cannot be chosen.
    #[error("Port selection failed: {0}")]
    PortSelection(String),

    /// A bound object lacks fields it must carry.
    #[error("Configuration contract violated at {key}: {message}")]
    ConfigContract {
        /// Offending store key or profile name.
        key: String,
        /// Error message.
        message: String,
    },

    /// A value needed for threshold arithmetic is missing or malformed.
    #[error("Buffer resolution failed at {key}: {message}")]
    BufferResolution {
        /// Offending store key.
        key: String,
        /// Error message.
        message: String,
    },

    /// No port-level profile shares the pool of the entry being resolved.
    #[error("No port profile on {port} uses pool {pool}")]
    MissingPortProfile {
        /// Port whose profile list was searched.
        port: String,
        /// Pool of the PG/queue profile.
        pool: String,
    },

    /// QoS parameter table selection failed.
    #[error("QoS parameter error: {0}")]
    Params(String),

    #[error(transparent)]
    Harness(#[from] HarnessError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl QosError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    pub fn classification(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Classification {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn port_selection(message: impl Into<String>) -> Self {
        Self::PortSelection(message.into())
    }

    pub fn config_contract(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigContract {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn buffer_resolution(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BufferResolution {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn params(message: impl Into<String>) -> Self {
        Self::Params(message.into())
    }

    /// Returns true when the scenario should be skipped rather than failed.
    pub fn is_skip(&self) -> bool {
        matches!(self, QosError::Unsupported(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unsupported_is_skip() {
        assert!(QosError::unsupported("t0").is_skip());
        assert!(!QosError::port_selection("overlap").is_skip());
        assert!(!QosError::classification("dut", "bad name").is_skip());
        assert!(!QosError::from(HarnessError::internal("boom")).is_skip());
    }

    #[test]
    fn test_display_names_offender() {
        let err = QosError::MissingPortProfile {
            port: "Ethernet0".to_string(),
            pool: "egress_lossy_pool".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No port profile on Ethernet0 uses pool egress_lossy_pool"
        );
    }
}
