//! Unified error handling for Inamon
//!
//! This crate provides the single error type used by the core library, the
//! daemon and the operator CLI. Errors fall in two groups: startup errors
//! (configuration and calibration) which stop the process, and per-cycle errors
//! (bus, temperature, storage) which are logged and survived.

use std::io;
use std::path::PathBuf;

/// Result type alias using InamonError
pub type Result<T> = std::result::Result<T, InamonError>;

/// Unified error type for all Inamon operations
#[derive(thiserror::Error, Debug)]
pub enum InamonError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Calibration Errors (fatal at startup)
    // ============================================================================
    #[error("Invalid calibration: {reason}")]
    InvalidCalibration {
        reason: String,
    },

    #[error("Calibration register overflow: {value} does not fit in 1..=65535")]
    CalibrationOverflow {
        value: f64,
    },

    // ============================================================================
    // Hardware Access Errors (recoverable per cycle)
    // ============================================================================
    #[error("Bus transfer failed at 0x{address:02X} register 0x{register:02X}: {reason}")]
    Transport {
        address: u8,
        register: u8,
        reason: String,
    },

    #[error("Failed to read temperature from {path}: {reason}")]
    TemperatureRead {
        path: PathBuf,
        reason: String,
    },

    // ============================================================================
    // Storage Errors (recoverable per cycle)
    // ============================================================================
    #[error("Failed to persist sample: {reason}")]
    Persistence {
        reason: String,
    },

    // ============================================================================
    // Configuration and Settings Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl InamonError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid configuration error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid calibration error
    pub fn invalid_calibration(reason: impl Into<String>) -> Self {
        Self::InvalidCalibration {
            reason: reason.into(),
        }
    }

    /// Create a bus transfer error
    pub fn transport(address: u8, register: u8, reason: impl Into<String>) -> Self {
        Self::Transport {
            address,
            register,
            reason: reason.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::Persistence {
            reason: reason.into(),
        }
    }

    /// Whether the sampling loop may log this error and keep polling.
    ///
    /// Calibration and configuration errors are never recoverable: no device
    /// may be operated with them.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::TemperatureRead { .. }
                | Self::Persistence { .. }
                | Self::Timeout(_)
                | Self::Io(_)
        )
    }
}

// Allow converting from String to InamonError
impl From<String> for InamonError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to InamonError
impl From<&str> for InamonError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_display_includes_address_and_register() {
        let err = InamonError::transport(0x41, 0x02, "nack");
        assert_eq!(
            err.to_string(),
            "Bus transfer failed at 0x41 register 0x02: nack"
        );
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(InamonError::transport(0x40, 0x01, "x").is_recoverable());
        assert!(InamonError::persistence("disk full").is_recoverable());
        assert!(InamonError::Timeout("cycle".into()).is_recoverable());
        assert!(!InamonError::invalid_calibration("lsb").is_recoverable());
        assert!(!InamonError::CalibrationOverflow { value: 70000.0 }.is_recoverable());
        assert!(!InamonError::invalid_config("channels", "empty").is_recoverable());
    }

    #[test]
    fn test_from_str() {
        let err: InamonError = "boom".into();
        assert!(matches!(err, InamonError::Generic(ref s) if s == "boom"));
    }
}
