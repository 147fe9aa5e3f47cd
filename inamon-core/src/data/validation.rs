//! Input validation for settings and storage identifiers
//!
//! Everything that ends up in a device address, an SQL identifier, or a log
//! line is checked here before it is used.

use std::path::Path;

use crate::constants::{device, limits, storage};
use crate::error::{InamonError, Result};

/// Validates a device address is one the INA219 can be strapped to
pub fn validate_address(address: u8) -> Result<u8> {
    if !(device::MIN_ADDRESS..=device::MAX_ADDRESS).contains(&address) {
        return Err(InamonError::invalid_config(
            "address",
            format!(
                "0x{:02X} is outside 0x{:02X}-0x{:02X}",
                address,
                device::MIN_ADDRESS,
                device::MAX_ADDRESS
            ),
        ));
    }
    Ok(address)
}

/// Validates a table name for use as an unquoted SQL identifier
///
/// Only ASCII letters, digits and underscores are accepted and the first
/// character must not be a digit. The name is interpolated, quoted, into DDL
/// and INSERT statements, so nothing else may pass.
pub fn validate_table_name(name: &str) -> Result<&str> {
    if name.is_empty() {
        return Err(InamonError::invalid_config("storage.table", "cannot be empty"));
    }

    if name.len() > storage::MAX_TABLE_NAME_LEN {
        return Err(InamonError::invalid_config(
            "storage.table",
            format!(
                "exceeds maximum length of {} characters",
                storage::MAX_TABLE_NAME_LEN
            ),
        ));
    }

    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(InamonError::invalid_config(
            "storage.table",
            format!("{:?} is not a plain identifier", name),
        ));
    }

    Ok(name)
}

/// Validates a channel or watch name for display and logging
pub fn validate_name(field: &str, name: &str) -> Result<()> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(InamonError::invalid_config(field, "name cannot be empty"));
    }

    if trimmed.len() > limits::MAX_NAME_LEN {
        return Err(InamonError::invalid_config(
            field,
            format!("name exceeds maximum length of {} characters", limits::MAX_NAME_LEN),
        ));
    }

    if !trimmed
        .chars()
        .all(|c| c.is_alphanumeric() || c == ' ' || c == '-' || c == '_')
    {
        return Err(InamonError::invalid_config(
            field,
            format!("{:?} contains invalid characters", name),
        ));
    }

    Ok(())
}

/// Validates a configured number is finite
pub fn validate_finite(field: &str, value: f64) -> Result<f64> {
    if !value.is_finite() {
        return Err(InamonError::invalid_config(field, format!("{} is not finite", value)));
    }
    Ok(value)
}

/// Validates settings file size
pub fn validate_file_size(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|e| InamonError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    if metadata.len() > limits::MAX_SETTINGS_SIZE {
        return Err(InamonError::config(format!(
            "settings file exceeds maximum size of {} bytes",
            limits::MAX_SETTINGS_SIZE
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address() {
        assert!(validate_address(0x40).is_ok());
        assert!(validate_address(0x4F).is_ok());
        assert!(validate_address(0x3F).is_err());
        assert!(validate_address(0x50).is_err());
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("STC_BAT_dades").is_ok());
        assert!(validate_table_name("_samples2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("2samples").is_err());
        assert!(validate_table_name("samples; DROP TABLE x").is_err());
        assert!(validate_table_name("sam\"ples").is_err());
        assert!(validate_table_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("channel", "RB_Pi").is_ok());
        assert!(validate_name("channel", "Solar 1").is_ok());
        assert!(validate_name("channel", "   ").is_err());
        assert!(validate_name("channel", "a/b").is_err());
        assert!(validate_name("channel", &"x".repeat(33)).is_err());
    }

    #[test]
    fn test_validate_finite() {
        assert_eq!(validate_finite("offset", 0.18).unwrap(), 0.18);
        assert!(validate_finite("offset", f64::NAN).is_err());
        assert!(validate_finite("offset", f64::INFINITY).is_err());
    }
}
