//! Semantic validation for parsed admin configuration values.

use anyhow::{bail, Result};

use crate::config::types::{AdminConfig, CONFIG_VERSION};

/// Validate a parsed admin configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing every validation failure found.
pub fn validate_config(config: &AdminConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != CONFIG_VERSION {
        errors.push(format!(
            "Unsupported config version '{}', expected '{CONFIG_VERSION}'",
            config.version
        ));
    }

    if config.spec_repo.trim().is_empty() {
        errors.push("spec_repo must not be empty".to_string());
    }

    if !(1..=22).contains(&config.compression.zstd_level) {
        errors.push(format!(
            "compression.zstd_level must be between 1 and 22, got {}",
            config.compression.zstd_level
        ));
    }

    if config.limits.max_record_bytes == 0 {
        errors.push("limits.max_record_bytes must be at least 1".to_string());
    }

    if config.transport.channel_capacity == 0 {
        errors.push("transport.channel_capacity must be at least 1".to_string());
    }

    if config.object_store.local_root.as_os_str().is_empty() {
        errors.push("object_store.local_root must not be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Config validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_config_str;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AdminConfig::default()).is_ok());
    }

    #[test]
    fn test_wrong_version_fails() {
        let config = parse_config_str("version: \"2.0\"\n").unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("Unsupported config version"));
    }

    #[test]
    fn test_zero_limits_fail() {
        let config = parse_config_str(
            "limits:\n  max_record_bytes: 0\ntransport:\n  channel_capacity: 0\n",
        )
        .unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("max_record_bytes"));
        assert!(err.contains("channel_capacity"));
    }

    #[test]
    fn test_zstd_level_out_of_range_fails() {
        let config = parse_config_str("compression:\n  zstd_level: 40\n").unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("zstd_level"));
    }

    #[test]
    fn test_all_errors_reported_together() {
        let config = parse_config_str("version: \"0.9\"\nspec_repo: \"  \"\n").unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("Unsupported config version"));
        assert!(err.contains("spec_repo must not be empty"));
    }
}
