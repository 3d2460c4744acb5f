pub mod check;
pub mod inspect;
pub mod selftest;

use std::path::Path;

use anyhow::{Context, Result};
use metavault_admin::config::{parse_config, validate_config, AdminConfig};

/// Load and validate the config at `path`, or use the defaults.
pub fn load_config(path: Option<&Path>) -> Result<AdminConfig> {
    let Some(path) = path else {
        return Ok(AdminConfig::default());
    };
    let config = parse_config(path)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_config_path_uses_defaults() {
        assert_eq!(load_config(None).unwrap(), AdminConfig::default());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "version: \"1.0\"\nspec_repo: \"\"").unwrap();
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("spec_repo must not be empty"));
    }
}
