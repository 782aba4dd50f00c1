//! YAML configuration loading.

use std::path::Path;

use super::error::ConfigError;
use super::types::ReconConfig;

/// Loads and validates `recon.yaml`.
pub struct YamlLoader;

impl YamlLoader {
    /// Load configuration from a file.
    pub fn load_config(path: impl AsRef<Path>) -> Result<ReconConfig, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse_config(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn parse_config(yaml: &str) -> Result<ReconConfig, ConfigError> {
        // An empty file is an empty mapping, not a parse error.
        if yaml.trim().is_empty() {
            return Ok(ReconConfig::default());
        }
        let config: ReconConfig = serde_yaml::from_str(yaml)?;
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Validate a parsed configuration.
    pub fn validate_config(config: &ReconConfig) -> Result<(), ConfigError> {
        if config.threads == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "threads must be at least 1".into(),
            ));
        }
        if config.invocation_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "invocation_timeout_secs must be at least 1".into(),
            ));
        }
        if config.tools.nmap.trim().is_empty() {
            return Err(ConfigError::MissingField("tools.nmap".into()));
        }
        if config.tools.searchsploit.trim().is_empty() {
            return Err(ConfigError::MissingField("tools.searchsploit".into()));
        }
        Ok(())
    }
}
