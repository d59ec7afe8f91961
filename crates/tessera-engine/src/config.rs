//! Engine configuration
//!
//! Loaded from TOML. Every field has a default, so an empty document is a
//! valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tessera_core::{ArtifactState, DEFAULT_MAX_UNWRAP_DEPTH};
use tessera_logging::LogConfig;

use crate::error::ConfigError;
use crate::patch::PatchOp;
use crate::serialization::ShowLevel;

/// Settings shared by the repository stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound on proxy layers walked when resolving a dependency
    pub max_unwrap_depth: usize,

    /// Prefix of computed blob download links
    pub download_url_prefix: String,

    /// Dependency expansion used when the caller does not ask for one
    pub default_show_level: ShowLevel,

    /// Patch operations accepted by update handles
    pub allowed_patch_ops: Vec<PatchOp>,

    /// State in which artifacts of types without their own mutability rule
    /// accept writes
    pub mutable_state: ArtifactState,

    pub logging: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_unwrap_depth: DEFAULT_MAX_UNWRAP_DEPTH,
            download_url_prefix: "/artifacts".to_string(),
            default_show_level: ShowLevel::Basic,
            allowed_patch_ops: vec![PatchOp::Add, PatchOp::Replace, PatchOp::Remove],
            mutable_state: ArtifactState::Creating,
            logging: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails [`validate`](Self::validate).
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_unwrap_depth == 0 {
            return Err(ConfigError::Validation(
                "max_unwrap_depth must be at least 1".to_string(),
            ));
        }
        if self.mutable_state == ArtifactState::Deleted {
            return Err(ConfigError::Validation(
                "mutable_state cannot be 'deleted'".to_string(),
            ));
        }
        Ok(())
    }

    /// Download links without a trailing slash
    pub fn url_prefix(&self) -> &str {
        self.download_url_prefix.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(EngineConfig::from_toml("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_partial_document() {
        let config = EngineConfig::from_toml(
            r#"
            max_unwrap_depth = 4
            default_show_level = "direct"
            allowed_patch_ops = ["replace"]

            [logging]
            default_level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_unwrap_depth, 4);
        assert_eq!(config.default_show_level, ShowLevel::Direct);
        assert_eq!(config.allowed_patch_ops, vec![PatchOp::Replace]);
        assert_eq!(config.logging.default_level, "debug");
        assert_eq!(config.download_url_prefix, "/artifacts");
    }

    #[test]
    fn test_validation() {
        let err = EngineConfig::from_toml("max_unwrap_depth = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = EngineConfig::from_toml(r#"mutable_state = "deleted""#).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = EngineConfig::from_toml(r#"allowed_patch_ops = ["move"]"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = EngineConfig::default();
        config.download_url_prefix = "https://example.org/v1/".to_string();
        let text = config.to_toml().unwrap();
        assert_eq!(EngineConfig::from_toml(&text).unwrap(), config);
        assert_eq!(config.url_prefix(), "https://example.org/v1");
    }
}
