//! Error types for the engine layer
//!
//! Core failure families (validation, schema, path, dependency, plugin) come
//! from `tessera-core`; this module adds the collaborator errors and the
//! umbrella [`EngineError`].

use std::io;

use thiserror::Error;

pub use tessera_core::{DependencyError, PathError, PluginError, SchemaDefinitionError, ValidationError};

/// Errors raised by the persistence collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("artifact '{0}' not found")]
    NotFound(String),

    #[error("artifact '{0}' already exists")]
    Duplicate(String),

    #[error("operation forbidden: {0}")]
    Forbidden(String),

    #[error("stored artifact '{id}' does not match its schema: {message}")]
    Corrupt { id: String, message: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl RepositoryError {
    pub fn corrupt(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by the blob storage collaborator
#[derive(Debug, Error)]
pub enum BlobStorageError {
    #[error("no blob data at '{0}'")]
    NotFound(String),

    #[error("no storage backend serves '{0}'")]
    UnsupportedBackend(String),

    #[error("storage backend refuses to delete '{0}'")]
    DeleteNotSupported(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while loading engine configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Any failure surfaced by the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Schema(#[from] SchemaDefinitionError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Storage(#[from] BlobStorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Short machine-readable name of the failure family
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Schema(_) => "schema_definition",
            EngineError::Path(_) => "path",
            EngineError::Dependency(_) => "dependency",
            EngineError::Plugin(_) => "plugin",
            EngineError::Repository(_) => "repository",
            EngineError::Storage(_) => "storage",
            EngineError::Config(_) => "config",
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
