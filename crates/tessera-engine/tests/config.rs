//! Loading engine configuration from disk

use std::io::Write;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use tessera_core::ArtifactState;
use tessera_engine::{ArtifactEngine, ConfigError, EngineConfig, EngineError, PatchOp, ShowLevel};
use tessera_logging::{ConsoleFormat, LoggingError};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        r#"
        max_unwrap_depth = 3
        download_url_prefix = "https://files.example.org/"
        default_show_level = "transitive"
        allowed_patch_ops = ["add", "replace"]
        mutable_state = "active"

        [logging]
        default_level = "warn"

        [logging.console]
        format = "pretty"

        [logging.file]
        directory = "/var/log/tessera"

        [logging.targets]
        "tessera_engine::patch" = "trace"
        "#,
    );

    let config = EngineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.max_unwrap_depth, 3);
    assert_eq!(config.url_prefix(), "https://files.example.org");
    assert_eq!(config.default_show_level, ShowLevel::Transitive);
    assert_eq!(config.allowed_patch_ops, vec![PatchOp::Add, PatchOp::Replace]);
    assert_eq!(config.mutable_state, ArtifactState::Active);

    assert_eq!(config.logging.default_level, "warn");
    assert_eq!(config.logging.console.format, ConsoleFormat::Pretty);
    let file_config = config.logging.file.as_ref().unwrap();
    assert_eq!(file_config.directory, PathBuf::from("/var/log/tessera"));
    assert_eq!(file_config.prefix, "tessera");
    assert_eq!(
        config.logging.targets.get("tessera_engine::patch").map(String::as_str),
        Some("trace")
    );
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = EngineConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_invalid_file_rejected() {
    let file = write_config("max_unwrap_depth = \"deep\"");
    let err = EngineConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_written_config_reloads() {
    let config = EngineConfig {
        default_show_level: ShowLevel::Direct,
        allowed_patch_ops: vec![PatchOp::Remove],
        ..EngineConfig::default()
    };
    let file = write_config(&config.to_toml().unwrap());
    assert_eq!(EngineConfig::from_file(file.path()).unwrap(), config);
}

#[test]
fn test_engine_uses_loaded_config() {
    let file = write_config("max_unwrap_depth = 2\ndownload_url_prefix = \"/files\"");
    let engine = ArtifactEngine::in_memory(EngineConfig::from_file(file.path()).unwrap()).unwrap();
    assert_eq!(engine.config().max_unwrap_depth, 2);
    assert_eq!(engine.config().url_prefix(), "/files");

    let invalid = EngineConfig {
        mutable_state: ArtifactState::Deleted,
        ..EngineConfig::default()
    };
    assert!(matches!(ArtifactEngine::in_memory(invalid), Err(EngineError::Config(_))));
}

#[test]
fn test_engine_installs_configured_logging() {
    let file = write_config(
        r#"
        [logging]
        default_level = "warn"
        request_context = false

        [logging.console]
        format = "compact"
        "#,
    );
    let engine = ArtifactEngine::in_memory(EngineConfig::from_file(file.path()).unwrap()).unwrap();

    // Only test in this binary that touches the global subscriber
    let guard = engine.init_logging().unwrap();
    assert!(guard.is_none());
    assert!(matches!(engine.init_logging(), Err(LoggingError::Init(_))));
}
