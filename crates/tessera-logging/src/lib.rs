//! Structured JSONL logging for Tessera
//!
//! This crate provides the logging setup shared by the Tessera crates.
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines format for log aggregation (default)
//! - **Request Context Injection**: Request id, owner and artifact id on every span
//! - **File Rotation**: Daily/hourly log rotation via tracing-appender
//!
//! # Quick Start
//!
//! ```ignore
//! use tessera_logging::{TesseraSubscriberBuilder, LogConfig};
//!
//! // Simple setup with defaults (JSONL to console)
//! let _guard = TesseraSubscriberBuilder::new().init();
//!
//! // Development mode with pretty human-readable output
//! let _guard = TesseraSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```
//!
//! # Request Context
//!
//! Use [`RequestContextGuard`] to tag a scope:
//!
//! ```ignore
//! use tessera_logging::RequestContextGuard;
//!
//! let _request = RequestContextGuard::new(Some("tenant-a"));
//! let _artifact = RequestContextGuard::for_artifact("0b7c...");
//! tracing::info!("Publishing artifact");
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleConfig, ConsoleFormat, FileConfig, JsonFields, LogConfig, RotationStrategy};
pub use context::{RequestContextData, RequestContextGuard};
pub use layers::{RequestContextExtension, RequestContextLayer};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs;
use std::io;

use thiserror::Error;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid filter directive: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Log file error: {0}")]
    Io(#[from] io::Error),

    #[error("Log file appender error: {0}")]
    Appender(#[from] InitError),

    #[error("Subscriber already installed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Builder for configuring and initializing the Tessera logging subscriber
///
/// Console output is JSON lines unless the configuration picks the pretty or
/// compact format; see [`LogConfig::development`].
#[derive(Debug, Default)]
pub struct TesseraSubscriberBuilder {
    config: LogConfig,
}

impl TesseraSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// The configuration this builder will install
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Build the env filter: `RUST_LOG` wins over the configured directives
    pub fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => Ok(EnvFilter::try_new(self.config.filter_directives())?),
        }
    }

    /// Install the subscriber globally
    ///
    /// Returns the worker guard of the file writer, which must be kept alive
    /// for as long as file output is wanted.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = self.env_filter()?;
        let json = &self.config.json;
        let console = &self.config.console;
        let console_format = console.enabled.then_some(console.format);

        let json_console = (console_format == Some(ConsoleFormat::Json)).then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(json.span_list)
                .flatten_event(json.flatten_events)
                .with_file(json.location)
                .with_line_number(json.location)
        });
        let pretty_console = (console_format == Some(ConsoleFormat::Pretty))
            .then(|| tracing_subscriber::fmt::layer().pretty().with_ansi(console.ansi));
        let compact_console = (console_format == Some(ConsoleFormat::Compact))
            .then(|| tracing_subscriber::fmt::layer().compact().with_ansi(console.ansi));

        let (file_layer, guard) = match &self.config.file {
            Some(file_config) => {
                let (writer, guard) = create_file_writer(file_config)?;
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(json.span_list)
                    .flatten_event(json.flatten_events)
                    .with_file(json.location)
                    .with_line_number(json.location)
                    .with_writer(writer);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        Registry::default()
            .with(env_filter)
            .with(self.config.request_context.then(RequestContextLayer::new))
            .with(json_console)
            .with(pretty_console)
            .with(compact_console)
            .with(file_layer)
            .try_init()?;

        Ok(guard)
    }

    /// Install the subscriber, reporting failures on stderr
    ///
    /// A second installation in the same process is reported and ignored.
    pub fn init(self) -> Option<WorkerGuard> {
        self.try_init().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to initialize logging: {}", e);
            None
        })
    }
}

/// Non-blocking writer over `<directory>/<prefix>[.<date>].jsonl`
fn create_file_writer(file_config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&file_config.directory)?;
    let rotation = match file_config.rotation {
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
        RotationStrategy::Never => Rotation::NEVER,
    };
    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&file_config.prefix)
        .filename_suffix("jsonl");
    if let Some(max_files) = file_config.max_files {
        builder = builder.max_log_files(max_files);
    }
    Ok(tracing_appender::non_blocking(builder.build(&file_config.directory)?))
}

/// Initialize with default configuration (JSONL to console)
pub fn init_default() -> Option<WorkerGuard> {
    TesseraSubscriberBuilder::new().init()
}

/// Initialize with development configuration (pretty output)
pub fn init_development() -> Option<WorkerGuard> {
    TesseraSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize with testing configuration (minimal output)
///
/// Safe to call from many tests; only the first call installs.
pub fn init_testing() {
    let _ = TesseraSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
