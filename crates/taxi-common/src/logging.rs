//! Logging configuration and initialization
//!
//! Centralized tracing setup for the pipeline binaries. Supports console
//! and/or daily-rotated file output, text or JSON formats, and env-based
//! overrides. Library code uses the structured macros (`info!`, `warn!`,
//! `error!`) exclusively; `println!` is reserved for tests.
//!
//! # Example
//!
//! ```no_run
//! use taxi_common::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::from_env();
//! init_logging(&config).unwrap();
//! ```

use crate::error::{Result, TaxiError};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to a tracing Level
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = TaxiError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(TaxiError::Logging(format!("invalid log level: {}", s))),
        }
    }
}

/// Output target for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    fn console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl std::str::FromStr for LogOutput {
    type Err = TaxiError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(TaxiError::Logging(format!("invalid log output: {}", s))),
        }
    }
}

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = TaxiError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(TaxiError::Logging(format!("invalid log format: {}", s))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Output target (console, file, or both)
    pub output: LogOutput,
    /// Log format (text or JSON)
    pub format: LogFormat,
    /// Directory for rotated log files
    pub log_dir: PathBuf,
    /// Log file name prefix, e.g. "taxi-pipeline" -> "taxi-pipeline.2026-08-29.log"
    pub log_file_prefix: String,
    /// Additional filter directives, e.g. "sqlx=warn,mongodb=warn"
    pub filter_directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "taxi-pipeline".to_string(),
            filter_directives: None,
        }
    }
}

impl LogConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    ///
    /// Recognized variables: `TAXI_LOG_LEVEL`, `TAXI_LOG_OUTPUT`,
    /// `TAXI_LOG_FORMAT`, `TAXI_LOG_DIR`, `TAXI_LOG_FILE_PREFIX`,
    /// `TAXI_LOG_FILTER`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(level) = env_parse("TAXI_LOG_LEVEL") {
            config.level = level;
        }
        if let Some(output) = env_parse("TAXI_LOG_OUTPUT") {
            config.output = output;
        }
        if let Some(format) = env_parse("TAXI_LOG_FORMAT") {
            config.format = format;
        }
        if let Ok(dir) = std::env::var("TAXI_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Ok(prefix) = std::env::var("TAXI_LOG_FILE_PREFIX") {
            config.log_file_prefix = prefix;
        }
        if let Ok(filter) = std::env::var("TAXI_LOG_FILTER") {
            config.filter_directives = Some(filter);
        }

        config
    }

    /// Override the log level, keeping everything else.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize the global tracing subscriber.
///
/// Call once at startup; a second call returns a `Logging` error.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let mut filter =
        EnvFilter::from_default_env().add_directive(config.level.to_tracing_level().into());

    if let Some(ref directives) = config.filter_directives {
        for directive in directives.split(',') {
            let parsed = directive
                .parse()
                .map_err(|e| TaxiError::Logging(format!("bad filter directive: {}", e)))?;
            filter = filter.add_directive(parsed);
        }
    }

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.output.console() {
        let layer = fmt::layer().with_writer(std::io::stdout);
        layers.push(match config.format {
            LogFormat::Text => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        });
    }

    if config.output.file() {
        std::fs::create_dir_all(&config.log_dir)?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        // The guard flushes on drop; it must live as long as the process.
        std::mem::forget(guard);

        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        layers.push(match config.format {
            LogFormat::Text => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| TaxiError::Logging(e.to_string()))
}
