//! Structured logging setup
//!
//! Built on `tracing-subscriber` with an `EnvFilter`. `RUST_LOG` still works
//! and is combined with the crate level configured here. Output is either
//! human readable or one JSON object per line.
//!
//! ```no_run
//! use vantage::util::logging;
//!
//! // Reads VANTAGE_LOG_LEVEL and VANTAGE_LOG_JSON
//! logging::init_from_env();
//! tracing::info!(project = "shop-api", "Starting assessment");
//! ```

use crate::config::VantageConfig;
use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static INIT: Once = Once::new();

const NOISY_DEPENDENCIES: [&str; 3] = ["h2=warn", "hyper=warn", "reqwest=warn"];

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Minimum level for events from this crate
    pub level: Level,
    /// One JSON object per line instead of the console format
    pub use_json: bool,
    pub include_target: bool,
    /// File and line of the event
    pub include_location: bool,
    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// JSON output with location and thread metadata, for log collectors
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
            include_thread_ids: true,
        }
    }

    pub fn development() -> Self {
        Self::with_level(Level::DEBUG)
    }

    /// Reads `VANTAGE_LOG_LEVEL` and `VANTAGE_LOG_JSON`
    pub fn from_env() -> Self {
        let level = env::var("VANTAGE_LOG_LEVEL")
            .ok()
            .map(|raw| {
                parse_level(&raw).unwrap_or_else(|| {
                    eprintln!(
                        "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                        raw
                    );
                    Level::INFO
                })
            })
            .unwrap_or(Level::INFO);

        let use_json = env::var("VANTAGE_LOG_JSON")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);

        Self {
            level,
            use_json,
            ..Default::default()
        }
    }

    /// Level taken from the loaded configuration; JSON output still comes from the environment
    pub fn from_config(config: &VantageConfig) -> Self {
        let mut logging = Self::from_env();
        if let Some(level) = parse_level(&config.log_level) {
            logging.level = level;
        }
        logging
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::from_default_env();
        if let Ok(directive) = format!("vantage={}", self.level).parse() {
            filter = filter.add_directive(directive);
        }
        if env::var("RUST_LOG").is_err() {
            for raw in NOISY_DEPENDENCIES {
                if let Ok(directive) = raw.parse() {
                    filter = filter.add_directive(directive);
                }
            }
        }
        filter
    }
}

/// Parses a level name, case-insensitively
pub fn parse_level(level_str: &str) -> Option<Level> {
    match level_str.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Installs the global subscriber; later calls are ignored
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = config.env_filter();
        let layer = fmt::layer()
            .with_target(config.include_target)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids);
        let layer = if config.use_json {
            layer.json().boxed()
        } else {
            layer.boxed()
        };

        let result = tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init();

        if let Err(e) = result {
            eprintln!("Logging already initialized elsewhere: {}", e);
        }
    });
}

pub fn init_default() {
    init_logging(LoggingConfig::default());
}

pub fn init_from_env() {
    init_logging(LoggingConfig::from_env());
}
