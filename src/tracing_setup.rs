//! Tracing Infrastructure
//!
//! Installs the global `tracing-subscriber` from [`Tc200Config`]:
//! - `log_level` sets the default filter, `RUST_LOG` overrides it
//! - `log_format` picks pretty, compact or JSON output
//! - at `debug` and below, driver spans report their duration on close, which shows how
//!   long each transaction took
//!
//! Raw echo/response bytes are logged at `trace`, transactions at `debug`, state changes at
//! `info` and the `mode=normal` firmware quirk at `warn`.
//!
//! # Example
//! ```no_run
//! use tc200::{config::Tc200Config, tracing_setup};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Tc200Config::load()?;
//! tracing_setup::init_from_config(&config)?;
//! tracing::info!("ready");
//! # Ok(())
//! # }
//! ```

use crate::config::Tc200Config;
use crate::error::{AppResult, Tc200Error};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log output format, `log_format` in the configuration file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line with source locations, for interactive debugging
    Pretty,
    /// One line per event, for long stability waits
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// Subscriber settings derived from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Colorize text output
    pub ansi: bool,
}

impl TracingConfig {
    /// Settings for `config`; colors only when stderr is a terminal.
    pub fn from_config(config: &Tc200Config) -> AppResult<Self> {
        Ok(Self {
            level: parse_log_level(&config.log_level)?,
            format: config.log_format,
            ansi: std::io::stderr().is_terminal(),
        })
    }

    fn span_events(&self) -> FmtSpan {
        if self.level >= Level::DEBUG {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level).into())
            .from_env_lossy()
    }
}

/// Install the global subscriber described by `config`.
pub fn init_from_config(config: &Tc200Config) -> AppResult<()> {
    init(TracingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// Returns `Ok(())` without changes if a subscriber is already installed, e.g. by another
/// test in the same process.
pub fn init(config: TracingConfig) -> AppResult<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(config.span_events());

    let layer = match config.format {
        OutputFormat::Pretty => base
            .pretty()
            .with_ansi(config.ansi)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        OutputFormat::Compact => base.compact().with_ansi(config.ansi).boxed(),
        OutputFormat::Json => base.json().with_ansi(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(config.env_filter()))
        .try_init()
        .map_err(|e| Tc200Error::Configuration(format!("failed to initialize tracing: {e}")))
}

/// Parse a level name (`trace`, `debug`, `info`, `warn`, `error`), case-insensitively.
pub fn parse_log_level(level: &str) -> AppResult<Level> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(Tc200Error::Configuration(format!(
            "invalid log level '{level}', expected trace, debug, info, warn or error"
        ))),
    }
}
