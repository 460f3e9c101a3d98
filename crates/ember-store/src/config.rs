//! Pipeline configuration.
//!
//! Sources, later overriding earlier: built-in defaults, an optional TOML
//! file, then `EMBER_` environment variables (`__` separates nested keys, so
//! `EMBER_BASELINE__SOURCE` sets `baseline.source`).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ember_core::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_DECOMPOSITION_END, DEFAULT_DECOMPOSITION_START,
};
use ember_core::error::BurdenError;
use ember_core::types::BaselineSelection;
use serde::{Deserialize, Serialize};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = BurdenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(BurdenError::Config(format!(
                "unknown log format {other:?} (expected text or json)"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Settings shared by every pipeline command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "ember_engine=debug").
    pub log_level: String,
    pub log_format: LogFormat,
    /// Records accumulated before each store write.
    pub batch_size: usize,
    pub start_year: u16,
    pub end_year: u16,
    /// Baseline mortality rows feeding both engines.
    pub baseline: BaselineSelection,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ember");

        Self {
            data_dir,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            batch_size: DEFAULT_BATCH_SIZE,
            start_year: DEFAULT_DECOMPOSITION_START,
            end_year: DEFAULT_DECOMPOSITION_END,
            baseline: BaselineSelection::default(),
        }
    }
}

impl PipelineConfig {
    /// Load defaults, then `file` if given, then the environment.
    ///
    /// A missing `file` is an error; the process environment is always optional.
    pub fn load(file: Option<&Path>) -> Result<Self, BurdenError> {
        Self::load_with_env(file, std::env::vars())
    }

    /// As [`PipelineConfig::load`], reading overrides from `vars` instead of
    /// the process environment.
    pub fn load_with_env<I>(file: Option<&Path>, vars: I) -> Result<Self, BurdenError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env: ::config::Map<String, String> = vars
            .into_iter()
            .filter(|(k, _)| k.starts_with("EMBER_"))
            .collect();

        let mut builder = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Self::default()).map_err(config_err)?);
        if let Some(path) = file {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("EMBER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(env)),
        );

        let cfg: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_err)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings no run could use.
    pub fn validate(&self) -> Result<(), BurdenError> {
        if self.batch_size == 0 {
            return Err(BurdenError::Config("batch_size must be positive".into()));
        }
        if self.start_year >= self.end_year {
            return Err(BurdenError::Config(format!(
                "start_year {} must precede end_year {}",
                self.start_year, self.end_year
            )));
        }
        Ok(())
    }

    /// Path to the RocksDB database directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("burden.db")
    }
}

fn config_err(e: ::config::ConfigError) -> BurdenError {
    BurdenError::Config(e.to_string())
}
