//! # ember-store: persistence and configuration for the Ember pipeline.
//!
//! - [`storage::RocksStore`]: RocksDB implementation of the input and output
//!   store traits, with generation-scoped tables swapped in atomically.
//! - [`config::PipelineConfig`]: layered defaults, TOML file, and `EMBER_`
//!   environment overrides.
//! - [`import`] / [`export`]: JSON-lines transfer of raw datasets and output tables.

pub mod config;
pub mod export;
pub mod import;
pub mod storage;

pub use crate::config::{LogFormat, PipelineConfig};
pub use import::Dataset;
pub use storage::RocksStore;
