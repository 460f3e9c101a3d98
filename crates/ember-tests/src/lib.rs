//! End-to-end tests for the Ember pipeline.
//!
//! Tests drive the RocksDB store through the same import, stage, and export
//! paths the `ember` binary uses.

pub mod fixtures;
