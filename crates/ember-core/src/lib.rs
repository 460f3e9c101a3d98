//! # ember-core
//! Foundation types, constants, and store traits for the Ember burden pipeline.

pub mod age;
pub mod constants;
pub mod error;
pub mod store;
pub mod traits;
pub mod types;
