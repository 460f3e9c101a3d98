//! # ember-engine: burden attribution and decomposition.
//!
//! The pipeline runs in three steps:
//!
//! 1. [`index::LookupIndex`] loads every raw dataset once into read-only maps.
//! 2. [`attribution::AttributionEngine`] computes excess deaths and YLL for each
//!    county-year-band under the model, bootstrap, and precomputed methods.
//! 3. [`decomposition::DecompositionEngine`] splits the change in burden between
//!    two years into population growth, ageing, baseline mortality, and exposure.
//!
//! Output is written through [`persistence::BatchWriter`], which stages every
//! row and swaps the table in only once the whole stage succeeds.

pub mod attribution;
pub mod bins;
pub mod decomposition;
pub mod index;
pub mod persistence;
pub mod pipeline;
pub mod validate;

pub use attribution::{AttributionEngine, AttributionStats};
pub use decomposition::{DecompositionEngine, DecompositionStats};
pub use index::{LoadReport, LookupIndex};
pub use pipeline::{run_attribution, run_decomposition, switch_canonical, StageReport};
pub use validate::{validate, ValidationReport};
