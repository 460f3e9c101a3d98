//! # ember-model: GEMM exposure-response model.
//!
//! Implements the sigmoid-weighted log-linear hazard ratio curve:
//!
//! ```text
//! omega(z)     = 1 / (1 + exp(-(z - mu) / nu))
//! HR(z, age)   = exp(theta[age] * ln(1 + z / alpha) * omega(z))
//! ```
//!
//! - **Omega cache**: the sigmoid term is tabulated for integer concentrations
//!   and owned by each model instance; there is no process-wide cache.
//! - **Age restriction**: bands under 25 years have a hazard ratio of exactly 1.

pub mod gemm;
pub mod sigmoid;

pub use gemm::{GemmModel, GemmParams};
pub use sigmoid::OmegaCache;
