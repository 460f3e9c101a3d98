//! Sigmoid weighting term of the GEMM curve with an integer lookup table.
//!
//! `omega(z) = 1 / (1 + exp(-(z - mu) / nu))`
//!
//! The table holds `omega` for `z = 0, 1, ..., OMEGA_CACHE_MAX`. A lookup rounds
//! `z` to the nearest integer (ties to even) and returns the tabulated value;
//! inputs that round outside the table are evaluated directly. The cache is
//! therefore a step approximation inside the table range, non-decreasing in `z`.

use ember_core::constants::{GEMM_MU, GEMM_NU, OMEGA_CACHE_MAX};

/// Exact sigmoid term.
pub fn omega_exact(z: f64, mu: f64, nu: f64) -> f64 {
    1.0 / (1.0 + (-(z - mu) / nu).exp())
}

/// Precomputed `omega` values for integer concentrations.
///
/// Built once per model; the table is immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct OmegaCache {
    mu: f64,
    nu: f64,
    table: Vec<f64>,
}

impl OmegaCache {
    /// Tabulate `omega` over `0..=max` for the given midpoint and scale.
    pub fn new(mu: f64, nu: f64, max: u32) -> Self {
        let table = (0..=max).map(|z| omega_exact(f64::from(z), mu, nu)).collect();
        Self { mu, nu, table }
    }

    /// Sigmoid term at `z`, served from the table when `z` rounds into it.
    pub fn omega(&self, z: f64) -> f64 {
        let rounded = z.round_ties_even();
        if rounded >= 0.0 && rounded < self.table.len() as f64 {
            self.table[rounded as usize]
        } else {
            omega_exact(z, self.mu, self.nu)
        }
    }

    /// Number of tabulated entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for OmegaCache {
    fn default() -> Self {
        Self::new(GEMM_MU, GEMM_NU, OMEGA_CACHE_MAX)
    }
}
