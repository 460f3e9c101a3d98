//! Parametric GEMM model implementing the [`ExposureResponse`] trait.
//!
//! Hazard ratios follow the Burnett et al. (2018) NCD+LRI curve with per-band
//! theta coefficients. Bands under 25 years are pinned to a hazard ratio of 1.

use ember_core::age::AgeGroup;
use ember_core::constants::{
    AGE_BANDS, COUNTERFACTUAL_PM25, GEMM_ALPHA, GEMM_MU, GEMM_NU, GEMM_THETA, OMEGA_CACHE_MAX,
};
use ember_core::traits::ExposureResponse;

use crate::sigmoid::{omega_exact, OmegaCache};

/// Shape parameters of the GEMM curve.
#[derive(Debug, Clone, PartialEq)]
pub struct GemmParams {
    /// Per-band theta, indexed by `band - 1`.
    pub theta: [f64; AGE_BANDS],
    pub alpha: f64,
    pub mu: f64,
    pub nu: f64,
    pub counterfactual: f64,
}

impl Default for GemmParams {
    fn default() -> Self {
        Self {
            theta: GEMM_THETA,
            alpha: GEMM_ALPHA,
            mu: GEMM_MU,
            nu: GEMM_NU,
            counterfactual: COUNTERFACTUAL_PM25,
        }
    }
}

/// The production exposure-response model.
///
/// Owns its [`OmegaCache`], so two models never share cached state.
#[derive(Debug, Clone)]
pub struct GemmModel {
    params: GemmParams,
    omega: OmegaCache,
}

impl GemmModel {
    /// Create a model with the published parameters.
    pub fn new() -> Self {
        Self::with_params(GemmParams::default())
    }

    pub fn with_params(params: GemmParams) -> Self {
        let omega = OmegaCache::new(params.mu, params.nu, OMEGA_CACHE_MAX);
        Self { params, omega }
    }

    pub fn params(&self) -> &GemmParams {
        &self.params
    }

    pub fn theta(&self, age: AgeGroup) -> f64 {
        self.params.theta[age.index()]
    }

    fn hazard_ratio_with(&self, z: f64, age: AgeGroup, omega: f64) -> f64 {
        if !age.has_modelled_effect() {
            return 1.0;
        }
        let log_term = (1.0 + z / self.params.alpha).ln();
        (self.theta(age) * log_term * omega).exp()
    }
}

impl Default for GemmModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ExposureResponse for GemmModel {
    fn counterfactual(&self) -> f64 {
        self.params.counterfactual
    }

    fn hazard_ratio(&self, z: f64, age: AgeGroup) -> f64 {
        self.hazard_ratio_with(z, age, self.omega.omega(z))
    }

    fn hazard_ratio_exact(&self, z: f64, age: AgeGroup) -> f64 {
        self.hazard_ratio_with(z, age, omega_exact(z, self.params.mu, self.params.nu))
    }
}
