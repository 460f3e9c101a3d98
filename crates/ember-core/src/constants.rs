//! Model and pipeline constants. Concentrations are in µg/m³.

/// Number of five-year age bands (1 = 0-4 years, ..., 18 = 85+ years).
pub const AGE_BANDS: usize = 18;

/// Population rows use this band to carry the all-ages total.
pub const ALL_AGES_BAND: u8 = 0;

/// Counterfactual PM2.5 concentration subtracted before evaluating the curve.
pub const COUNTERFACTUAL_PM25: f64 = 2.4;

/// GEMM curve shape: `ln(1 + z / alpha)`.
pub const GEMM_ALPHA: f64 = 1.6;

/// GEMM sigmoid midpoint.
pub const GEMM_MU: f64 = 15.5;

/// GEMM sigmoid scale.
pub const GEMM_NU: f64 = 36.8;

/// First age band (25-29 years) for which the parametric curve applies.
///
/// Younger bands are assigned a hazard ratio of exactly 1.
pub const GEMM_MIN_EFFECT_BAND: u8 = 6;

/// Per-band GEMM theta coefficients (NCD+LRI), indexed by `band - 1`.
///
/// Bands 1-4 and 17 are extrapolated from their neighbours.
pub const GEMM_THETA: [f64; AGE_BANDS] = [
    0.1430, // 0-4
    0.1430, // 5-9
    0.1430, // 10-14
    0.1430, // 15-19
    0.1430, // 20-24
    0.1585, // 25-29
    0.1577, // 30-34
    0.1570, // 35-39
    0.1558, // 40-44
    0.1532, // 45-49
    0.1499, // 50-54
    0.1462, // 55-59
    0.1421, // 60-64
    0.1374, // 65-69
    0.1319, // 70-74
    0.1253, // 75-79
    0.1141, // 80-84
    0.1141, // 85+
];

/// Remaining life expectancy in years at the start of each band, indexed by `band - 1`.
pub const LIFE_EXPECTANCY: [f64; AGE_BANDS] = [
    75.8, 71.0, 66.0, 61.1, 56.4, 51.7, 47.1, 42.5, 38.0, 33.6, 29.2, 25.1, 21.2, 17.5, 14.0,
    10.7, 7.9, 3.9,
];

/// Largest concentration (inclusive) covered by the omega cache.
pub const OMEGA_CACHE_MAX: u32 = 200;

/// Number of bootstrap replicates averaged by the bootstrap method.
///
/// Replicate ids run `1..=BOOTSTRAP_REPLICATES`.
pub const BOOTSTRAP_REPLICATES: u16 = 500;

/// Cause category kept from the precomputed attributable-fraction table.
pub const PRECOMPUTED_CAUSE: &str = "Nonaccidental";

/// Baseline mortality source used for every burden computation.
pub const CANONICAL_BASELINE_SOURCE: &str = "basemor_ALL";

/// Baseline mortality statistic type: `1` is the mean estimate
/// (`2` upper bound, `3` lower bound).
pub const CANONICAL_BASELINE_STAT: &str = "1";

/// Records accumulated before each store write.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default decomposition window.
pub const DEFAULT_DECOMPOSITION_START: u16 = 2006;
pub const DEFAULT_DECOMPOSITION_END: u16 = 2023;

/// Tolerance used when checking that decomposition shares sum to 100.
pub const SHARE_SUM_TOLERANCE: f64 = 1e-6;
