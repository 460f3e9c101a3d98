//! Pipeline data model: raw input rows, attribution output, decomposition output.
//!
//! Counties are identified by their five-digit FIPS code. Years are calendar
//! years. Concentrations are annual means in µg/m³.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::age::AgeGroup;
use crate::constants::{CANONICAL_BASELINE_SOURCE, CANONICAL_BASELINE_STAT};
use crate::error::ParseMethodError;

// --- Inputs ---

/// Annual PM2.5 summary for one county-year, split by source.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, bincode::Encode, bincode::Decode)]
pub struct PollutionSummary {
    pub fips: String,
    pub year: u16,
    pub avg_total: f64,
    pub avg_fire: f64,
    pub avg_nonfire: f64,
    #[serde(default)]
    pub max_total: f64,
    #[serde(default)]
    pub max_fire: f64,
    #[serde(default)]
    pub max_nonfire: f64,
    #[serde(default)]
    pub days_count: u32,
}

impl PollutionSummary {
    /// Fire-derived exposure as used by the decomposition: total minus non-fire.
    pub fn fire_residual(&self) -> f64 {
        self.avg_total - self.avg_nonfire
    }

    /// Whether `avg_total >= avg_fire >= 0` holds.
    pub fn is_consistent(&self) -> bool {
        self.avg_fire >= 0.0 && self.avg_total >= self.avg_fire
    }
}

/// Population count for one county-year-band. Band `0` is the all-ages total.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct PopulationRow {
    pub fips: String,
    pub year: u16,
    pub age_group: u8,
    pub population: Option<u64>,
}

/// Baseline mortality rate row as delivered, before the canonical filter.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, bincode::Encode, bincode::Decode)]
pub struct BaselineRateRow {
    pub fips: String,
    pub year: u16,
    pub age_group: u8,
    pub source: String,
    pub stat_type: String,
    #[serde(default)]
    pub allage_flag: bool,
    pub value: Option<f64>,
}

/// One bootstrap replicate of a fire-PM2.5 bin log hazard coefficient.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, bincode::Encode, bincode::Decode)]
pub struct BootstrapBinRow {
    /// Coarse age class label, e.g. `under_65`.
    pub age_group: String,
    /// Interval notation, e.g. `(0.1,0.25]`.
    pub bin: String,
    pub bootid: Option<u16>,
    pub coef: Option<f64>,
}

/// Precomputed attributable fraction for a fire-PM2.5 bin.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, bincode::Encode, bincode::Decode)]
pub struct PrecomputedBinRow {
    /// Coarse age class label, e.g. `0 to 64`.
    pub age_group: String,
    /// Range notation, e.g. `0.1-0.2` or open-ended `5+`.
    pub bin: String,
    pub cause: String,
    /// Attributable fraction as a probability.
    pub af: Option<f64>,
    #[serde(default)]
    pub ci_low: Option<f64>,
    #[serde(default)]
    pub ci_up: Option<f64>,
}

/// Which baseline mortality rows feed the pipeline.
///
/// Rows flagged as all-age aggregates are always excluded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct BaselineSelection {
    pub source: String,
    pub stat_type: String,
}

impl Default for BaselineSelection {
    fn default() -> Self {
        Self {
            source: CANONICAL_BASELINE_SOURCE.to_string(),
            stat_type: CANONICAL_BASELINE_STAT.to_string(),
        }
    }
}

impl BaselineSelection {
    pub fn matches(&self, row: &BaselineRateRow) -> bool {
        !row.allage_flag && row.source == self.source && row.stat_type == self.stat_type
    }
}

// --- Attribution output ---

/// Attribution method.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Parametric GEMM curve.
    #[default]
    #[serde(alias = "gemm")]
    Model,
    /// Mean over bootstrap replicates of binned fire hazard ratios.
    #[serde(alias = "boot")]
    Bootstrap,
    /// Precomputed binned fire attributable fractions.
    #[serde(alias = "prec")]
    Precomputed,
}

impl Method {
    pub const ALL: [Method; 3] = [Method::Model, Method::Bootstrap, Method::Precomputed];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Bootstrap => "bootstrap",
            Self::Precomputed => "precomputed",
        }
    }

    /// Single-byte tag used in persisted metadata.
    pub fn tag(self) -> u8 {
        match self {
            Self::Model => 0,
            Self::Bootstrap => 1,
            Self::Precomputed => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.tag() == tag)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ParseMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "model" | "gemm" => Ok(Self::Model),
            "bootstrap" | "boot" => Ok(Self::Bootstrap),
            "precomputed" | "prec" => Ok(Self::Precomputed),
            _ => Err(ParseMethodError(s.to_string())),
        }
    }
}

/// Total, fire, and non-fire components of a burden quantity.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default, bincode::Encode, bincode::Decode,
)]
pub struct BurdenTriple {
    pub total: f64,
    pub fire: f64,
    pub nonfire: f64,
}

impl BurdenTriple {
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            total: self.total * factor,
            fire: self.fire * factor,
            nonfire: self.nonfire * factor,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.total.is_finite() && self.fire.is_finite() && self.nonfire.is_finite()
    }
}

/// Excess deaths and years of life lost under one attribution method.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default, bincode::Encode, bincode::Decode,
)]
pub struct MethodBurden {
    pub excess: BurdenTriple,
    pub yll: BurdenTriple,
}

impl MethodBurden {
    /// Derive YLL from excess deaths using the band's remaining life expectancy.
    pub fn from_excess(excess: BurdenTriple, life_expectancy: f64) -> Self {
        Self {
            excess,
            yll: excess.scaled(life_expectancy),
        }
    }
}

/// Attribution result for one county-year-band, carrying every method.
///
/// The method-agnostic ("legacy") figures are not stored; they are derived on
/// read through [`ExcessBurdenRecord::view`] from the canonical method.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, bincode::Encode, bincode::Decode)]
pub struct ExcessBurdenRecord {
    pub fips: String,
    pub year: u16,
    pub age_group: AgeGroup,
    pub population: u64,
    pub model: MethodBurden,
    pub bootstrap: MethodBurden,
    pub precomputed: MethodBurden,
}

impl ExcessBurdenRecord {
    pub fn key(&self) -> (&str, u16, AgeGroup) {
        (&self.fips, self.year, self.age_group)
    }

    pub fn method(&self, method: Method) -> &MethodBurden {
        match method {
            Method::Model => &self.model,
            Method::Bootstrap => &self.bootstrap,
            Method::Precomputed => &self.precomputed,
        }
    }

    /// Read-time view exposing `canonical`'s figures as the legacy fields.
    pub fn view(&self, canonical: Method) -> ExcessBurdenView<'_> {
        ExcessBurdenView {
            record: self,
            canonical,
            legacy: *self.method(canonical),
        }
    }
}

/// An [`ExcessBurdenRecord`] with its legacy fields projected from a method.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct ExcessBurdenView<'a> {
    #[serde(flatten)]
    pub record: &'a ExcessBurdenRecord,
    pub canonical: Method,
    pub legacy: MethodBurden,
}

// --- Decomposition output ---

/// Exposure used when decomposing burden change.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "lowercase")]
pub enum ExposureType {
    /// Annual mean total PM2.5.
    Total,
    /// Total minus non-fire PM2.5.
    Fire,
}

impl ExposureType {
    pub const ALL: [ExposureType; 2] = [ExposureType::Total, ExposureType::Fire];

    /// Signed marker stored in place of an age group by the query layer.
    pub fn marker(self) -> i8 {
        match self {
            Self::Total => -1,
            Self::Fire => -2,
        }
    }

    pub fn concentration(self, summary: &PollutionSummary) -> f64 {
        match self {
            Self::Total => summary.avg_total,
            Self::Fire => summary.fire_residual(),
        }
    }
}

impl fmt::Display for ExposureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Total => f.write_str("total"),
            Self::Fire => f.write_str("fire"),
        }
    }
}

/// Four-factor decomposition of burden change between two years.
///
/// Factor fields are percentages of the net change; `total_change` is the net
/// change as a percentage of the start-year burden.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, bincode::Encode, bincode::Decode)]
pub struct DecompositionRecord {
    pub fips: String,
    pub start_year: u16,
    pub end_year: u16,
    pub exposure: ExposureType,
    pub population_growth: f64,
    pub population_ageing: f64,
    pub baseline_mortality_change: f64,
    pub exposure_change: f64,
    pub total_change: f64,
}

impl DecompositionRecord {
    pub fn key(&self) -> (&str, u16, u16, i8) {
        (&self.fips, self.start_year, self.end_year, self.exposure.marker())
    }

    pub fn share_sum(&self) -> f64 {
        self.population_growth
            + self.population_ageing
            + self.baseline_mortality_change
            + self.exposure_change
    }

    pub fn is_finite(&self) -> bool {
        [
            self.population_growth,
            self.population_ageing,
            self.baseline_mortality_change,
            self.exposure_change,
            self.total_change,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

// --- Staging ---

/// Output tables written by the pipeline stages.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputTable {
    Excess,
    Decomposition,
}

impl OutputTable {
    pub fn name(self) -> &'static str {
        match self {
            Self::Excess => "excess_burden",
            Self::Decomposition => "decomposition",
        }
    }
}

impl fmt::Display for OutputTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle for an open stage of a table rewrite.
///
/// Rows written under a ticket stay invisible until the ticket is committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageTicket {
    pub table: String,
    pub generation: u64,
}

/// Summary of the last committed rewrite of a table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StageManifest {
    pub table: String,
    pub generation: u64,
    pub rows: u64,
    pub committed_at: DateTime<Utc>,
}
