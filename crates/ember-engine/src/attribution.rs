//! Excess deaths and years of life lost per county-year-band.
//!
//! Every record carries all three methods:
//!
//! - **model**: the parametric curve on total and non-fire exposure; fire is
//!   their difference.
//! - **bootstrap**: mean over replicates of the binned fire coefficient,
//!   `AF = (exp(coef) - 1) / exp(coef)`; a missing replicate contributes 0.
//! - **precomputed**: binned fire attributable fraction.
//!
//! Both empirical methods cover fire only and borrow the model's non-fire
//! figure, so `total = fire + model nonfire`.

use ember_core::age::AgeGroup;
use ember_core::constants::BOOTSTRAP_REPLICATES;
use ember_core::error::BurdenError;
use ember_core::traits::ExposureResponse;
use ember_core::types::{BurdenTriple, ExcessBurdenRecord, MethodBurden, PollutionSummary};
use serde::Serialize;
use tracing::{debug, info};

use crate::index::LookupIndex;

/// Counts for one attribution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttributionStats {
    pub county_years: u64,
    pub records: u64,
    pub missing_pollution: u64,
    pub missing_baseline: u64,
    pub zero_population: u64,
    pub zero_rate: u64,
    pub no_bootstrap_bin: u64,
    pub no_precomputed_bin: u64,
}

impl AttributionStats {
    /// Bands skipped for missing or zero inputs.
    pub fn skipped(&self) -> u64 {
        self.missing_baseline + self.zero_population + self.zero_rate
    }
}

/// Attribution over a built [`LookupIndex`].
pub struct AttributionEngine<'a, M: ExposureResponse + ?Sized> {
    index: &'a LookupIndex,
    model: &'a M,
}

impl<'a, M: ExposureResponse + ?Sized> AttributionEngine<'a, M> {
    pub fn new(index: &'a LookupIndex, model: &'a M) -> Self {
        Self { index, model }
    }

    /// Parametric excess burden for `scale = population * rate` deaths per year.
    pub fn model_excess(&self, summary: &PollutionSummary, age: AgeGroup, scale: f64) -> BurdenTriple {
        let total = scale * self.model.attributable_fraction_at(summary.avg_total, age);
        let nonfire = scale * self.model.attributable_fraction_at(summary.avg_nonfire, age);
        BurdenTriple {
            total,
            fire: total - nonfire,
            nonfire,
        }
    }

    /// Bootstrap-mean fire excess, or `None` when no bin contains `avg_fire`.
    pub fn bootstrap_fire(&self, avg_fire: f64, age: AgeGroup, scale: f64) -> Option<f64> {
        let (_, replicates) = self
            .index
            .bootstrap_bins(age.bootstrap_class())?
            .find(avg_fire)?;
        let sum: f64 = (1..=BOOTSTRAP_REPLICATES)
            .map(|bootid| {
                replicates
                    .get(&bootid)
                    .map_or(0.0, |&coef| scale * coefficient_fraction(coef))
            })
            .sum();
        Some(sum / f64::from(BOOTSTRAP_REPLICATES))
    }

    /// Precomputed fire excess, or `None` when no bin contains `avg_fire`.
    pub fn precomputed_fire(&self, avg_fire: f64, age: AgeGroup, scale: f64) -> Option<f64> {
        let (_, &af) = self
            .index
            .precomputed_bins(age.precomputed_class())?
            .find(avg_fire)?;
        Some(scale * af)
    }

    /// Attribute one county-year-band. Returns the record and whether each
    /// empirical method found a bin.
    pub fn attribute(
        &self,
        summary: &PollutionSummary,
        age: AgeGroup,
        population: u64,
        rate: f64,
    ) -> (ExcessBurdenRecord, bool, bool) {
        let scale = population as f64 * rate;
        let le = age.life_expectancy();

        let model = self.model_excess(summary, age, scale);
        let boot_fire = self.bootstrap_fire(summary.avg_fire, age, scale);
        let prec_fire = self.precomputed_fire(summary.avg_fire, age, scale);
        let empirical = |fire: Option<f64>| {
            let fire = fire.unwrap_or(0.0);
            BurdenTriple {
                total: fire + model.nonfire,
                fire,
                nonfire: model.nonfire,
            }
        };

        let record = ExcessBurdenRecord {
            fips: summary.fips.clone(),
            year: summary.year,
            age_group: age,
            population,
            model: MethodBurden::from_excess(model, le),
            bootstrap: MethodBurden::from_excess(empirical(boot_fire), le),
            precomputed: MethodBurden::from_excess(empirical(prec_fire), le),
        };
        (record, boot_fire.is_some(), prec_fire.is_some())
    }

    /// Attribute every county-year-band with complete inputs, in key order.
    ///
    /// Stops at the first error returned by `sink`.
    pub fn for_each_record<F>(&self, mut sink: F) -> Result<AttributionStats, BurdenError>
    where
        F: FnMut(ExcessBurdenRecord) -> Result<(), BurdenError>,
    {
        let mut stats = AttributionStats::default();

        for (fips, year, bands) in self.index.population_county_years() {
            let Some(summary) = self.index.pollution(fips, year) else {
                stats.missing_pollution += 1;
                debug!(fips, year, "no pollution summary, skipping county-year");
                continue;
            };
            stats.county_years += 1;

            for (&age, &population) in bands {
                let Some(rate) = self.index.baseline_rate(fips, year, age) else {
                    stats.missing_baseline += 1;
                    debug!(fips, year, age_group = age.band(), "no baseline rate");
                    continue;
                };
                if population == 0 {
                    stats.zero_population += 1;
                    continue;
                }
                if rate == 0.0 {
                    stats.zero_rate += 1;
                    continue;
                }

                let (record, boot_bin, prec_bin) = self.attribute(summary, age, population, rate);
                if !boot_bin {
                    stats.no_bootstrap_bin += 1;
                }
                if !prec_bin {
                    stats.no_precomputed_bin += 1;
                }
                sink(record)?;
                stats.records += 1;
            }
        }

        info!(
            county_years = stats.county_years,
            records = stats.records,
            skipped = stats.skipped(),
            missing_pollution = stats.missing_pollution,
            "attribution complete"
        );
        Ok(stats)
    }

    /// Collect every record in memory.
    pub fn records(&self) -> Result<(Vec<ExcessBurdenRecord>, AttributionStats), BurdenError> {
        let mut records = Vec::new();
        let stats = self.for_each_record(|r| {
            records.push(r);
            Ok(())
        })?;
        Ok((records, stats))
    }
}

/// Attributable fraction of a log hazard coefficient, 0 when non-finite.
pub fn coefficient_fraction(coef: f64) -> f64 {
    let rr = coef.exp();
    let af = (rr - 1.0) / rr;
    if af.is_finite() { af } else { 0.0 }
}
