//! Read-only lookup index over the raw input datasets.
//!
//! Built once per run; both engines borrow it immutably. Rows that cannot be
//! used are dropped and counted in [`LoadReport`]. The only hard load failure
//! is an ambiguous canonical baseline rate.

use std::collections::{BTreeMap, BTreeSet};

use ember_core::age::{AgeGroup, BootstrapClass, PrecomputedClass};
use ember_core::constants::{ALL_AGES_BAND, BOOTSTRAP_REPLICATES, PRECOMPUTED_CAUSE};
use ember_core::error::{BurdenError, LoadError};
use ember_core::store::InputSource;
use ember_core::types::{
    BaselineRateRow, BaselineSelection, BootstrapBinRow, PollutionSummary, PopulationRow,
    PrecomputedBinRow,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bins::{parse_interval, parse_range, BinTable};

/// Bootstrap coefficients of one bin, keyed by replicate id.
pub type Replicates = BTreeMap<u16, f64>;

/// Per-band values of one county-year.
pub type BandMap<V> = BTreeMap<AgeGroup, V>;

type CountyYears<V> = BTreeMap<String, BTreeMap<u16, V>>;

/// Row accounting for one index build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub pollution: usize,
    pub population: usize,
    pub baseline: usize,
    pub bootstrap_coefficients: usize,
    pub precomputed_fractions: usize,

    pub duplicate_pollution: usize,
    pub duplicate_population: usize,
    pub duplicate_bins: usize,
    pub inconsistent_pollution: usize,
    pub null_values: usize,
    pub invalid_age_groups: usize,
    pub baseline_not_selected: usize,
    pub malformed_bins: usize,
    pub unknown_age_classes: usize,
    pub other_causes: usize,
    pub out_of_range_bootids: usize,
}

impl LoadReport {
    /// Rows dropped for any reason.
    pub fn dropped(&self) -> usize {
        self.duplicate_pollution
            + self.duplicate_population
            + self.duplicate_bins
            + self.null_values
            + self.invalid_age_groups
            + self.malformed_bins
            + self.unknown_age_classes
            + self.out_of_range_bootids
    }
}

/// In-memory keyed view of the five input datasets.
#[derive(Debug, Clone, Default)]
pub struct LookupIndex {
    pollution: CountyYears<PollutionSummary>,
    population: CountyYears<BandMap<u64>>,
    baseline: CountyYears<BandMap<f64>>,
    bootstrap: BTreeMap<BootstrapClass, BinTable<Replicates>>,
    precomputed: BTreeMap<PrecomputedClass, BinTable<f64>>,
    report: LoadReport,
}

impl LookupIndex {
    /// Load every dataset from `source`, keeping baseline rows matched by `selection`.
    ///
    /// # Errors
    ///
    /// Propagates source read errors, and returns
    /// [`LoadError::AmbiguousBaseline`] when more than one selected baseline row
    /// shares a (fips, year, age group).
    pub fn build<S: InputSource + ?Sized>(
        source: &S,
        selection: &BaselineSelection,
    ) -> Result<Self, BurdenError> {
        let mut index = Self::default();
        index.load_pollution(source.pollution_summaries()?);
        index.load_population(source.population_rows()?);
        index.load_baseline(source.baseline_rows()?, selection)?;
        index.load_bootstrap(source.bootstrap_bin_rows()?);
        index.load_precomputed(source.precomputed_bin_rows()?);

        let r = &index.report;
        info!(
            pollution = r.pollution,
            population = r.population,
            baseline = r.baseline,
            bootstrap = r.bootstrap_coefficients,
            precomputed = r.precomputed_fractions,
            dropped = r.dropped(),
            "lookup index built"
        );
        if r.null_values > 0 {
            warn!(rows = r.null_values, "dropped rows with null values");
        }
        Ok(index)
    }

    fn load_pollution(&mut self, rows: Vec<PollutionSummary>) {
        for row in rows {
            if !row.is_consistent() {
                self.report.inconsistent_pollution += 1;
                debug!(fips = %row.fips, year = row.year, "pollution summary has avg_fire outside [0, avg_total]");
            }
            let years = self.pollution.entry(row.fips.clone()).or_default();
            if years.contains_key(&row.year) {
                self.report.duplicate_pollution += 1;
                warn!(fips = %row.fips, year = row.year, "duplicate pollution summary, keeping first");
                continue;
            }
            years.insert(row.year, row);
            self.report.pollution += 1;
        }
    }

    fn load_population(&mut self, rows: Vec<PopulationRow>) {
        for row in rows {
            if row.age_group == ALL_AGES_BAND {
                continue;
            }
            let Some(age) = AgeGroup::new(row.age_group) else {
                self.report.invalid_age_groups += 1;
                continue;
            };
            let Some(count) = row.population else {
                self.report.null_values += 1;
                continue;
            };
            let bands = self
                .population
                .entry(row.fips.clone())
                .or_default()
                .entry(row.year)
                .or_default();
            if bands.contains_key(&age) {
                self.report.duplicate_population += 1;
                warn!(fips = %row.fips, year = row.year, age_group = row.age_group, "duplicate population row, keeping first");
                continue;
            }
            bands.insert(age, count);
            self.report.population += 1;
        }
    }

    fn load_baseline(
        &mut self,
        rows: Vec<BaselineRateRow>,
        selection: &BaselineSelection,
    ) -> Result<(), BurdenError> {
        let mut duplicates: BTreeMap<(String, u16, u8), usize> = BTreeMap::new();
        for row in rows {
            if !selection.matches(&row) {
                self.report.baseline_not_selected += 1;
                continue;
            }
            let Some(age) = AgeGroup::new(row.age_group) else {
                self.report.invalid_age_groups += 1;
                continue;
            };
            let Some(rate) = row.value else {
                self.report.null_values += 1;
                continue;
            };
            let bands = self
                .baseline
                .entry(row.fips.clone())
                .or_default()
                .entry(row.year)
                .or_default();
            if bands.contains_key(&age) {
                *duplicates
                    .entry((row.fips, row.year, row.age_group))
                    .or_insert(1) += 1;
                continue;
            }
            bands.insert(age, rate);
            self.report.baseline += 1;
        }

        if let Some(((fips, year, age_group), count)) = duplicates.into_iter().next() {
            return Err(LoadError::AmbiguousBaseline {
                fips,
                year,
                age_group,
                count,
            }
            .into());
        }
        Ok(())
    }

    fn load_bootstrap(&mut self, rows: Vec<BootstrapBinRow>) {
        for row in rows {
            let class = match row.age_group.parse::<BootstrapClass>() {
                Ok(class) => class,
                Err(e) => {
                    self.report.unknown_age_classes += 1;
                    warn!("dropping bootstrap bin row: {e}");
                    continue;
                }
            };
            let bounds = match parse_interval(&row.bin) {
                Ok(bounds) => bounds,
                Err(e) => {
                    self.report.malformed_bins += 1;
                    warn!("dropping bootstrap bin row: {e}");
                    continue;
                }
            };
            let (Some(bootid), Some(coef)) = (row.bootid, row.coef) else {
                self.report.null_values += 1;
                continue;
            };
            if !(1..=BOOTSTRAP_REPLICATES).contains(&bootid) {
                self.report.out_of_range_bootids += 1;
                continue;
            }
            let replicates = self
                .bootstrap
                .entry(class)
                .or_default()
                .entry_or_default(bounds);
            if replicates.contains_key(&bootid) {
                self.report.duplicate_bins += 1;
                continue;
            }
            replicates.insert(bootid, coef);
            self.report.bootstrap_coefficients += 1;
        }
    }

    fn load_precomputed(&mut self, rows: Vec<PrecomputedBinRow>) {
        for row in rows {
            if row.cause != PRECOMPUTED_CAUSE {
                self.report.other_causes += 1;
                continue;
            }
            let class = match row.age_group.parse::<PrecomputedClass>() {
                Ok(class) => class,
                Err(e) => {
                    self.report.unknown_age_classes += 1;
                    warn!("dropping precomputed bin row: {e}");
                    continue;
                }
            };
            let bounds = match parse_range(&row.bin) {
                Ok(bounds) => bounds,
                Err(e) => {
                    self.report.malformed_bins += 1;
                    warn!("dropping precomputed bin row: {e}");
                    continue;
                }
            };
            let Some(af) = row.af else {
                self.report.null_values += 1;
                continue;
            };
            let table = self.precomputed.entry(class).or_default();
            if table.get(&bounds).is_some() {
                self.report.duplicate_bins += 1;
                continue;
            }
            table.insert(bounds, af);
            self.report.precomputed_fractions += 1;
        }
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn pollution(&self, fips: &str, year: u16) -> Option<&PollutionSummary> {
        self.pollution.get(fips)?.get(&year)
    }

    /// Population by band, excluding the all-ages row.
    pub fn population(&self, fips: &str, year: u16) -> Option<&BandMap<u64>> {
        self.population.get(fips)?.get(&year)
    }

    /// Canonical baseline mortality rates by band.
    pub fn baseline(&self, fips: &str, year: u16) -> Option<&BandMap<f64>> {
        self.baseline.get(fips)?.get(&year)
    }

    pub fn baseline_rate(&self, fips: &str, year: u16, age: AgeGroup) -> Option<f64> {
        self.baseline(fips, year)?.get(&age).copied()
    }

    pub fn bootstrap_bins(&self, class: BootstrapClass) -> Option<&BinTable<Replicates>> {
        self.bootstrap.get(&class)
    }

    pub fn precomputed_bins(&self, class: PrecomputedClass) -> Option<&BinTable<f64>> {
        self.precomputed.get(&class)
    }

    /// Every county-year with population rows, in (fips, year) order.
    pub fn population_county_years(
        &self,
    ) -> impl Iterator<Item = (&str, u16, &BandMap<u64>)> {
        self.population.iter().flat_map(|(fips, years)| {
            years
                .iter()
                .map(move |(&year, bands)| (fips.as_str(), year, bands))
        })
    }

    /// Every county appearing in the pollution, population, or baseline data.
    pub fn counties(&self) -> BTreeSet<&str> {
        self.pollution
            .keys()
            .chain(self.population.keys())
            .chain(self.baseline.keys())
            .map(String::as_str)
            .collect()
    }
}
