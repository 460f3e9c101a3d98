//! Four-factor decomposition of burden change between two years.
//!
//! Sequential substitution over the age groups shared by both years:
//!
//! ```text
//! A = Σ (P0 / ΣP0) · ΣP1 · Y0 · AF0     population growth
//! B = Σ P1 · Y0 · AF0                   + age structure
//! C = Σ P1 · Y1 · AF0                   + baseline mortality
//! D = Σ P1 · Y1 · AF1                   + exposure (end-year burden)
//! ```
//!
//! Each factor is reported as a percentage of `D - Σ P0·Y0·AF0`, so the four
//! shares sum to 100 whenever the net change is non-zero.

use std::collections::BTreeSet;

use ember_core::age::AgeGroup;
use ember_core::error::BurdenError;
use ember_core::traits::ExposureResponse;
use ember_core::types::{DecompositionRecord, ExposureType};
use serde::Serialize;
use tracing::{debug, info};

use crate::index::LookupIndex;

/// Inputs of one age group at both endpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeCell {
    pub p0: f64,
    pub p1: f64,
    pub y0: f64,
    pub y1: f64,
    pub af0: f64,
    pub af1: f64,
}

/// Factor shares (percent of net change) and the net change (percent of start burden).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BurdenChange {
    pub population_growth: f64,
    pub population_ageing: f64,
    pub baseline_mortality_change: f64,
    pub exposure_change: f64,
    pub total_change: f64,
}

impl BurdenChange {
    pub fn share_sum(&self) -> f64 {
        self.population_growth
            + self.population_ageing
            + self.baseline_mortality_change
            + self.exposure_change
    }
}

fn percent_of(part: f64, whole: f64) -> f64 {
    if whole == 0.0 { 0.0 } else { part / whole * 100.0 }
}

/// Decompose the change over `cells`.
///
/// Returns `None` when the start-year population is zero, since the start age
/// structure is then undefined.
pub fn decompose(cells: &[AgeCell]) -> Option<BurdenChange> {
    let start_pop: f64 = cells.iter().map(|c| c.p0).sum();
    if start_pop == 0.0 {
        return None;
    }
    let end_pop: f64 = cells.iter().map(|c| c.p1).sum();

    let mut a = 0.0;
    let mut b = 0.0;
    let mut c = 0.0;
    let mut d = 0.0;
    let mut start = 0.0;
    for cell in cells {
        a += cell.p0 / start_pop * end_pop * cell.y0 * cell.af0;
        b += cell.p1 * cell.y0 * cell.af0;
        c += cell.p1 * cell.y1 * cell.af0;
        d += cell.p1 * cell.y1 * cell.af1;
        start += cell.p0 * cell.y0 * cell.af0;
    }

    let change = d - start;
    Some(BurdenChange {
        population_growth: percent_of(a - start, change),
        population_ageing: percent_of(b - a, change),
        baseline_mortality_change: percent_of(c - b, change),
        exposure_change: percent_of(d - c, change),
        total_change: percent_of(change, start),
    })
}

/// Why a county produced no decomposition records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingPopulation,
    MissingBaseline,
    MissingPollution,
    NoSharedAgeGroups,
    ZeroStartPopulation,
}

impl SkipReason {
    pub fn describe(self) -> &'static str {
        match self {
            Self::MissingPopulation => "missing population",
            Self::MissingBaseline => "missing baseline mortality",
            Self::MissingPollution => "missing PM2.5 summary",
            Self::NoSharedAgeGroups => "no overlapping age groups",
            Self::ZeroStartPopulation => "zero start-year population",
        }
    }
}

/// Counts for one decomposition pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecompositionStats {
    pub counties: u64,
    pub decomposed: u64,
    pub records: u64,
    pub missing_population: u64,
    pub missing_baseline: u64,
    pub missing_pollution: u64,
    pub no_shared_age_groups: u64,
    pub zero_start_population: u64,
}

impl DecompositionStats {
    fn skip(&mut self, reason: SkipReason) {
        let slot = match reason {
            SkipReason::MissingPopulation => &mut self.missing_population,
            SkipReason::MissingBaseline => &mut self.missing_baseline,
            SkipReason::MissingPollution => &mut self.missing_pollution,
            SkipReason::NoSharedAgeGroups => &mut self.no_shared_age_groups,
            SkipReason::ZeroStartPopulation => &mut self.zero_start_population,
        };
        *slot += 1;
    }

    pub fn skipped(&self) -> u64 {
        self.counties - self.decomposed
    }
}

/// Decomposition over a built [`LookupIndex`], recomputing attributable
/// fractions for both endpoints with the supplied model.
pub struct DecompositionEngine<'a, M: ExposureResponse + ?Sized> {
    index: &'a LookupIndex,
    model: &'a M,
    start_year: u16,
    end_year: u16,
}

impl<'a, M: ExposureResponse + ?Sized> DecompositionEngine<'a, M> {
    pub fn new(index: &'a LookupIndex, model: &'a M, start_year: u16, end_year: u16) -> Self {
        Self {
            index,
            model,
            start_year,
            end_year,
        }
    }

    /// Both records (total, then fire) for one county.
    pub fn decompose_county(&self, fips: &str) -> Result<[DecompositionRecord; 2], SkipReason> {
        let (s, e) = (self.start_year, self.end_year);
        let index = self.index;

        let (Some(pop0), Some(pop1)) = (index.population(fips, s), index.population(fips, e)) else {
            return Err(SkipReason::MissingPopulation);
        };
        let (Some(mort0), Some(mort1)) = (index.baseline(fips, s), index.baseline(fips, e)) else {
            return Err(SkipReason::MissingBaseline);
        };
        let (Some(pm0), Some(pm1)) = (index.pollution(fips, s), index.pollution(fips, e)) else {
            return Err(SkipReason::MissingPollution);
        };

        let shared: BTreeSet<AgeGroup> = pop0
            .keys()
            .filter(|age| pop1.contains_key(age) && mort0.contains_key(age) && mort1.contains_key(age))
            .copied()
            .collect();
        if shared.is_empty() {
            return Err(SkipReason::NoSharedAgeGroups);
        }

        let decompose_exposure = |exposure: ExposureType| -> Result<DecompositionRecord, SkipReason> {
            let (z0, z1) = (exposure.concentration(pm0), exposure.concentration(pm1));
            let cells: Vec<AgeCell> = shared
                .iter()
                .map(|age| AgeCell {
                    p0: pop0[age] as f64,
                    p1: pop1[age] as f64,
                    y0: mort0[age],
                    y1: mort1[age],
                    af0: self.model.exact_attributable_fraction_at(z0, *age),
                    af1: self.model.exact_attributable_fraction_at(z1, *age),
                })
                .collect();
            let change = decompose(&cells).ok_or(SkipReason::ZeroStartPopulation)?;
            Ok(DecompositionRecord {
                fips: fips.to_string(),
                start_year: s,
                end_year: e,
                exposure,
                population_growth: change.population_growth,
                population_ageing: change.population_ageing,
                baseline_mortality_change: change.baseline_mortality_change,
                exposure_change: change.exposure_change,
                total_change: change.total_change,
            })
        };

        Ok([
            decompose_exposure(ExposureType::Total)?,
            decompose_exposure(ExposureType::Fire)?,
        ])
    }

    /// Decompose every county, in fips order. Stops at the first `sink` error.
    pub fn for_each_record<F>(&self, mut sink: F) -> Result<DecompositionStats, BurdenError>
    where
        F: FnMut(DecompositionRecord) -> Result<(), BurdenError>,
    {
        let mut stats = DecompositionStats::default();

        for fips in self.index.counties() {
            stats.counties += 1;
            match self.decompose_county(fips) {
                Ok(records) => {
                    stats.decomposed += 1;
                    for record in records {
                        sink(record)?;
                        stats.records += 1;
                    }
                }
                Err(reason) => {
                    stats.skip(reason);
                    debug!(fips, reason = reason.describe(), "skipping county");
                }
            }
            if stats.counties % 100 == 0 {
                info!(counties = stats.counties, "decomposition progress");
            }
        }

        info!(
            start_year = self.start_year,
            end_year = self.end_year,
            counties = stats.counties,
            decomposed = stats.decomposed,
            skipped = stats.skipped(),
            "decomposition complete"
        );
        Ok(stats)
    }

    pub fn records(&self) -> Result<(Vec<DecompositionRecord>, DecompositionStats), BurdenError> {
        let mut records = Vec::new();
        let stats = self.for_each_record(|r| {
            records.push(r);
            Ok(())
        })?;
        Ok((records, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::constants::SHARE_SUM_TOLERANCE;
    use ember_core::store::MemoryBurdenStore;
    use ember_core::types::{BaselineRateRow, BaselineSelection, PollutionSummary, PopulationRow};
    use ember_model::GemmModel;
    use proptest::prelude::*;

    fn cell(p0: f64, p1: f64, y0: f64, y1: f64, af0: f64, af1: f64) -> AgeCell {
        AgeCell { p0, p1, y0, y1, af0, af1 }
    }

    #[test]
    fn unchanged_inputs_give_zero_shares() {
        let cells = [
            cell(1_000.0, 1_000.0, 0.01, 0.01, 0.05, 0.05),
            cell(2_000.0, 2_000.0, 0.02, 0.02, 0.08, 0.08),
        ];
        let change = decompose(&cells).unwrap();
        assert_eq!(change, BurdenChange::default());
    }

    #[test]
    fn offsetting_changes_give_zero_shares() {
        // Population doubles while exposure halves the fraction: D == start.
        let cells = [
            cell(1_000.0, 2_000.0, 0.5, 0.5, 0.25, 0.125),
            cell(3_000.0, 6_000.0, 0.25, 0.25, 0.5, 0.25),
        ];
        let change = decompose(&cells).unwrap();
        assert_eq!(change.population_growth, 0.0);
        assert_eq!(change.population_ageing, 0.0);
        assert_eq!(change.baseline_mortality_change, 0.0);
        assert_eq!(change.exposure_change, 0.0);
        assert_eq!(change.total_change, 0.0);
    }

    #[test]
    fn pure_population_growth() {
        let cells = [
            cell(1_000.0, 1_500.0, 0.01, 0.01, 0.1, 0.1),
            cell(1_000.0, 1_500.0, 0.02, 0.02, 0.1, 0.1),
        ];
        let change = decompose(&cells).unwrap();
        assert!((change.population_growth - 100.0).abs() < 1e-9);
        assert!(change.population_ageing.abs() < 1e-9);
        assert!((change.total_change - 50.0).abs() < 1e-9);
    }

    #[test]
    fn zero_start_burden_reports_zero_total_change() {
        let cells = [cell(1_000.0, 1_000.0, 0.01, 0.01, 0.0, 0.1)];
        let change = decompose(&cells).unwrap();
        assert_eq!(change.total_change, 0.0);
        assert!((change.exposure_change - 100.0).abs() < 1e-9);
    }

    #[test]
    fn zero_start_population_is_undefined() {
        assert!(decompose(&[cell(0.0, 10.0, 0.01, 0.01, 0.1, 0.1)]).is_none());
        assert!(decompose(&[]).is_none());
    }

    fn county_store(fips: &str, years: &[(u16, f64, f64)], bands: &[(u8, u64, f64)]) -> MemoryBurdenStore {
        let mut store = MemoryBurdenStore::new();
        for &(year, total, nonfire) in years {
            store.pollution.push(PollutionSummary {
                fips: fips.into(),
                year,
                avg_total: total,
                avg_fire: total - nonfire,
                avg_nonfire: nonfire,
                max_total: 0.0,
                max_fire: 0.0,
                max_nonfire: 0.0,
                days_count: 365,
            });
            for &(band, population, rate) in bands {
                store.population.push(PopulationRow {
                    fips: fips.into(),
                    year,
                    age_group: band,
                    population: Some(population),
                });
                store.baseline.push(BaselineRateRow {
                    fips: fips.into(),
                    year,
                    age_group: band,
                    source: "basemor_ALL".into(),
                    stat_type: "1".into(),
                    allage_flag: false,
                    value: Some(rate),
                });
            }
        }
        store
    }

    #[test]
    fn stable_county_yields_two_zero_records() {
        let store = county_store(
            "06037",
            &[(2006, 12.0, 8.0), (2023, 12.0, 8.0)],
            &[(10, 10_000, 0.01), (15, 4_000, 0.03)],
        );
        let index = LookupIndex::build(&store, &BaselineSelection::default()).unwrap();
        let model = GemmModel::new();
        let engine = DecompositionEngine::new(&index, &model, 2006, 2023);
        let (records, stats) = engine.records().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(stats.decomposed, 1);
        assert_eq!(records[0].exposure, ExposureType::Total);
        assert_eq!(records[1].exposure, ExposureType::Fire);
        for r in &records {
            assert_eq!(r.share_sum(), 0.0);
            assert_eq!(r.total_change, 0.0);
        }
    }

    #[test]
    fn rising_exposure_attributed_to_exposure() {
        let mut store = county_store("06037", &[(2006, 8.0, 6.0)], &[(12, 5_000, 0.02)]);
        let end = county_store("06037", &[(2023, 20.0, 6.0)], &[(12, 5_000, 0.02)]);
        store.pollution.extend(end.pollution);
        store.population.extend(end.population);
        store.baseline.extend(end.baseline);

        let index = LookupIndex::build(&store, &BaselineSelection::default()).unwrap();
        let model = GemmModel::new();
        let [total, fire] = DecompositionEngine::new(&index, &model, 2006, 2023)
            .decompose_county("06037")
            .unwrap();
        assert!((total.exposure_change - 100.0).abs() < 1e-9);
        assert!(total.total_change > 0.0);
        assert!((fire.exposure_change - 100.0).abs() < 1e-9);
    }

    #[test]
    fn fire_row_uses_residual_over_shared_bands() {
        // Band 16 exists only at the start and band 12 only at the end.
        let mut store = county_store("04013", &[(2006, 14.0, 9.0)], &[
            (10, 8_000, 0.01),
            (14, 3_000, 0.04),
            (16, 500, 0.09),
        ]);
        let end = county_store("04013", &[(2023, 18.5, 10.0)], &[
            (10, 9_000, 0.009),
            (12, 2_000, 0.02),
            (14, 4_500, 0.035),
        ]);
        store.pollution.extend(end.pollution);
        store.population.extend(end.population);
        store.baseline.extend(end.baseline);
        // Reported fire sits below the counterfactual; the residual does not.
        for p in &mut store.pollution {
            p.avg_fire = if p.year == 2006 { 2.0 } else { 2.2 };
        }

        let index = LookupIndex::build(&store, &BaselineSelection::default()).unwrap();
        let model = GemmModel::new();
        let [total, fire] = DecompositionEngine::new(&index, &model, 2006, 2023)
            .decompose_county("04013")
            .unwrap();

        let expected = |c0: f64, c1: f64| {
            let bands = [(10u8, 8_000.0, 9_000.0, 0.01, 0.009), (14, 3_000.0, 4_500.0, 0.04, 0.035)];
            let (sp, ep) = (11_000.0, 13_500.0);
            let (mut a, mut b, mut c, mut d, mut start) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for (band, p0, p1, y0, y1) in bands {
                let age = AgeGroup::new(band).unwrap();
                let af0 = model.exact_attributable_fraction_at(c0, age);
                let af1 = model.exact_attributable_fraction_at(c1, age);
                a += p0 / sp * ep * y0 * af0;
                b += p1 * y0 * af0;
                c += p1 * y1 * af0;
                d += p1 * y1 * af1;
                start += p0 * y0 * af0;
            }
            let net = d - start;
            [
                (a - start) / net * 100.0,
                (b - a) / net * 100.0,
                (c - b) / net * 100.0,
                (d - c) / net * 100.0,
                net / start * 100.0,
            ]
        };
        let actual = |r: &DecompositionRecord| {
            [
                r.population_growth,
                r.population_ageing,
                r.baseline_mortality_change,
                r.exposure_change,
                r.total_change,
            ]
        };

        for (got, want) in actual(&total).into_iter().zip(expected(14.0, 18.5)) {
            assert!((got - want).abs() < 1e-9, "total: {got} != {want}");
        }
        for (got, want) in actual(&fire).into_iter().zip(expected(5.0, 8.5)) {
            assert!((got - want).abs() < 1e-9, "fire: {got} != {want}");
        }
        assert!((fire.share_sum() - 100.0).abs() < 1e-9);
        assert!(fire.exposure_change > 0.0);
        assert!(fire.total_change > 0.0);
    }

    #[test]
    fn endpoint_fractions_use_exact_curve() {
        // 12.0 and 12.9 clip to 9.6 and 10.5, both off the integer grid.
        let store = {
            let mut s = county_store("06037", &[(2006, 12.0, 12.0)], &[(10, 10_000, 0.01)]);
            let end = county_store("06037", &[(2023, 12.9, 12.9)], &[(10, 10_000, 0.01)]);
            s.pollution.extend(end.pollution);
            s.population.extend(end.population);
            s.baseline.extend(end.baseline);
            s
        };
        let index = LookupIndex::build(&store, &BaselineSelection::default()).unwrap();
        let model = GemmModel::new();
        let [total, _] = DecompositionEngine::new(&index, &model, 2006, 2023)
            .decompose_county("06037")
            .unwrap();

        let age = AgeGroup::new(10).unwrap();
        let exact = cell(
            10_000.0,
            10_000.0,
            0.01,
            0.01,
            model.exact_attributable_fraction_at(12.0, age),
            model.exact_attributable_fraction_at(12.9, age),
        );
        let cached = cell(
            10_000.0,
            10_000.0,
            0.01,
            0.01,
            model.attributable_fraction_at(12.0, age),
            model.attributable_fraction_at(12.9, age),
        );
        let exact_change = decompose(&[exact]).unwrap().total_change;
        assert!((total.total_change - exact_change).abs() < 1e-12);
        assert!((total.total_change - decompose(&[cached]).unwrap().total_change).abs() > 1e-6);
    }

    #[test]
    fn counties_missing_an_endpoint_are_skipped() {
        let mut store = county_store("01001", &[(2006, 10.0, 7.0), (2023, 11.0, 7.0)], &[(10, 100, 0.01)]);
        let partial = county_store("01003", &[(2006, 10.0, 7.0)], &[(10, 100, 0.01)]);
        store.pollution.extend(partial.pollution);
        store.population.extend(partial.population);
        store.baseline.extend(partial.baseline);

        let index = LookupIndex::build(&store, &BaselineSelection::default()).unwrap();
        let model = GemmModel::new();
        let engine = DecompositionEngine::new(&index, &model, 2006, 2023);
        assert_eq!(engine.decompose_county("01003"), Err(SkipReason::MissingPopulation));
        let (records, stats) = engine.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(stats.counties, 2);
        assert_eq!(stats.missing_population, 1);
        assert_eq!(stats.skipped(), 1);
    }

    #[test]
    fn disjoint_age_groups_are_skipped() {
        let mut store = county_store("01001", &[(2006, 10.0, 7.0)], &[(10, 100, 0.01)]);
        let end = county_store("01001", &[(2023, 10.0, 7.0)], &[(11, 100, 0.01)]);
        store.pollution.extend(end.pollution);
        store.population.extend(end.population);
        store.baseline.extend(end.baseline);

        let index = LookupIndex::build(&store, &BaselineSelection::default()).unwrap();
        let model = GemmModel::new();
        let engine = DecompositionEngine::new(&index, &model, 2006, 2023);
        assert_eq!(engine.decompose_county("01001"), Err(SkipReason::NoSharedAgeGroups));
    }

    fn cell_strategy() -> impl Strategy<Value = AgeCell> {
        (
            1.0f64..1e6,
            1.0f64..1e6,
            1e-5f64..0.2,
            1e-5f64..0.2,
            0.0f64..0.5,
            0.0f64..0.5,
        )
            .prop_map(|(p0, p1, y0, y1, af0, af1)| AgeCell { p0, p1, y0, y1, af0, af1 })
    }

    proptest! {
        #[test]
        fn shares_sum_to_one_hundred(cells in proptest::collection::vec(cell_strategy(), 1..18)) {
            let start: f64 = cells.iter().map(|c| c.p0 * c.y0 * c.af0).sum();
            let end: f64 = cells.iter().map(|c| c.p1 * c.y1 * c.af1).sum();
            // Upper bound on every intermediate sum; a net change that is tiny
            // against it amplifies rounding in every share.
            let pop: f64 = cells.iter().map(|c| c.p0 + c.p1).sum();
            let risk: f64 = cells.iter().map(|c| (c.y0 + c.y1) * (c.af0 + c.af1)).sum();
            prop_assume!((end - start).abs() > 1e-6 * pop * risk);

            let change = decompose(&cells).unwrap();
            prop_assert!(
                (change.share_sum() - 100.0).abs() <= SHARE_SUM_TOLERANCE,
                "shares sum to {}", change.share_sum()
            );
        }
    }
}
