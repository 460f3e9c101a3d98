//! Consistency checks over stored inputs and committed output tables.

use std::collections::BTreeMap;

use ember_core::constants::SHARE_SUM_TOLERANCE;
use ember_core::error::BurdenError;
use ember_core::store::{BurdenStore, InputSource};
use ember_core::types::{BurdenTriple, Method};
use serde::Serialize;
use tracing::{error, info, warn};

/// Row counts and detected problems.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Rows per input dataset and output table.
    pub rows: BTreeMap<&'static str, u64>,
    /// Non-finite values per excess burden field, e.g. `bootstrap.yll.fire`.
    pub nonfinite_excess: BTreeMap<String, u64>,
    /// Non-finite values per decomposition field.
    pub nonfinite_decomposition: BTreeMap<&'static str, u64>,
    /// Decomposition rows with non-zero shares not summing to 100.
    pub share_sum_violations: u64,
    /// Pollution summaries violating `avg_total >= avg_fire >= 0`.
    pub inconsistent_pollution: u64,
    pub canonical: Method,
}

impl ValidationReport {
    /// Number of problems that should fail validation.
    pub fn problems(&self) -> u64 {
        self.nonfinite_excess.values().sum::<u64>()
            + self.nonfinite_decomposition.values().sum::<u64>()
            + self.share_sum_violations
    }

    pub fn is_clean(&self) -> bool {
        self.problems() == 0
    }
}

fn count_nonfinite(counts: &mut BTreeMap<String, u64>, prefix: &str, triple: &BurdenTriple) {
    for (name, value) in [
        ("total", triple.total),
        ("fire", triple.fire),
        ("nonfire", triple.nonfire),
    ] {
        if !value.is_finite() {
            *counts.entry(format!("{prefix}.{name}")).or_default() += 1;
        }
    }
}

/// Validate everything in `store`, logging each finding.
pub fn validate<S>(store: &S) -> Result<ValidationReport, BurdenError>
where
    S: BurdenStore + InputSource + ?Sized,
{
    let mut report = ValidationReport {
        canonical: store.canonical_method()?,
        ..ValidationReport::default()
    };

    let pollution = store.pollution_summaries()?;
    report.inconsistent_pollution = pollution.iter().filter(|p| !p.is_consistent()).count() as u64;
    report.rows.insert("pollution", pollution.len() as u64);
    report.rows.insert("population", store.population_rows()?.len() as u64);
    report.rows.insert("baseline", store.baseline_rows()?.len() as u64);
    report.rows.insert("bootstrap_bins", store.bootstrap_bin_rows()?.len() as u64);
    report.rows.insert("precomputed_bins", store.precomputed_bin_rows()?.len() as u64);

    let excess = store.excess_records()?;
    report.rows.insert("excess_burden", excess.len() as u64);
    for record in &excess {
        for method in Method::ALL {
            let burden = record.method(method);
            count_nonfinite(&mut report.nonfinite_excess, &format!("{method}.excess"), &burden.excess);
            count_nonfinite(&mut report.nonfinite_excess, &format!("{method}.yll"), &burden.yll);
        }
    }

    let decomposition = store.decomposition_records()?;
    report.rows.insert("decomposition", decomposition.len() as u64);
    for record in &decomposition {
        for (name, value) in [
            ("population_growth", record.population_growth),
            ("population_ageing", record.population_ageing),
            ("baseline_mortality_change", record.baseline_mortality_change),
            ("exposure_change", record.exposure_change),
            ("total_change", record.total_change),
        ] {
            if !value.is_finite() {
                *report.nonfinite_decomposition.entry(name).or_default() += 1;
            }
        }
        if !record.is_finite() {
            continue;
        }
        let shares = [
            record.population_growth,
            record.population_ageing,
            record.baseline_mortality_change,
            record.exposure_change,
        ];
        // All-zero shares mark an unchanged burden.
        let unchanged = shares.iter().all(|&s| s == 0.0);
        if !unchanged && (record.share_sum() - 100.0).abs() > SHARE_SUM_TOLERANCE {
            report.share_sum_violations += 1;
            error!(
                fips = %record.fips,
                exposure = %record.exposure,
                sum = record.share_sum(),
                "decomposition shares do not sum to 100"
            );
        }
    }

    for (table, rows) in &report.rows {
        info!(table, rows, "row count");
    }
    for (field, count) in &report.nonfinite_excess {
        error!(field = %field, count, "non-finite excess burden values");
    }
    for (field, count) in &report.nonfinite_decomposition {
        error!(field, count, "non-finite decomposition values");
    }
    if report.inconsistent_pollution > 0 {
        warn!(rows = report.inconsistent_pollution, "pollution summaries with avg_fire outside [0, avg_total]");
    }
    info!(problems = report.problems(), canonical = %report.canonical, "validation complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::age::AgeGroup;
    use ember_core::store::MemoryBurdenStore;
    use ember_core::types::{
        DecompositionRecord, ExcessBurdenRecord, ExposureType, MethodBurden, OutputTable,
    };

    fn decomposition(fips: &str, shares: [f64; 4]) -> DecompositionRecord {
        DecompositionRecord {
            fips: fips.into(),
            start_year: 2006,
            end_year: 2023,
            exposure: ExposureType::Fire,
            population_growth: shares[0],
            population_ageing: shares[1],
            baseline_mortality_change: shares[2],
            exposure_change: shares[3],
            total_change: 12.5,
        }
    }

    #[test]
    fn empty_store_is_clean() {
        let report = validate(&MemoryBurdenStore::new()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.rows["excess_burden"], 0);
        assert_eq!(report.rows.len(), 7);
    }

    #[test]
    fn detects_nan_and_bad_share_sums() {
        let mut store = MemoryBurdenStore::new();
        let mut bad = MethodBurden::default();
        bad.excess.fire = f64::NAN;
        bad.yll.fire = f64::INFINITY;
        let t = store.begin_stage(OutputTable::Excess).unwrap();
        store
            .write_excess(&t, &[ExcessBurdenRecord {
                fips: "01001".into(),
                year: 2020,
                age_group: AgeGroup::new(16).unwrap(),
                population: 10,
                model: MethodBurden::default(),
                bootstrap: bad,
                precomputed: MethodBurden::default(),
            }])
            .unwrap();
        store.commit_stage(t).unwrap();

        let t = store.begin_stage(OutputTable::Decomposition).unwrap();
        store
            .write_decomposition(&t, &[
                decomposition("01001", [40.0, 10.0, 20.0, 30.0]),
                decomposition("01003", [40.0, 10.0, 20.0, 31.0]),
                decomposition("01005", [0.0; 4]),
                decomposition("01007", [f64::NAN, 0.0, 0.0, 0.0]),
            ])
            .unwrap();
        store.commit_stage(t).unwrap();

        let report = validate(&store).unwrap();
        assert_eq!(report.nonfinite_excess["bootstrap.excess.fire"], 1);
        assert_eq!(report.nonfinite_excess["bootstrap.yll.fire"], 1);
        assert_eq!(report.nonfinite_decomposition["population_growth"], 1);
        assert_eq!(report.share_sum_violations, 1);
        assert_eq!(report.problems(), 4);
        assert!(!report.is_clean());
    }
}
