//! Stage runners: each rewrites one output table from a built index.
//!
//! Stages are idempotent. A rerun replaces the table wholesale; a failed run
//! leaves the last committed table in place.

use ember_core::error::BurdenError;
use ember_core::store::BurdenStore;
use ember_core::traits::ExposureResponse;
use ember_core::types::{DecompositionRecord, ExcessBurdenRecord, Method, StageManifest};
use tracing::info;

use crate::attribution::{AttributionEngine, AttributionStats};
use crate::decomposition::{DecompositionEngine, DecompositionStats};
use crate::index::LookupIndex;
use crate::persistence::write_stage;

/// Outcome of one committed stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport<T> {
    pub manifest: StageManifest,
    pub stats: T,
}

/// Recompute the excess burden table.
///
/// When `canonical` is given it becomes the canonical method once the new
/// table is committed; otherwise the stored selection is kept.
pub fn run_attribution<S, M>(
    index: &LookupIndex,
    model: &M,
    store: &mut S,
    batch_size: usize,
    canonical: Option<Method>,
) -> Result<StageReport<AttributionStats>, BurdenError>
where
    S: BurdenStore + ?Sized,
    M: ExposureResponse + ?Sized,
{
    let engine = AttributionEngine::new(index, model);
    let (manifest, stats) = write_stage::<S, ExcessBurdenRecord, _, _>(store, batch_size, |sink| {
        engine.for_each_record(sink)
    })?;
    if let Some(method) = canonical {
        store.set_canonical_method(method)?;
    }
    info!(
        rows = manifest.rows,
        canonical = %store.canonical_method()?,
        "excess burden table replaced"
    );
    Ok(StageReport { manifest, stats })
}

/// Recompute the decomposition table for one year pair.
pub fn run_decomposition<S, M>(
    index: &LookupIndex,
    model: &M,
    store: &mut S,
    batch_size: usize,
    start_year: u16,
    end_year: u16,
) -> Result<StageReport<DecompositionStats>, BurdenError>
where
    S: BurdenStore + ?Sized,
    M: ExposureResponse + ?Sized,
{
    let engine = DecompositionEngine::new(index, model, start_year, end_year);
    let (manifest, stats) = write_stage::<S, DecompositionRecord, _, _>(store, batch_size, |sink| {
        engine.for_each_record(sink)
    })?;
    info!(rows = manifest.rows, start_year, end_year, "decomposition table replaced");
    Ok(StageReport { manifest, stats })
}

/// Select the method backing the legacy fields. Returns the previous selection.
///
/// Per-method figures are never rewritten, so switching back restores the
/// legacy view exactly.
pub fn switch_canonical<S: BurdenStore + ?Sized>(
    store: &mut S,
    method: Method,
) -> Result<Method, BurdenError> {
    let previous = store.canonical_method()?;
    store.set_canonical_method(method)?;
    info!(%previous, current = %method, "canonical method switched");
    Ok(previous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::error::StoreError;
    use ember_core::store::{InputSource, MemoryBurdenStore};
    use ember_core::types::{
        BaselineRateRow, BaselineSelection, BootstrapBinRow, OutputTable, PollutionSummary,
        PopulationRow, PrecomputedBinRow, StageTicket,
    };
    use ember_model::GemmModel;

    fn populated() -> MemoryBurdenStore {
        let mut store = MemoryBurdenStore::new();
        for (fips, year, total, nonfire) in [
            ("06037", 2006, 14.0, 11.0),
            ("06037", 2023, 11.5, 7.5),
            ("41051", 2006, 7.0, 6.0),
            ("41051", 2023, 13.0, 6.5),
        ] {
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
            for band in [4u8, 9, 14, 18] {
                store.population.push(PopulationRow {
                    fips: fips.into(),
                    year,
                    age_group: band,
                    population: Some(1_000 * u64::from(band) + u64::from(year - 2000)),
                });
                store.baseline.push(BaselineRateRow {
                    fips: fips.into(),
                    year,
                    age_group: band,
                    source: "basemor_ALL".into(),
                    stat_type: "1".into(),
                    allage_flag: false,
                    value: Some(0.0005 * f64::from(band)),
                });
            }
        }
        for bootid in 1..=500u16 {
            store.bootstrap_bins.push(BootstrapBinRow {
                age_group: "65_and_up".into(),
                bin: "[0,10)".into(),
                bootid: Some(bootid),
                coef: Some(0.001 * f64::from(bootid % 7)),
            });
        }
        store.precomputed_bins.push(PrecomputedBinRow {
            age_group: "0 to 64".into(),
            bin: "0+".into(),
            cause: "Nonaccidental".into(),
            af: Some(0.01),
            ci_low: Some(0.005),
            ci_up: Some(0.015),
        });
        store
    }

    fn index(store: &MemoryBurdenStore) -> LookupIndex {
        LookupIndex::build(store, &BaselineSelection::default()).unwrap()
    }

    #[test]
    fn attribution_is_idempotent() {
        let mut store = populated();
        let index = index(&store);
        let model = GemmModel::new();

        run_attribution(&index, &model, &mut store, 3, None).unwrap();
        let first = store.excess_records().unwrap();
        let report = run_attribution(&index, &model, &mut store, 5, None).unwrap();
        let second = store.excess_records().unwrap();

        assert_eq!(first.len(), 16);
        assert_eq!(report.manifest.rows, 16);
        assert_eq!(first, second);
    }

    #[test]
    fn canonical_switch_round_trip_is_exact() {
        let mut store = populated();
        let index = index(&store);
        let model = GemmModel::new();
        run_attribution(&index, &model, &mut store, 1000, Some(Method::Bootstrap)).unwrap();

        let legacy = |store: &MemoryBurdenStore| {
            let canonical = store.canonical_method().unwrap();
            store
                .excess_records()
                .unwrap()
                .iter()
                .map(|r| r.view(canonical).legacy)
                .collect::<Vec<_>>()
        };
        let before = legacy(&store);
        let per_method = store.excess_records().unwrap();

        assert_eq!(switch_canonical(&mut store, Method::Precomputed).unwrap(), Method::Bootstrap);
        assert_ne!(legacy(&store), before);
        switch_canonical(&mut store, Method::Bootstrap).unwrap();

        let after = legacy(&store);
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.excess.total.to_bits(), b.excess.total.to_bits());
            assert_eq!(a.yll.fire.to_bits(), b.yll.fire.to_bits());
        }
        assert_eq!(before, after);
        assert_eq!(store.excess_records().unwrap(), per_method);
    }

    #[test]
    fn decomposition_writes_two_records_per_county() {
        let mut store = populated();
        let index = index(&store);
        let model = GemmModel::new();
        let report = run_decomposition(&index, &model, &mut store, 1, 2006, 2023).unwrap();

        assert_eq!(report.stats.decomposed, 2);
        let rows = store.decomposition_records().unwrap();
        assert_eq!(rows.len(), 4);
        for r in &rows {
            assert!(r.is_finite());
            if r.total_change != 0.0 {
                assert!((r.share_sum() - 100.0).abs() < 1e-6);
            }
        }
    }

    /// Delegates to a memory store but fails every write after `fail_after`,
    /// and the next commit while `fail_commit` is set.
    struct FlakyStore {
        inner: MemoryBurdenStore,
        writes: usize,
        fail_after: usize,
        fail_commit: bool,
    }

    impl FlakyStore {
        fn new(inner: MemoryBurdenStore) -> Self {
            Self {
                inner,
                writes: 0,
                fail_after: usize::MAX,
                fail_commit: false,
            }
        }
    }

    impl BurdenStore for FlakyStore {
        fn begin_stage(&mut self, table: OutputTable) -> Result<StageTicket, BurdenError> {
            self.inner.begin_stage(table)
        }

        fn write_excess(
            &mut self,
            ticket: &StageTicket,
            records: &[ExcessBurdenRecord],
        ) -> Result<(), BurdenError> {
            self.writes += 1;
            if self.writes > self.fail_after {
                return Err(BurdenError::Storage("write failed".into()));
            }
            self.inner.write_excess(ticket, records)
        }

        fn write_decomposition(
            &mut self,
            ticket: &StageTicket,
            records: &[DecompositionRecord],
        ) -> Result<(), BurdenError> {
            self.inner.write_decomposition(ticket, records)
        }

        fn commit_stage(&mut self, ticket: StageTicket) -> Result<StageManifest, BurdenError> {
            if std::mem::take(&mut self.fail_commit) {
                return Err(BurdenError::Storage("commit failed".into()));
            }
            self.inner.commit_stage(ticket)
        }

        fn abort_stage(&mut self, ticket: StageTicket) -> Result<(), BurdenError> {
            self.inner.abort_stage(ticket)
        }

        fn excess_records(&self) -> Result<Vec<ExcessBurdenRecord>, BurdenError> {
            self.inner.excess_records()
        }

        fn decomposition_records(&self) -> Result<Vec<DecompositionRecord>, BurdenError> {
            self.inner.decomposition_records()
        }

        fn manifest(&self, table: OutputTable) -> Result<Option<StageManifest>, BurdenError> {
            self.inner.manifest(table)
        }

        fn canonical_method(&self) -> Result<Method, BurdenError> {
            self.inner.canonical_method()
        }

        fn set_canonical_method(&mut self, method: Method) -> Result<(), BurdenError> {
            self.inner.set_canonical_method(method)
        }
    }

    #[test]
    fn failed_batch_leaves_previous_table() {
        let store = populated();
        let index = index(&store);
        let model = GemmModel::new();
        let mut flaky = FlakyStore::new(store);
        run_attribution(&index, &model, &mut flaky, 4, None).unwrap();
        let committed = flaky.excess_records().unwrap();
        let manifest = flaky.manifest(OutputTable::Excess).unwrap();

        flaky.writes = 0;
        flaky.fail_after = 2;
        let err = run_attribution(&index, &model, &mut flaky, 4, Some(Method::Precomputed)).unwrap_err();
        assert!(matches!(err, BurdenError::Storage(_)));

        assert_eq!(flaky.excess_records().unwrap(), committed);
        assert_eq!(flaky.manifest(OutputTable::Excess).unwrap(), manifest);
        // A failed stage does not apply the requested canonical method.
        assert_eq!(flaky.canonical_method().unwrap(), Method::Model);
        // The stage was released, so a retry can proceed.
        let retry = flaky.begin_stage(OutputTable::Excess);
        assert!(!matches!(retry, Err(BurdenError::Store(StoreError::StageInProgress(_)))));
    }

    #[test]
    fn failed_commit_releases_stage_for_retry() {
        let store = populated();
        let index = index(&store);
        let model = GemmModel::new();
        let mut flaky = FlakyStore::new(store);
        run_attribution(&index, &model, &mut flaky, 4, None).unwrap();
        let committed = flaky.excess_records().unwrap();
        let manifest = flaky.manifest(OutputTable::Excess).unwrap();

        flaky.fail_commit = true;
        let err = run_attribution(&index, &model, &mut flaky, 4, Some(Method::Bootstrap)).unwrap_err();
        assert!(matches!(err, BurdenError::Storage(_)));
        assert_eq!(flaky.excess_records().unwrap(), committed);
        assert_eq!(flaky.manifest(OutputTable::Excess).unwrap(), manifest);
        assert_eq!(flaky.canonical_method().unwrap(), Method::Model);

        let retry = run_attribution(&index, &model, &mut flaky, 4, Some(Method::Bootstrap)).unwrap();
        assert_eq!(retry.manifest.rows, committed.len() as u64);
        assert!(retry.manifest.generation > manifest.as_ref().unwrap().generation);
        assert_eq!(flaky.excess_records().unwrap(), committed);
        assert_eq!(flaky.canonical_method().unwrap(), Method::Bootstrap);
    }

    #[test]
    fn inputs_survive_output_rewrites() {
        let mut store = populated();
        let before = store.population_rows().unwrap().len();
        let index = index(&store);
        run_attribution(&index, &GemmModel::new(), &mut store, 10, None).unwrap();
        assert_eq!(store.population_rows().unwrap().len(), before);
    }
}
