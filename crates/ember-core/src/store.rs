//! Store interfaces and in-memory implementation.
//!
//! [`InputSource`] exposes the raw datasets the lookup index is built from.
//! [`BurdenStore`] holds the output tables. Every output table is rewritten
//! through a stage: rows written under a [`StageTicket`] stay invisible until
//! [`BurdenStore::commit_stage`] swaps the whole table at once, and an aborted
//! stage leaves the previously committed table untouched.
//!
//! [`MemoryBurdenStore`] is suitable for testing; the production pipeline uses
//! RocksDB (ember-store).

use chrono::Utc;

use crate::error::{BurdenError, StoreError};
use crate::types::{
    BaselineRateRow, BootstrapBinRow, DecompositionRecord, ExcessBurdenRecord, Method,
    OutputTable, PollutionSummary, PopulationRow, PrecomputedBinRow, StageManifest, StageTicket,
};

/// Read access to the raw input datasets.
pub trait InputSource {
    fn pollution_summaries(&self) -> Result<Vec<PollutionSummary>, BurdenError>;

    fn population_rows(&self) -> Result<Vec<PopulationRow>, BurdenError>;

    fn baseline_rows(&self) -> Result<Vec<BaselineRateRow>, BurdenError>;

    fn bootstrap_bin_rows(&self) -> Result<Vec<BootstrapBinRow>, BurdenError>;

    fn precomputed_bin_rows(&self) -> Result<Vec<PrecomputedBinRow>, BurdenError>;
}

/// Output table storage with staged, all-or-nothing rewrites.
///
/// At most one stage may be open per table.
pub trait BurdenStore {
    /// Open a stage that will replace `table` when committed.
    ///
    /// # Errors
    ///
    /// [`StoreError::StageInProgress`] if a stage for `table` is already open.
    fn begin_stage(&mut self, table: OutputTable) -> Result<StageTicket, BurdenError>;

    /// Append excess burden rows to an open stage.
    fn write_excess(
        &mut self,
        ticket: &StageTicket,
        records: &[ExcessBurdenRecord],
    ) -> Result<(), BurdenError>;

    /// Append decomposition rows to an open stage.
    fn write_decomposition(
        &mut self,
        ticket: &StageTicket,
        records: &[DecompositionRecord],
    ) -> Result<(), BurdenError>;

    /// Atomically replace the table with the staged rows.
    fn commit_stage(&mut self, ticket: StageTicket) -> Result<StageManifest, BurdenError>;

    /// Discard the staged rows. The committed table is unchanged.
    fn abort_stage(&mut self, ticket: StageTicket) -> Result<(), BurdenError>;

    /// Committed excess burden rows, sorted by (fips, year, age group).
    fn excess_records(&self) -> Result<Vec<ExcessBurdenRecord>, BurdenError>;

    /// Committed decomposition rows, sorted by (fips, start, end, exposure).
    fn decomposition_records(&self) -> Result<Vec<DecompositionRecord>, BurdenError>;

    /// Manifest of the last committed rewrite of `table`, if any.
    fn manifest(&self, table: OutputTable) -> Result<Option<StageManifest>, BurdenError>;

    /// Method whose figures back the legacy fields of excess burden rows.
    fn canonical_method(&self) -> Result<Method, BurdenError>;

    /// Select the canonical method. Per-method figures are not touched.
    fn set_canonical_method(&mut self, method: Method) -> Result<(), BurdenError>;
}

#[derive(Debug)]
struct MemoryTable<R> {
    rows: Vec<R>,
    manifest: Option<StageManifest>,
    staged: Option<(u64, Vec<R>)>,
    next_generation: u64,
}

impl<R> Default for MemoryTable<R> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            manifest: None,
            staged: None,
            next_generation: 0,
        }
    }
}

impl<R> MemoryTable<R> {
    fn begin(&mut self, table: OutputTable) -> Result<StageTicket, BurdenError> {
        if self.staged.is_some() {
            return Err(StoreError::StageInProgress(table.name().to_string()).into());
        }
        self.next_generation += 1;
        self.staged = Some((self.next_generation, Vec::new()));
        Ok(StageTicket {
            table: table.name().to_string(),
            generation: self.next_generation,
        })
    }

    fn staged_rows(&mut self, ticket: &StageTicket) -> Result<&mut Vec<R>, BurdenError> {
        match &mut self.staged {
            Some((generation, rows)) if *generation == ticket.generation => Ok(rows),
            _ => Err(StoreError::UnknownStage {
                table: ticket.table.clone(),
                generation: ticket.generation,
            }
            .into()),
        }
    }

    fn commit(&mut self, ticket: &StageTicket) -> Result<StageManifest, BurdenError> {
        let rows = std::mem::take(self.staged_rows(ticket)?);
        self.staged = None;
        let manifest = StageManifest {
            table: ticket.table.clone(),
            generation: ticket.generation,
            rows: rows.len() as u64,
            committed_at: Utc::now(),
        };
        self.rows = rows;
        self.manifest = Some(manifest.clone());
        Ok(manifest)
    }

    fn abort(&mut self, ticket: &StageTicket) -> Result<(), BurdenError> {
        self.staged_rows(ticket)?;
        self.staged = None;
        Ok(())
    }
}

/// In-memory store holding both the raw inputs and the output tables.
#[derive(Debug, Default)]
pub struct MemoryBurdenStore {
    pub pollution: Vec<PollutionSummary>,
    pub population: Vec<PopulationRow>,
    pub baseline: Vec<BaselineRateRow>,
    pub bootstrap_bins: Vec<BootstrapBinRow>,
    pub precomputed_bins: Vec<PrecomputedBinRow>,
    excess: MemoryTable<ExcessBurdenRecord>,
    decomposition: MemoryTable<DecompositionRecord>,
    canonical: Method,
}

impl MemoryBurdenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_table(ticket: &StageTicket, table: OutputTable) -> Result<(), BurdenError> {
        if ticket.table == table.name() {
            Ok(())
        } else {
            Err(StoreError::UnknownStage {
                table: ticket.table.clone(),
                generation: ticket.generation,
            }
            .into())
        }
    }
}

impl InputSource for MemoryBurdenStore {
    fn pollution_summaries(&self) -> Result<Vec<PollutionSummary>, BurdenError> {
        Ok(self.pollution.clone())
    }

    fn population_rows(&self) -> Result<Vec<PopulationRow>, BurdenError> {
        Ok(self.population.clone())
    }

    fn baseline_rows(&self) -> Result<Vec<BaselineRateRow>, BurdenError> {
        Ok(self.baseline.clone())
    }

    fn bootstrap_bin_rows(&self) -> Result<Vec<BootstrapBinRow>, BurdenError> {
        Ok(self.bootstrap_bins.clone())
    }

    fn precomputed_bin_rows(&self) -> Result<Vec<PrecomputedBinRow>, BurdenError> {
        Ok(self.precomputed_bins.clone())
    }
}

impl BurdenStore for MemoryBurdenStore {
    fn begin_stage(&mut self, table: OutputTable) -> Result<StageTicket, BurdenError> {
        match table {
            OutputTable::Excess => self.excess.begin(table),
            OutputTable::Decomposition => self.decomposition.begin(table),
        }
    }

    fn write_excess(
        &mut self,
        ticket: &StageTicket,
        records: &[ExcessBurdenRecord],
    ) -> Result<(), BurdenError> {
        Self::check_table(ticket, OutputTable::Excess)?;
        self.excess.staged_rows(ticket)?.extend_from_slice(records);
        Ok(())
    }

    fn write_decomposition(
        &mut self,
        ticket: &StageTicket,
        records: &[DecompositionRecord],
    ) -> Result<(), BurdenError> {
        Self::check_table(ticket, OutputTable::Decomposition)?;
        self.decomposition
            .staged_rows(ticket)?
            .extend_from_slice(records);
        Ok(())
    }

    fn commit_stage(&mut self, ticket: StageTicket) -> Result<StageManifest, BurdenError> {
        if ticket.table == OutputTable::Excess.name() {
            let manifest = self.excess.commit(&ticket)?;
            self.excess
                .rows
                .sort_by(|a, b| a.key().cmp(&b.key()));
            Ok(manifest)
        } else {
            Self::check_table(&ticket, OutputTable::Decomposition)?;
            let manifest = self.decomposition.commit(&ticket)?;
            self.decomposition
                .rows
                .sort_by(|a, b| a.key().cmp(&b.key()));
            Ok(manifest)
        }
    }

    fn abort_stage(&mut self, ticket: StageTicket) -> Result<(), BurdenError> {
        if ticket.table == OutputTable::Excess.name() {
            self.excess.abort(&ticket)
        } else {
            Self::check_table(&ticket, OutputTable::Decomposition)?;
            self.decomposition.abort(&ticket)
        }
    }

    fn excess_records(&self) -> Result<Vec<ExcessBurdenRecord>, BurdenError> {
        Ok(self.excess.rows.clone())
    }

    fn decomposition_records(&self) -> Result<Vec<DecompositionRecord>, BurdenError> {
        Ok(self.decomposition.rows.clone())
    }

    fn manifest(&self, table: OutputTable) -> Result<Option<StageManifest>, BurdenError> {
        Ok(match table {
            OutputTable::Excess => self.excess.manifest.clone(),
            OutputTable::Decomposition => self.decomposition.manifest.clone(),
        })
    }

    fn canonical_method(&self) -> Result<Method, BurdenError> {
        Ok(self.canonical)
    }

    fn set_canonical_method(&mut self, method: Method) -> Result<(), BurdenError> {
        self.canonical = method;
        Ok(())
    }
}
