//! Bounded-batch writes into a staged output table.

use std::time::Instant;

use ember_core::error::BurdenError;
use ember_core::store::BurdenStore;
use ember_core::types::{
    DecompositionRecord, ExcessBurdenRecord, OutputTable, StageManifest, StageTicket,
};
use tracing::{info, warn};

/// A row type belonging to one output table.
pub trait StageRecord: Sized {
    const TABLE: OutputTable;

    fn write<S: BurdenStore + ?Sized>(
        store: &mut S,
        ticket: &StageTicket,
        rows: &[Self],
    ) -> Result<(), BurdenError>;
}

impl StageRecord for ExcessBurdenRecord {
    const TABLE: OutputTable = OutputTable::Excess;

    fn write<S: BurdenStore + ?Sized>(
        store: &mut S,
        ticket: &StageTicket,
        rows: &[Self],
    ) -> Result<(), BurdenError> {
        store.write_excess(ticket, rows)
    }
}

impl StageRecord for DecompositionRecord {
    const TABLE: OutputTable = OutputTable::Decomposition;

    fn write<S: BurdenStore + ?Sized>(
        store: &mut S,
        ticket: &StageTicket,
        rows: &[Self],
    ) -> Result<(), BurdenError> {
        store.write_decomposition(ticket, rows)
    }
}

/// Buffers records and flushes them to an open stage every `batch_size` rows.
///
/// Nothing becomes visible until [`BatchWriter::finish`] commits the stage.
pub struct BatchWriter<'s, S: BurdenStore + ?Sized, R: StageRecord> {
    store: &'s mut S,
    ticket: StageTicket,
    buffer: Vec<R>,
    batch_size: usize,
    batches: u64,
    written: u64,
}

impl<'s, S: BurdenStore + ?Sized, R: StageRecord> BatchWriter<'s, S, R> {
    /// Open a stage for `R::TABLE`. A `batch_size` of 0 is treated as 1.
    pub fn begin(store: &'s mut S, batch_size: usize) -> Result<Self, BurdenError> {
        let ticket = store.begin_stage(R::TABLE)?;
        let batch_size = batch_size.max(1);
        Ok(Self {
            store,
            ticket,
            buffer: Vec::with_capacity(batch_size),
            batch_size,
            batches: 0,
            written: 0,
        })
    }

    pub fn push(&mut self, record: R) -> Result<(), BurdenError> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BurdenError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        R::write(&mut *self.store, &self.ticket, &self.buffer)?;
        self.batches += 1;
        self.written += self.buffer.len() as u64;
        info!(
            table = R::TABLE.name(),
            batch = self.batches,
            size = self.buffer.len(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            total = self.written,
            "wrote batch"
        );
        self.buffer.clear();
        Ok(())
    }

    /// Rows flushed so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush the remainder and commit. On failure the stage is aborted.
    pub fn finish(mut self) -> Result<StageManifest, BurdenError> {
        if let Err(e) = self.flush() {
            self.abort();
            return Err(e);
        }
        let manifest = match self.store.commit_stage(self.ticket.clone()) {
            Ok(manifest) => manifest,
            Err(e) => {
                self.abort();
                return Err(e);
            }
        };
        info!(
            table = %manifest.table,
            generation = manifest.generation,
            rows = manifest.rows,
            batches = self.batches,
            "committed stage"
        );
        Ok(manifest)
    }

    /// Drop the stage. The previously committed table stays in place.
    pub fn abort(self) {
        let table = self.ticket.table.clone();
        if let Err(e) = self.store.abort_stage(self.ticket) {
            warn!(%table, "failed to abort stage: {e}");
        } else {
            warn!(%table, discarded = self.written, "aborted stage");
        }
    }
}

/// Run `produce` against a fresh stage of `R::TABLE`, committing on success
/// and aborting on any error.
pub fn write_stage<S, R, T, F>(
    store: &mut S,
    batch_size: usize,
    produce: F,
) -> Result<(StageManifest, T), BurdenError>
where
    S: BurdenStore + ?Sized,
    R: StageRecord,
    F: FnOnce(&mut dyn FnMut(R) -> Result<(), BurdenError>) -> Result<T, BurdenError>,
{
    let mut writer = BatchWriter::<S, R>::begin(store, batch_size)?;
    let mut sink = |record: R| writer.push(record);
    let produced = produce(&mut sink);
    match produced {
        Ok(value) => Ok((writer.finish()?, value)),
        Err(e) => {
            writer.abort();
            Err(e)
        }
    }
}
