//! RocksDB-backed store for raw inputs and output tables.
//!
//! Every dataset lives in its own column family. Keys are prefixed with a
//! big-endian generation number; readers only see the active generation.
//!
//! A rewrite opens generation `n + 1`, writes it in batches, and commits with
//! a single [`WriteBatch`] that flips the active pointer, range-deletes every
//! older generation, and records the manifest. A stage that is aborted, or a
//! process that dies mid-stage, leaves the previous generation active; the
//! orphaned rows are cleared when the next stage opens.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};

use ember_core::error::{BurdenError, StoreError};
use ember_core::store::{BurdenStore, InputSource};
use ember_core::types::{
    BaselineRateRow, BootstrapBinRow, DecompositionRecord, ExcessBurdenRecord, Method,
    OutputTable, PollutionSummary, PopulationRow, PrecomputedBinRow, StageManifest, StageTicket,
};

// --- Column family names ---

pub(crate) const CF_POLLUTION: &str = "pollution";
pub(crate) const CF_POPULATION: &str = "population";
pub(crate) const CF_BASELINE: &str = "baseline";
pub(crate) const CF_BOOTSTRAP_BINS: &str = "bootstrap_bins";
pub(crate) const CF_PRECOMPUTED_BINS: &str = "precomputed_bins";
const CF_EXCESS: &str = "excess_burden";
const CF_DECOMPOSITION: &str = "decomposition";
const CF_METADATA: &str = "metadata";

/// All column family names.
const ALL_CFS: &[&str] = &[
    CF_POLLUTION,
    CF_POPULATION,
    CF_BASELINE,
    CF_BOOTSTRAP_BINS,
    CF_PRECOMPUTED_BINS,
    CF_EXCESS,
    CF_DECOMPOSITION,
    CF_METADATA,
];

// --- Metadata keys ---

const META_CANONICAL_METHOD: &[u8] = b"canonical_method";

fn meta_key(kind: &str, table: &str) -> Vec<u8> {
    format!("{kind}/{table}").into_bytes()
}

/// First key of generation `generation`.
fn generation_prefix(generation: u64) -> [u8; 8] {
    generation.to_be_bytes()
}

fn storage_err(e: impl std::fmt::Display) -> BurdenError {
    BurdenError::Storage(e.to_string())
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, BurdenError> {
    bincode::encode_to_vec(value, bincode::config::standard()).map_err(storage_err)
}

fn cf_handle<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily, BurdenError> {
    db.cf_handle(name)
        .ok_or_else(|| BurdenError::Storage(format!("missing column family: {name}")))
}

/// Sort key of an excess burden row: `fips || 0x00 || year BE || band`.
fn excess_key(record: &ExcessBurdenRecord) -> Vec<u8> {
    let mut key = Vec::with_capacity(record.fips.len() + 4);
    key.extend_from_slice(record.fips.as_bytes());
    key.push(0);
    key.extend_from_slice(&record.year.to_be_bytes());
    key.push(record.age_group.band());
    key
}

/// Sort key of a decomposition row: `fips || 0x00 || start BE || end BE || marker`.
///
/// Markers are stored as their two's-complement byte, so fire (-2 = 0xFE)
/// sorts before total (-1 = 0xFF) as the signed markers do.
fn decomposition_key(record: &DecompositionRecord) -> Vec<u8> {
    let mut key = Vec::with_capacity(record.fips.len() + 6);
    key.extend_from_slice(record.fips.as_bytes());
    key.push(0);
    key.extend_from_slice(&record.start_year.to_be_bytes());
    key.extend_from_slice(&record.end_year.to_be_bytes());
    key.push(record.exposure.marker() as u8);
    key
}

/// Where rows of an open stage go.
#[derive(Debug, Clone, Copy)]
struct OpenStage {
    generation: u64,
    rows: u64,
    /// Next sequence number for rows without a natural key.
    sequence: u64,
}

/// RocksDB-backed input and output storage.
///
/// Owns the database exclusively; at most one stage per table may be open.
pub struct RocksStore {
    db: DB,
    open: HashMap<String, OpenStage>,
}

impl RocksStore {
    /// Open or create a database at `path`, creating missing column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BurdenError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(storage_err)?;

        Ok(Self {
            db,
            open: HashMap::new(),
        })
    }

    // --- Generations ---

    fn get_meta_u64(&self, key: &[u8]) -> Result<Option<u64>, BurdenError> {
        let cf = cf_handle(&self.db, CF_METADATA)?;
        match self.db.get_cf(&cf, key).map_err(storage_err)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| BurdenError::Storage("invalid metadata value length".into()))?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    fn active_generation(&self, table: &str) -> Result<Option<u64>, BurdenError> {
        self.get_meta_u64(&meta_key("active", table))
    }

    /// Open a new generation of `table`, clearing rows orphaned by earlier stages.
    fn begin(&mut self, table: &str) -> Result<StageTicket, BurdenError> {
        if self.open.contains_key(table) {
            return Err(StoreError::StageInProgress(table.to_string()).into());
        }
        let active = self.active_generation(table)?;
        let next_key = meta_key("next", table);
        let generation = self.get_meta_u64(&next_key)?.unwrap_or(1);

        let cf = cf_handle(&self.db, table)?;
        let meta = cf_handle(&self.db, CF_METADATA)?;
        let mut batch = WriteBatch::default();
        let orphan_start = active.map_or(0, |g| g + 1);
        batch.delete_range_cf(&cf, generation_prefix(orphan_start), generation_prefix(u64::MAX));
        batch.put_cf(&meta, &next_key, (generation + 1).to_be_bytes());
        self.db.write(batch).map_err(storage_err)?;

        self.open.insert(
            table.to_string(),
            OpenStage {
                generation,
                rows: 0,
                sequence: 0,
            },
        );
        tracing::debug!(table, generation, "opened stage");
        Ok(StageTicket {
            table: table.to_string(),
            generation,
        })
    }

    fn open_stage(&mut self, ticket: &StageTicket, table: &str) -> Result<&mut OpenStage, BurdenError> {
        match self.open.get_mut(table) {
            Some(stage) if ticket.table == table && stage.generation == ticket.generation => {
                Ok(stage)
            }
            _ => Err(StoreError::UnknownStage {
                table: ticket.table.clone(),
                generation: ticket.generation,
            }
            .into()),
        }
    }

    /// Write `rows` into the open stage of `table`, keyed by `key_of`.
    fn put_rows<T, K>(
        &mut self,
        ticket: &StageTicket,
        table: &str,
        rows: &[T],
        key_of: K,
    ) -> Result<(), BurdenError>
    where
        T: bincode::Encode,
        K: Fn(&T, u64) -> Vec<u8>,
    {
        let stage = *self.open_stage(ticket, table)?;
        let cf = cf_handle(&self.db, table)?;
        let prefix = generation_prefix(stage.generation);

        let mut batch = WriteBatch::default();
        for (i, row) in rows.iter().enumerate() {
            let mut key = prefix.to_vec();
            key.extend_from_slice(&key_of(row, stage.sequence + i as u64));
            batch.put_cf(&cf, key, encode(row)?);
        }
        self.db.write(batch).map_err(storage_err)?;

        let stage = self.open_stage(ticket, table)?;
        stage.rows += rows.len() as u64;
        stage.sequence += rows.len() as u64;
        Ok(())
    }

    fn commit(&mut self, ticket: &StageTicket, table: &str) -> Result<StageManifest, BurdenError> {
        let stage = *self.open_stage(ticket, table)?;
        let manifest = StageManifest {
            table: table.to_string(),
            generation: stage.generation,
            rows: stage.rows,
            committed_at: Utc::now(),
        };
        let manifest_bytes = serde_json::to_vec(&manifest).map_err(storage_err)?;

        let cf = cf_handle(&self.db, table)?;
        let meta = cf_handle(&self.db, CF_METADATA)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&meta, meta_key("active", table), stage.generation.to_be_bytes());
        batch.put_cf(&meta, meta_key("manifest", table), manifest_bytes);
        batch.delete_range_cf(&cf, generation_prefix(0), generation_prefix(stage.generation));
        self.db.write(batch).map_err(storage_err)?;

        self.open.remove(table);
        tracing::debug!(table, generation = stage.generation, rows = stage.rows, "committed generation");
        Ok(manifest)
    }

    fn abort(&mut self, ticket: &StageTicket, table: &str) -> Result<(), BurdenError> {
        let stage = *self.open_stage(ticket, table)?;
        let cf = cf_handle(&self.db, table)?;
        self.db
            .delete_range_cf(
                &cf,
                generation_prefix(stage.generation),
                generation_prefix(stage.generation + 1),
            )
            .map_err(storage_err)?;
        self.open.remove(table);
        Ok(())
    }

    /// Decode every row of the active generation of `table`, in key order.
    fn read_active<T: bincode::Decode<()>>(&self, table: &str) -> Result<Vec<T>, BurdenError> {
        let Some(generation) = self.active_generation(table)? else {
            return Ok(Vec::new());
        };
        let cf = cf_handle(&self.db, table)?;
        let prefix = generation_prefix(generation);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut rows = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(storage_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            let (row, _): (T, usize) =
                bincode::decode_from_slice(&value, bincode::config::standard()).map_err(|e| {
                    StoreError::Corrupt {
                        table: table.to_string(),
                        reason: e.to_string(),
                    }
                })?;
            rows.push(row);
        }
        Ok(rows)
    }

    // --- Raw datasets ---

    /// Replace a raw input dataset wholesale. Row order is preserved.
    pub(crate) fn replace_dataset<T: bincode::Encode>(
        &mut self,
        table: &str,
        rows: &[T],
        batch_size: usize,
    ) -> Result<StageManifest, BurdenError> {
        let ticket = self.begin(table)?;
        for chunk in rows.chunks(batch_size.max(1)) {
            let written = self.put_rows(&ticket, table, chunk, |_, seq| seq.to_be_bytes().to_vec());
            if let Err(e) = written {
                self.abort(&ticket, table)?;
                return Err(e);
            }
        }
        self.commit(&ticket, table)
    }

    pub fn replace_pollution(&mut self, rows: &[PollutionSummary]) -> Result<StageManifest, BurdenError> {
        self.replace_dataset(CF_POLLUTION, rows, usize::MAX)
    }

    pub fn replace_population(&mut self, rows: &[PopulationRow]) -> Result<StageManifest, BurdenError> {
        self.replace_dataset(CF_POPULATION, rows, usize::MAX)
    }

    pub fn replace_baseline(&mut self, rows: &[BaselineRateRow]) -> Result<StageManifest, BurdenError> {
        self.replace_dataset(CF_BASELINE, rows, usize::MAX)
    }

    pub fn replace_bootstrap_bins(&mut self, rows: &[BootstrapBinRow]) -> Result<StageManifest, BurdenError> {
        self.replace_dataset(CF_BOOTSTRAP_BINS, rows, usize::MAX)
    }

    pub fn replace_precomputed_bins(
        &mut self,
        rows: &[PrecomputedBinRow],
    ) -> Result<StageManifest, BurdenError> {
        self.replace_dataset(CF_PRECOMPUTED_BINS, rows, usize::MAX)
    }

    /// Manifest of the last committed rewrite of any column family.
    pub fn table_manifest(&self, table: &str) -> Result<Option<StageManifest>, BurdenError> {
        let meta = cf_handle(&self.db, CF_METADATA)?;
        match self
            .db
            .get_cf(&meta, meta_key("manifest", table))
            .map_err(storage_err)?
        {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                StoreError::Corrupt {
                    table: table.to_string(),
                    reason: e.to_string(),
                }
                .into()
            }),
            None => Ok(None),
        }
    }
}

impl InputSource for RocksStore {
    fn pollution_summaries(&self) -> Result<Vec<PollutionSummary>, BurdenError> {
        self.read_active(CF_POLLUTION)
    }

    fn population_rows(&self) -> Result<Vec<PopulationRow>, BurdenError> {
        self.read_active(CF_POPULATION)
    }

    fn baseline_rows(&self) -> Result<Vec<BaselineRateRow>, BurdenError> {
        self.read_active(CF_BASELINE)
    }

    fn bootstrap_bin_rows(&self) -> Result<Vec<BootstrapBinRow>, BurdenError> {
        self.read_active(CF_BOOTSTRAP_BINS)
    }

    fn precomputed_bin_rows(&self) -> Result<Vec<PrecomputedBinRow>, BurdenError> {
        self.read_active(CF_PRECOMPUTED_BINS)
    }
}

impl BurdenStore for RocksStore {
    fn begin_stage(&mut self, table: OutputTable) -> Result<StageTicket, BurdenError> {
        self.begin(table.name())
    }

    fn write_excess(
        &mut self,
        ticket: &StageTicket,
        records: &[ExcessBurdenRecord],
    ) -> Result<(), BurdenError> {
        self.put_rows(ticket, CF_EXCESS, records, |r, _| excess_key(r))
    }

    fn write_decomposition(
        &mut self,
        ticket: &StageTicket,
        records: &[DecompositionRecord],
    ) -> Result<(), BurdenError> {
        self.put_rows(ticket, CF_DECOMPOSITION, records, |r, _| decomposition_key(r))
    }

    fn commit_stage(&mut self, ticket: StageTicket) -> Result<StageManifest, BurdenError> {
        let table = ticket.table.clone();
        self.commit(&ticket, &table)
    }

    fn abort_stage(&mut self, ticket: StageTicket) -> Result<(), BurdenError> {
        let table = ticket.table.clone();
        self.abort(&ticket, &table)
    }

    fn excess_records(&self) -> Result<Vec<ExcessBurdenRecord>, BurdenError> {
        self.read_active(CF_EXCESS)
    }

    fn decomposition_records(&self) -> Result<Vec<DecompositionRecord>, BurdenError> {
        self.read_active(CF_DECOMPOSITION)
    }

    fn manifest(&self, table: OutputTable) -> Result<Option<StageManifest>, BurdenError> {
        self.table_manifest(table.name())
    }

    fn canonical_method(&self) -> Result<Method, BurdenError> {
        let meta = cf_handle(&self.db, CF_METADATA)?;
        match self.db.get_cf(&meta, META_CANONICAL_METHOD).map_err(storage_err)? {
            Some(bytes) => match bytes.as_slice() {
                [tag] => Method::from_tag(*tag).ok_or_else(|| {
                    BurdenError::Storage(format!("unknown canonical method tag: {tag}"))
                }),
                _ => Err(BurdenError::Storage("invalid canonical method length".into())),
            },
            None => Ok(Method::default()),
        }
    }

    fn set_canonical_method(&mut self, method: Method) -> Result<(), BurdenError> {
        let meta = cf_handle(&self.db, CF_METADATA)?;
        self.db
            .put_cf(&meta, META_CANONICAL_METHOD, [method.tag()])
            .map_err(storage_err)
    }
}
