//! JSON Lines import of the raw input datasets.
//!
//! One JSON object per line; blank lines are ignored. A dataset is replaced
//! only if every line parses.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use ember_core::error::{BurdenError, LoadError};
use ember_core::types::{
    BaselineRateRow, BootstrapBinRow, PollutionSummary, PopulationRow, PrecomputedBinRow,
    StageManifest,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::info;

use crate::storage::{
    RocksStore, CF_BASELINE, CF_BOOTSTRAP_BINS, CF_POLLUTION, CF_POPULATION, CF_PRECOMPUTED_BINS,
};

/// Raw input datasets accepted by [`import_jsonl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Pollution,
    Population,
    Baseline,
    BootstrapBins,
    PrecomputedBins,
}

impl Dataset {
    pub const ALL: [Dataset; 5] = [
        Dataset::Pollution,
        Dataset::Population,
        Dataset::Baseline,
        Dataset::BootstrapBins,
        Dataset::PrecomputedBins,
    ];

    /// Column family holding the dataset.
    pub fn table(self) -> &'static str {
        match self {
            Self::Pollution => CF_POLLUTION,
            Self::Population => CF_POPULATION,
            Self::Baseline => CF_BASELINE,
            Self::BootstrapBins => CF_BOOTSTRAP_BINS,
            Self::PrecomputedBins => CF_PRECOMPUTED_BINS,
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown dataset {0:?} (expected pollution, population, baseline, bootstrap-bins or precomputed-bins)")]
pub struct ParseDatasetError(pub String);

impl FromStr for Dataset {
    type Err = ParseDatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Dataset::ALL
            .into_iter()
            .find(|d| d.table() == normalized)
            .ok_or_else(|| ParseDatasetError(s.to_string()))
    }
}

/// Parse every non-blank line of `reader` as a `T`.
pub fn parse_jsonl<T, R>(reader: R) -> Result<Vec<T>, BurdenError>
where
    T: DeserializeOwned,
    R: BufRead,
{
    let mut rows = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| BurdenError::Storage(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|e| LoadError::MalformedLine {
            line: i + 1,
            reason: e.to_string(),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Replace `dataset` in `store` with the rows read from `reader`.
pub fn import_jsonl<R: BufRead>(
    store: &mut RocksStore,
    dataset: Dataset,
    reader: R,
    batch_size: usize,
) -> Result<StageManifest, BurdenError> {
    let table = dataset.table();
    let manifest = match dataset {
        Dataset::Pollution => {
            store.replace_dataset(table, &parse_jsonl::<PollutionSummary, _>(reader)?, batch_size)?
        }
        Dataset::Population => {
            store.replace_dataset(table, &parse_jsonl::<PopulationRow, _>(reader)?, batch_size)?
        }
        Dataset::Baseline => {
            store.replace_dataset(table, &parse_jsonl::<BaselineRateRow, _>(reader)?, batch_size)?
        }
        Dataset::BootstrapBins => {
            store.replace_dataset(table, &parse_jsonl::<BootstrapBinRow, _>(reader)?, batch_size)?
        }
        Dataset::PrecomputedBins => {
            store.replace_dataset(table, &parse_jsonl::<PrecomputedBinRow, _>(reader)?, batch_size)?
        }
    };
    info!(%dataset, rows = manifest.rows, generation = manifest.generation, "imported dataset");
    Ok(manifest)
}

/// [`import_jsonl`] reading from a file.
pub fn import_file(
    store: &mut RocksStore,
    dataset: Dataset,
    path: &Path,
    batch_size: usize,
) -> Result<StageManifest, BurdenError> {
    let file = File::open(path)
        .map_err(|e| BurdenError::Storage(format!("{}: {e}", path.display())))?;
    import_jsonl(store, dataset, BufReader::new(file), batch_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_names_parse() {
        assert_eq!("bootstrap-bins".parse::<Dataset>().unwrap(), Dataset::BootstrapBins);
        assert_eq!("Precomputed_Bins".parse::<Dataset>().unwrap(), Dataset::PrecomputedBins);
        assert_eq!("pollution".parse::<Dataset>().unwrap(), Dataset::Pollution);
        assert!("weather".parse::<Dataset>().is_err());
    }

    #[test]
    fn blank_lines_skipped() {
        let input = "{\"fips\":\"01001\",\"year\":2020,\"age_group\":9,\"population\":120}\n\n  \n\
                     {\"fips\":\"01001\",\"year\":2020,\"age_group\":10,\"population\":null}\n";
        let rows: Vec<PopulationRow> = parse_jsonl(input.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].population, Some(120));
        assert_eq!(rows[1].population, None);
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let input = "{\"fips\":\"01001\",\"year\":2020,\"age_group\":9,\"population\":1}\n{oops}\n";
        let err = parse_jsonl::<PopulationRow, _>(input.as_bytes()).unwrap_err();
        assert!(matches!(err, BurdenError::Load(LoadError::MalformedLine { line: 2, .. })));
    }
}
