//! Error types for the Ember pipeline.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("invalid age group: {0}")] InvalidAgeGroup(u8),
    #[error("unknown age class label: {0:?}")] UnknownAgeClass(String),
    #[error("line {line}: {reason}")] MalformedLine { line: usize, reason: String },
    #[error("ambiguous baseline rate for {fips} {year} age group {age_group}: {count} canonical rows")] AmbiguousBaseline { fips: String, year: u16, age_group: u8, count: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BinParseError {
    #[error("malformed bin boundary: {0:?}")] Malformed(String),
    #[error("empty bin [{lower}, {upper})")] Empty { lower: String, upper: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("stage already open for table {0}")] StageInProgress(String),
    #[error("no open stage for table {table} generation {generation}")] UnknownStage { table: String, generation: u64 },
    #[error("corrupt record in {table}: {reason}")] Corrupt { table: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown attribution method: {0:?} (expected model, bootstrap or precomputed)")]
pub struct ParseMethodError(pub String);

#[derive(Error, Debug)]
pub enum BurdenError {
    #[error(transparent)] Load(#[from] LoadError),
    #[error(transparent)] Bin(#[from] BinParseError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Method(#[from] ParseMethodError),
    #[error("storage: {0}")] Storage(String),
    #[error("invalid configuration: {0}")] Config(String),
}
