//! JSON Lines export of the committed output tables.

use std::io::Write;

use ember_core::error::BurdenError;
use ember_core::store::BurdenStore;
use serde::Serialize;

fn write_line<W: Write, T: Serialize>(writer: &mut W, row: &T) -> Result<(), BurdenError> {
    serde_json::to_writer(&mut *writer, row).map_err(|e| BurdenError::Storage(e.to_string()))?;
    writer
        .write_all(b"\n")
        .map_err(|e| BurdenError::Storage(e.to_string()))
}

/// Write every excess burden row in key order, with legacy fields taken
/// from the canonical method. Returns the number of rows written.
pub fn export_excess<S, W>(store: &S, mut writer: W) -> Result<u64, BurdenError>
where
    S: BurdenStore + ?Sized,
    W: Write,
{
    let canonical = store.canonical_method()?;
    let records = store.excess_records()?;
    for record in &records {
        write_line(&mut writer, &record.view(canonical))?;
    }
    writer.flush().map_err(|e| BurdenError::Storage(e.to_string()))?;
    Ok(records.len() as u64)
}

/// Write every decomposition row in key order.
pub fn export_decomposition<S, W>(store: &S, mut writer: W) -> Result<u64, BurdenError>
where
    S: BurdenStore + ?Sized,
    W: Write,
{
    let records = store.decomposition_records()?;
    for record in &records {
        write_line(&mut writer, record)?;
    }
    writer.flush().map_err(|e| BurdenError::Storage(e.to_string()))?;
    Ok(records.len() as u64)
}
