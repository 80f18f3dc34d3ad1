//! Read, normalize, pool and link a set of extracts in one call.

use std::path::Path;

use svy_core::Result;

use crate::fetch::FetchedExtracts;
use crate::link::{LinkReport, LinkageSchema, LinkageTable, link};
use crate::pool::{PooledTable, pool};
use crate::schema::{YearExtract, YearSchema, normalize};
use crate::table::read_table;

/// Read one full-year file and normalize it with the MEPS schema for `year`.
pub fn load_year(path: &Path, year: i32) -> Result<YearExtract> {
    load_year_with(path, &YearSchema::meps(year))
}

/// Read one full-year file with an explicit schema.
pub fn load_year_with(path: &Path, schema: &YearSchema) -> Result<YearExtract> {
    let table = read_table(path, Some(&schema.source_columns()))?;
    normalize(&table, schema)
}

/// Read the linkage file.
pub fn load_linkage(path: &Path, schema: &LinkageSchema) -> Result<LinkageTable> {
    let table = read_table(path, Some(&schema.columns()))?;
    LinkageTable::from_raw(&table, schema)
}

/// Full data preparation: every year normalized, pooled at `cutoff`, and
/// left-joined with the linkage design codes.
pub fn build_pooled(
    extracts: &FetchedExtracts,
    cutoff: i32,
    linkage_schema: &LinkageSchema,
) -> Result<(PooledTable, LinkReport)> {
    let years = extracts
        .full_year
        .iter()
        .map(|(year, path)| {
            tracing::info!(year, path = %path.display(), "reading full-year extract");
            load_year(path, *year)
        })
        .collect::<Result<Vec<_>>>()?;
    let pooled = pool(years, cutoff)?;
    let linkage = load_linkage(&extracts.linkage, linkage_schema)?;
    Ok(link(pooled, &linkage))
}
