//! Pooled-table export: CSV always, Parquet with the `arrow-io` feature.

use std::path::Path;

use svy_core::{Error, Result};

use crate::pool::{PersonYear, PooledTable};

/// Write the pooled records as CSV with a header row.
pub fn write_pooled_csv(pooled: &PooledTable, path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
    for r in &pooled.records {
        wtr.serialize(r).map_err(|e| csv_error(path, e))?;
    }
    wtr.flush()?;
    tracing::info!(path = %path.display(), rows = pooled.len(), "wrote pooled CSV");
    Ok(())
}

/// Read a pooled CSV written by [`write_pooled_csv`].
///
/// Without an explicit `cutoff` the first year with `period = 1` is used.
pub fn read_pooled_csv(path: &Path, cutoff: Option<i32>) -> Result<PooledTable> {
    let mut rdr = csv::Reader::from_path(path).map_err(|e| csv_error(path, e))?;
    let records: Vec<PersonYear> = rdr
        .deserialize()
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| csv_error(path, e))?;
    let cutoff = match cutoff {
        Some(c) => c,
        None => infer_cutoff(&records).ok_or_else(|| {
            Error::Validation(format!("{}: no records to infer the cutoff from", path.display()))
        })?,
    };
    PooledTable::from_records(records, cutoff)
}

fn infer_cutoff(records: &[PersonYear]) -> Option<i32> {
    records
        .iter()
        .filter(|r| r.period == 1)
        .map(|r| r.year)
        .min()
        .or_else(|| records.iter().map(|r| r.year + 1).max())
}

fn csv_error(path: &Path, e: csv::Error) -> Error {
    Error::Validation(format!("{}: {e}", path.display()))
}

#[cfg(feature = "arrow-io")]
pub use self::parquet_io::{ParquetError, pooled_to_record_batch, write_pooled_parquet};

#[cfg(feature = "arrow-io")]
mod parquet_io {
    use std::fs::File;
    use std::path::Path;
    use std::sync::Arc;

    use arrow::array::{ArrayRef, Float64Array, Int32Array, Int64Array, StringArray, UInt8Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use parquet::basic::Compression;
    use parquet::file::properties::WriterProperties;

    use crate::pool::PooledTable;

    /// Error type for Parquet export.
    #[derive(Debug, thiserror::Error)]
    pub enum ParquetError {
        /// Parquet writer error.
        #[error("Parquet error: {0}")]
        Parquet(#[from] parquet::errors::ParquetError),

        /// Arrow error.
        #[error("Arrow error: {0}")]
        Arrow(#[from] arrow::error::ArrowError),

        /// I/O error.
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),
    }

    /// Pooled records as one Arrow record batch.
    pub fn pooled_to_record_batch(pooled: &PooledTable) -> Result<RecordBatch, ParquetError> {
        let r = &pooled.records;
        let schema = Arc::new(Schema::new(vec![
            Field::new("dupersid", DataType::Utf8, false),
            Field::new("panel", DataType::Int64, false),
            Field::new("year", DataType::Int32, false),
            Field::new("sex", DataType::Int64, false),
            Field::new("totexp", DataType::Float64, false),
            Field::new("ertexp", DataType::Float64, false),
            Field::new("perwt", DataType::Float64, false),
            Field::new("poolwt", DataType::Float64, false),
            Field::new("period", DataType::UInt8, false),
            Field::new("varstr", DataType::Int64, true),
            Field::new("varpsu", DataType::Int64, true),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(r.iter().map(|x| x.dupersid.as_str()))),
            Arc::new(Int64Array::from_iter_values(r.iter().map(|x| x.panel))),
            Arc::new(Int32Array::from_iter_values(r.iter().map(|x| x.year))),
            Arc::new(Int64Array::from_iter_values(r.iter().map(|x| x.sex))),
            Arc::new(Float64Array::from_iter_values(r.iter().map(|x| x.totexp))),
            Arc::new(Float64Array::from_iter_values(r.iter().map(|x| x.ertexp))),
            Arc::new(Float64Array::from_iter_values(r.iter().map(|x| x.perwt))),
            Arc::new(Float64Array::from_iter_values(r.iter().map(|x| x.poolwt))),
            Arc::new(UInt8Array::from_iter_values(r.iter().map(|x| x.period))),
            Arc::new(Int64Array::from(r.iter().map(|x| x.varstr).collect::<Vec<_>>())),
            Arc::new(Int64Array::from(r.iter().map(|x| x.varpsu).collect::<Vec<_>>())),
        ];
        Ok(RecordBatch::try_new(schema, columns)?)
    }

    /// Write the pooled records to a Snappy-compressed Parquet file.
    pub fn write_pooled_parquet(pooled: &PooledTable, path: &Path) -> Result<(), ParquetError> {
        let batch = pooled_to_record_batch(pooled)?;
        let props = WriterProperties::builder().set_compression(Compression::SNAPPY).build();
        let file = File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;
        tracing::info!(path = %path.display(), rows = batch.num_rows(), "wrote pooled Parquet");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkageTable, link};
    use crate::pool::pool;
    use crate::schema::YearExtract;

    fn linked() -> PooledTable {
        let ex = |year: i32| YearExtract {
            year,
            dupersid: vec!["2460002101".into(), "2460002102".into()],
            panel: vec![24, 24],
            sex: vec![1, 2],
            totexp: vec![1523.5, 0.0],
            ertexp: vec![0.0, 0.0],
            perwt: vec![8214.73, 6123.0],
        };
        let pooled = pool(vec![ex(2018), ex(2019)], 2019).unwrap();
        link(pooled, &LinkageTable::from_rows([("2460002101".into(), 24, 3, 2)])).0
    }

    #[test]
    fn test_csv_roundtrip_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pooled.csv");
        let pooled = linked();
        write_pooled_csv(&pooled, &path).unwrap();

        let back = read_pooled_csv(&path, None).unwrap();
        assert_eq!(back.cutoff, 2019);
        assert_eq!(back, pooled);
        assert_eq!(back.records[1].varstr, None);
    }

    #[test]
    fn test_csv_cutoff_conflict_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pooled.csv");
        write_pooled_csv(&linked(), &path).unwrap();
        assert!(read_pooled_csv(&path, Some(2018)).is_err());
    }

    #[cfg(feature = "arrow-io")]
    #[test]
    fn test_parquet_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pooled.parquet");
        let batch = pooled_to_record_batch(&linked()).unwrap();
        assert_eq!(batch.num_rows(), 4);
        assert_eq!(batch.num_columns(), 11);
        write_pooled_parquet(&linked(), &path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
