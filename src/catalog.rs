//! Columnar per-unit catalogs (`hillslopes.parquet`, `channels.parquet`,
//! `soils.parquet`, `landuse.parquet`).
//!
//! Catalogs are rewritten whole after every successful build. Lookups filter
//! on `topaz_id` with Arrow compute kernels; a missing file is a miss, not an
//! error, and callers fall back to the controller.

use crate::error::{Error, IoContext, Result};
use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, Int32Array, StringArray};
use arrow::compute::filter_record_batch;
use arrow::compute::kernels::cmp::eq;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

pub const KEY_COLUMN: &str = "topaz_id";

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    I32(Vec<i32>),
    F64(Vec<f64>),
    OptF64(Vec<Option<f64>>),
    Str(Vec<String>),
    Bool(Vec<bool>),
}

impl Column {
    fn len(&self) -> usize {
        match self {
            Column::I32(v) => v.len(),
            Column::F64(v) => v.len(),
            Column::OptF64(v) => v.len(),
            Column::Str(v) => v.len(),
            Column::Bool(v) => v.len(),
        }
    }

    fn field(&self, name: &str) -> Field {
        match self {
            Column::I32(_) => Field::new(name, DataType::Int32, false),
            Column::F64(_) => Field::new(name, DataType::Float64, false),
            Column::OptF64(_) => Field::new(name, DataType::Float64, true),
            Column::Str(_) => Field::new(name, DataType::Utf8, false),
            Column::Bool(_) => Field::new(name, DataType::Boolean, false),
        }
    }

    fn array(&self) -> ArrayRef {
        match self {
            Column::I32(v) => Arc::new(Int32Array::from(v.clone())),
            Column::F64(v) => Arc::new(Float64Array::from(v.clone())),
            Column::OptF64(v) => Arc::new(Float64Array::from(v.clone())),
            Column::Str(v) => Arc::new(StringArray::from(v.clone())),
            Column::Bool(v) => Arc::new(BooleanArray::from(v.clone())),
        }
    }
}

/// Named columns of equal length, built up one column at a time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnarTable {
    columns: Vec<(String, Column)>,
}

impl ColumnarTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, column: Column) -> Self {
        self.columns.push((name.to_string(), column));
        self
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|(_, c)| c.len()).unwrap_or(0)
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let n = self.num_rows();
        if let Some((name, _)) = self.columns.iter().find(|(_, c)| c.len() != n) {
            return Err(Error::validation(format!(
                "catalog column {} does not have {} rows",
                name, n
            )));
        }
        let fields: Vec<Field> = self.columns.iter().map(|(n, c)| c.field(n)).collect();
        let arrays: Vec<ArrayRef> = self.columns.iter().map(|(_, c)| c.array()).collect();
        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }

    /// Writes the table to `path`, replacing any previous catalog.
    pub fn write_parquet(&self, path: &Path) -> Result<()> {
        let batch = self.to_record_batch()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        let tmp = path.with_extension("parquet.tmp");
        let file = File::create(&tmp).at(&tmp)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
        fs::rename(&tmp, path).at(path)?;
        tracing::debug!(path = %path.display(), rows = batch.num_rows(), "wrote catalog");
        Ok(())
    }
}

/// A row type with a columnar catalog representation.
pub trait CatalogRow: Sized {
    fn to_table(rows: &[Self]) -> ColumnarTable;
    fn from_batch(batch: &RecordBatch, row: usize) -> Result<Self>;
}

pub fn write_rows<T: CatalogRow>(path: &Path, rows: &[T]) -> Result<()> {
    T::to_table(rows).write_parquet(path)
}

pub fn read_batches(path: &Path) -> Result<Option<Vec<RecordBatch>>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).at(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Some(batches))
}

/// Every row of a catalog, in insertion order.
pub fn read_rows<T: CatalogRow>(path: &Path) -> Result<Option<Vec<T>>> {
    let Some(batches) = read_batches(path)? else {
        return Ok(None);
    };
    let mut rows = Vec::new();
    for batch in &batches {
        for i in 0..batch.num_rows() {
            rows.push(T::from_batch(batch, i)?);
        }
    }
    Ok(Some(rows))
}

/// The row keyed by `topaz_id`; `None` when the catalog or the row is absent.
pub fn lookup<T: CatalogRow>(path: &Path, topaz_id: i32) -> Result<Option<T>> {
    let Some(batches) = read_batches(path)? else {
        return Ok(None);
    };
    for batch in &batches {
        let keys = batch
            .column_by_name(KEY_COLUMN)
            .ok_or_else(|| Error::validation(format!("{} has no {} column", path.display(), KEY_COLUMN)))?;
        let mask = eq(keys, &Int32Array::new_scalar(topaz_id))?;
        let hits = filter_record_batch(batch, &mask)?;
        if hits.num_rows() > 0 {
            return Ok(Some(T::from_batch(&hits, 0)?));
        }
    }
    Ok(None)
}

fn column<'a, A: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a A> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<A>())
        .ok_or_else(|| Error::validation(format!("catalog column {} is missing or mistyped", name)))
}

pub fn get_i32(batch: &RecordBatch, name: &str, row: usize) -> Result<i32> {
    Ok(column::<Int32Array>(batch, name)?.value(row))
}

pub fn get_f64(batch: &RecordBatch, name: &str, row: usize) -> Result<f64> {
    Ok(column::<Float64Array>(batch, name)?.value(row))
}

pub fn get_opt_f64(batch: &RecordBatch, name: &str, row: usize) -> Result<Option<f64>> {
    let col = column::<Float64Array>(batch, name)?;
    Ok(if col.is_null(row) { None } else { Some(col.value(row)) })
}

pub fn get_str(batch: &RecordBatch, name: &str, row: usize) -> Result<String> {
    Ok(column::<StringArray>(batch, name)?.value(row).to_string())
}

pub fn get_bool(batch: &RecordBatch, name: &str, row: usize) -> Result<bool> {
    Ok(column::<BooleanArray>(batch, name)?.value(row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        topaz_id: i32,
        area: f64,
        clay: Option<f64>,
        key: String,
        edge: bool,
    }

    impl CatalogRow for Row {
        fn to_table(rows: &[Self]) -> ColumnarTable {
            ColumnarTable::new()
                .with("topaz_id", Column::I32(rows.iter().map(|r| r.topaz_id).collect()))
                .with("area", Column::F64(rows.iter().map(|r| r.area).collect()))
                .with("clay", Column::OptF64(rows.iter().map(|r| r.clay).collect()))
                .with("key", Column::Str(rows.iter().map(|r| r.key.clone()).collect()))
                .with("edge", Column::Bool(rows.iter().map(|r| r.edge).collect()))
        }

        fn from_batch(batch: &RecordBatch, row: usize) -> Result<Self> {
            Ok(Row {
                topaz_id: get_i32(batch, "topaz_id", row)?,
                area: get_f64(batch, "area", row)?,
                clay: get_opt_f64(batch, "clay", row)?,
                key: get_str(batch, "key", row)?,
                edge: get_bool(batch, "edge", row)?,
            })
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            Row { topaz_id: 22, area: 1.5, clay: Some(20.0), key: "a".into(), edge: false },
            Row { topaz_id: 11, area: 0.1 + 0.2, clay: None, key: "b".into(), edge: true },
        ]
    }

    #[test]
    fn test_lookup_by_topaz_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hillslopes.parquet");
        write_rows(&path, &rows()).unwrap();
        let hit: Row = lookup(&path, 11).unwrap().unwrap();
        assert_eq!(hit, rows()[1]);
        assert!(lookup::<Row>(&path, 99).unwrap().is_none());
        assert_eq!(read_rows::<Row>(&path).unwrap().unwrap(), rows());
    }

    #[test]
    fn test_missing_catalog_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        assert!(lookup::<Row>(&dir.path().join("nope.parquet"), 11).unwrap().is_none());
    }

    #[test]
    fn test_ragged_table_is_rejected() {
        let t = ColumnarTable::new()
            .with("topaz_id", Column::I32(vec![1, 2]))
            .with("area", Column::F64(vec![1.0]));
        assert!(t.to_record_batch().is_err());
    }
}
