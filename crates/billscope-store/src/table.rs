//! The institution master table as typed records.
//!
//! Identity columns (`institution_id`, `state`, `institution_type`) are
//! required and cast to strings; every other numeric column is cast to
//! `f64` and attached to the record by name. Extra non-numeric columns
//! are ignored.

use std::fs::File;
use std::io::Seek;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, Float64Array, StringArray};
use arrow::compute::cast;
use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use billscope_core::InstitutionRecord;
use billscope_core::institution::IDENTITY_COLUMNS;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::{info, warn};

use crate::StoreError;

/// Loaded institution rows plus the column names the source carried.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstitutionTable {
    records: Vec<InstitutionRecord>,
    columns: Vec<String>,
}

impl InstitutionTable {
    /// Convert Arrow batches. All batches must share the first batch's schema.
    pub fn from_batches(batches: &[RecordBatch]) -> Result<Self, StoreError> {
        let Some(first) = batches.first() else {
            return Ok(Self::default());
        };
        let schema = first.schema();
        let columns: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
        for required in IDENTITY_COLUMNS {
            if !columns.iter().any(|c| c == *required) {
                return Err(StoreError::MissingColumn((*required).to_string()));
            }
        }

        let mut records = Vec::with_capacity(batches.iter().map(|b| b.num_rows()).sum());
        let mut skipped = 0usize;
        for batch in batches {
            let ids = string_column(batch, "institution_id")?;
            let states = string_column(batch, "state")?;
            let types = string_column(batch, "institution_type")?;
            let names = match batch.column_by_name("name") {
                Some(_) => Some(string_column(batch, "name")?),
                None => None,
            };
            let numeric = numeric_columns(batch)?;

            for row in 0..batch.num_rows() {
                let Some(id) = get_string(&ids, row).filter(|id| !id.trim().is_empty()) else {
                    skipped += 1;
                    continue;
                };
                let mut record = InstitutionRecord::new(
                    id.trim(),
                    get_string(&states, row).unwrap_or_default(),
                    get_string(&types, row).unwrap_or_default(),
                );
                record.name = names.as_ref().and_then(|n| get_string(n, row));
                for (column, values) in &numeric {
                    let value = (!values.is_null(row)).then(|| values.value(row));
                    record.set_numeric(column, value);
                }
                records.push(record);
            }
        }
        if skipped > 0 {
            warn!(skipped, "rows without institution_id ignored");
        }

        Ok(Self { records, columns })
    }

    pub fn records(&self) -> &[InstitutionRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<InstitutionRecord> {
        self.records
    }

    /// Column names as they appear in the source.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Read the table from a `.parquet` or `.csv` file.
pub fn read_table(path: &Path) -> Result<InstitutionTable, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let batches = match extension.as_deref() {
        Some("parquet") => read_parquet(path)?,
        Some("csv") => read_csv(path)?,
        _ => return Err(StoreError::UnsupportedFormat(path.to_path_buf())),
    };
    let table = InstitutionTable::from_batches(&batches)?;
    info!(path = %path.display(), rows = table.len(), "loaded institution table");
    Ok(table)
}

/// Read a Parquet file into Arrow RecordBatches.
pub fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>, StoreError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches: Result<Vec<RecordBatch>, _> = reader.collect();
    Ok(batches?)
}

/// Read a headered CSV file, inferring column types.
pub fn read_csv(path: &Path) -> Result<Vec<RecordBatch>, StoreError> {
    let mut file = File::open(path)?;
    let format = Format::default().with_header(true);
    let (schema, _) = format.infer_schema(&mut file, None)?;
    file.rewind()?;
    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_format(format)
        .build(file)?;
    let batches: Result<Vec<RecordBatch>, _> = reader.collect();
    Ok(batches?)
}

// ── Arrow extraction helpers ──

fn string_column(batch: &RecordBatch, name: &str) -> Result<StringArray, StoreError> {
    let col = batch
        .column_by_name(name)
        .ok_or_else(|| StoreError::MissingColumn(name.to_string()))?;
    let casted = cast(col.as_ref(), &DataType::Utf8)?;
    Ok(casted
        .as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .unwrap_or_else(|| StringArray::new_null(batch.num_rows())))
}

fn get_string(col: &StringArray, row: usize) -> Option<String> {
    if col.is_null(row) {
        return None;
    }
    Some(col.value(row).to_string())
}

fn numeric_columns(batch: &RecordBatch) -> Result<Vec<(String, Float64Array)>, StoreError> {
    let schema = batch.schema();
    let mut out = Vec::new();
    for (field, col) in schema.fields().iter().zip(batch.columns()) {
        let name = field.name().as_str();
        if IDENTITY_COLUMNS.contains(&name) || name == "name" || !field.data_type().is_numeric() {
            continue;
        }
        let casted = cast(col.as_ref(), &DataType::Float64)?;
        if let Some(values) = casted.as_any().downcast_ref::<Float64Array>() {
            out.push((name.to_string(), values.clone()));
        }
    }
    Ok(out)
}
