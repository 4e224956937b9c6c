//! DuckDB-backed institution master table.

use std::path::Path;

use arrow::record_batch::RecordBatch;
use duckdb::Connection;
use tracing::info;

use crate::StoreError;
use crate::table::InstitutionTable;

/// DuckDB store holding the `institutions` table.
///
/// Use [`open`](Self::open) for in-memory and
/// [`open_persistent`](Self::open_persistent) for a file-backed database
/// that keeps the imported table across runs.
pub struct DuckStore {
    conn: Connection,
}

impl DuckStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    /// Whether the `institutions` table exists.
    pub fn has_institutions(&self) -> bool {
        self.institution_count().is_ok()
    }

    /// Import a Parquet or CSV file into the `institutions` table.
    pub fn load_institutions(&self, path: &Path) -> Result<usize, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        let reader = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("parquet") => "read_parquet",
            Some(ext) if ext.eq_ignore_ascii_case("csv") => "read_csv_auto",
            _ => return Err(StoreError::UnsupportedFormat(path.to_path_buf())),
        };
        let location = path.display().to_string().replace('\'', "''");
        let sql = format!("CREATE OR REPLACE TABLE institutions AS SELECT * FROM {reader}('{location}')");
        self.conn.execute_batch(&sql)?;
        let count = self.institution_count()?;
        info!(count, path = %path.display(), "loaded institutions table");
        Ok(count)
    }

    /// Number of rows in the `institutions` table.
    pub fn institution_count(&self) -> Result<usize, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT count(*)::BIGINT AS cnt FROM institutions")?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        let batch = batches.first().ok_or(StoreError::NoResults)?;
        let col = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::Int64Array>()
            .ok_or(StoreError::NoResults)?;
        Ok(col.value(0) as usize)
    }

    /// Institutions matching an optional SQL filter, as typed records.
    ///
    /// `where_clause` is appended after `WHERE`; do not include the keyword.
    pub fn institutions(&self, where_clause: Option<&str>) -> Result<InstitutionTable, StoreError> {
        let sql = match where_clause {
            Some(clause) => format!("SELECT * FROM institutions WHERE {clause}"),
            None => "SELECT * FROM institutions".to_string(),
        };
        let batches = self.query_arrow(&sql)?;
        InstitutionTable::from_batches(&batches)
    }

    /// Execute arbitrary SQL and return Arrow RecordBatches.
    pub fn query_arrow(&self, sql: &str) -> Result<Vec<RecordBatch>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        Ok(batches)
    }
}
