//! Institution master table adapters: Parquet, CSV, and DuckDB.

mod error;
pub mod table;
pub use error::StoreError;
pub use table::{InstitutionTable, read_table};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckStore;
