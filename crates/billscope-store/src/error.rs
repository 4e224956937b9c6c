use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file not found: {0}")]
    NotFound(std::path::PathBuf),

    #[error("unsupported table format: {0}")]
    UnsupportedFormat(std::path::PathBuf),

    #[error("institution table is missing required column '{0}'")]
    MissingColumn(String),

    #[error("no results for query")]
    NoResults,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}
