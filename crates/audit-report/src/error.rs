use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while writing audit artifacts.
#[derive(Error, Debug)]
pub enum ExportError {
    /// The output directory or an artifact file could not be written.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExportError>;
