use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the balance audit pipeline.
#[derive(Error, Debug)]
pub enum AuditError {
    /// The archive path does not resolve to a file.
    #[error("Archive not found: {0}")]
    ArchiveNotFound(PathBuf),

    /// The archive exists but cannot be opened as a zip container.
    #[error("Archive {path} is corrupt: {reason}")]
    ArchiveCorrupt { path: PathBuf, reason: String },

    /// A single archive member could not be opened or fully decompressed.
    ///
    /// Never fatal for the run; the pipeline logs it and moves on.
    #[error("Failed to decode archive member {member}: {reason}")]
    MemberDecode { member: String, reason: String },

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A column name is not one of the numeric schema columns.
    #[error("Unknown numeric column: {0}")]
    UnknownColumn(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the audit crates.
pub type Result<T> = std::result::Result<T, AuditError>;
