use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// The only fatal error of a run: the archive itself could not be opened.
    #[error("Archive open error for {}: {source}", path.display())]
    ArchiveOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive entry not found: {0}")]
    EntryNotFound(String),

    #[error("Decompression error for {key}: {source}")]
    Decompression {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record: {0}")]
    MalformedRecord(#[from] serde_json::Error),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid timestamp {value:?}: {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
