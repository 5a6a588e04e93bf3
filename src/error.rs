use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

/// Errors surfaced by the student store and its engines.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serde_json error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Bytes read back from sled were not valid UTF-8.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] FromUtf8Error),

    /// A strict insert hit an existing key.
    #[error("Duplicate student: {0}")]
    DuplicateKey(String),

    /// The data directory was created with another engine.
    #[error("Wrong engine: data was persisted with {existing}, requested {requested}")]
    WrongEngine { existing: String, requested: String },

    #[error("Unknown engine: {0}")]
    UnknownEngine(String),

    #[error("Unknown thread pool: {0}")]
    UnknownThreadPool(String),

    /// A background task went away before reporting its result.
    #[error("Background task disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, StoreError>;
