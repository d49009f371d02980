use std::io;
use thiserror::Error;

use crate::header::HeaderError;

#[derive(Error, Debug)]
pub enum PackError {
    /// Head/tail framing violated or a cross-volume check failed.
    #[error("Volume broken or not a B1 archive: {volume} ({reason})")]
    CorruptVolume { volume: String, reason: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Content size does not match: declared {expected}, source produced {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid header: {0}")]
    Header(#[from] HeaderError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, PackError>;

impl PackError {
    pub fn corrupt(volume: &str, reason: impl Into<String>) -> Self {
        PackError::CorruptVolume { volume: volume.to_owned(), reason: reason.into() }
    }

    pub fn is_corrupt_volume(&self) -> bool {
        matches!(self, PackError::CorruptVolume { .. })
    }
}
