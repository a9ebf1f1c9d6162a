use crate::SequenceNumber;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Corrupt write batch: {0}")]
    Corrupt(String),

    #[error("Checksum mismatch for log entry at sequence {sequence}")]
    ChecksumMismatch { sequence: SequenceNumber },

    #[error("Sequence {requested} is older than retained log history (earliest: {earliest})")]
    SequenceExpired {
        requested: SequenceNumber,
        earliest: SequenceNumber,
    },

    #[error("Log unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
