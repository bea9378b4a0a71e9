//! Client error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Query index {index} out of range for database of {num_entries} entries")]
    QueryOutOfRange { index: u64, num_entries: u64 },

    #[error("No eligible hint for index {index}")]
    NoEligibleHint { index: u64 },

    #[error("Backup hint pool exhausted ({capacity} slots provisioned)")]
    BackupPoolExhausted { capacity: usize },

    #[error("Hint ID space exhausted")]
    HintIdSpaceExhausted,

    #[error("Client has no hints; run the offline phase first")]
    NotInitialized,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] pir_core::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
