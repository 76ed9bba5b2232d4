//! Error types for the Redoom ledger

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("Mining aborted after {attempts} attempts")]
    MiningAborted { attempts: u64 },
    #[error("Nonce space exhausted before a valid seal was found")]
    NonceExhausted,
    #[error("Difficulty {0} is out of range (max {max})", max = crate::miner::MAX_DIFFICULTY)]
    DifficultyOutOfRange(u32),
    #[error("Invalid genesis record: {0}")]
    InvalidGenesis(String),
    #[error("Chain integrity violated: {0}")]
    ChainIntegrity(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Background worker failed: {0}")]
    WorkerError(String),
    #[error("Document already exists: {0}")]
    DuplicateDocument(String),
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::SerializationError(err.to_string())
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::DatabaseError(err.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, LedgerError>;
