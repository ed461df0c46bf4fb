use depot_keys::KeyError;
use thiserror::Error;

/// Error types surfaced by the depot
#[derive(Error, Debug)]
pub enum DepotError {
    /// Connection, query, worker or deadline failure. Not retried here.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Malformed or unexpectedly unencrypted stored data
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Key generation, encryption or decryption failure
    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("{0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl DepotError {
    pub fn challenge_not_found() -> Self {
        DepotError::NotFound("challenge not found".to_string())
    }

    pub fn authority_not_initialized() -> Self {
        DepotError::NotFound("authority not initialized".to_string())
    }
}

impl From<rusqlite::Error> for DepotError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => {
                DepotError::ConstraintViolation(err.to_string())
            }
            _ => DepotError::StorageUnavailable(err.to_string()),
        }
    }
}

impl From<KeyError> for DepotError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Crypto(_) | KeyError::Decryption(_) => DepotError::Crypto(err.to_string()),
            KeyError::Integrity(_) | KeyError::Certificate(_) | KeyError::InvalidKeyFormat(_) => {
                DepotError::Integrity(err.to_string())
            }
            KeyError::SerialOutOfRange => DepotError::ConstraintViolation(err.to_string()),
        }
    }
}

/// Result type for depot operations
pub type Result<T> = std::result::Result<T, DepotError>;
