use thiserror::Error;

/// Error types for the depot-keys crate
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("cannot represent serial number as int64")]
    SerialOutOfRange,
}

impl From<openssl::error::ErrorStack> for KeyError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        KeyError::Crypto(err.to_string())
    }
}

impl From<pem::PemError> for KeyError {
    fn from(err: pem::PemError) -> Self {
        KeyError::Integrity(format!("malformed PEM block: {err}"))
    }
}

/// Result type for depot-keys operations
pub type Result<T> = std::result::Result<T, KeyError>;
