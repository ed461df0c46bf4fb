use std::time::Duration;

use depot_keys::DEFAULT_ITERATIONS;
use serde::{Deserialize, Serialize};

pub const IN_MEMORY: &str = ":memory:";

/// Configuration for a depot store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepotConfig {
    /// Path to the SQLite database file, or `:memory:`
    pub db_path: String,
    /// Deadline applied to every store call; `None` waits indefinitely
    pub call_timeout: Option<Duration>,
    /// How long SQLite waits on a lock held by another connection
    pub busy_timeout: Duration,
    /// Random bytes per challenge secret before base64 encoding
    pub challenge_bytes: usize,
    /// Maximum age of a redeemable challenge; `None` keeps challenges valid until used
    pub challenge_ttl: Option<Duration>,
    /// PBKDF2 rounds used when encrypting a newly created authority key
    pub kdf_iterations: u32,
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self {
            db_path: IN_MEMORY.to_string(),
            call_timeout: None,
            busy_timeout: Duration::from_secs(5),
            challenge_bytes: 24,
            challenge_ttl: None,
            kdf_iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl DepotConfig {
    /// Create a config for the given database path with default settings
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_challenge_bytes(mut self, bytes: usize) -> Self {
        self.challenge_bytes = bytes;
        self
    }

    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = Some(ttl);
        self
    }

    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path == IN_MEMORY
    }
}
