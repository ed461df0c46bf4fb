use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use depot_common::{Component, Logger};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::depot::Depot;
use crate::error::{DepotError, Result};
use crate::worker::WorkerCommand;

/// One-time enrollment secrets.
#[derive(Clone)]
pub struct ChallengeManager {
    depot: Depot,
    logger: Arc<Logger>,
}

impl ChallengeManager {
    pub fn new(depot: Depot) -> Self {
        let logger = Arc::new(depot.logger().with_component(Component::Challenges));
        Self { depot, logger }
    }

    /// Generate, store and return a fresh base64 secret
    pub async fn issue_challenge(&self) -> Result<String> {
        let mut secret = vec![0u8; self.depot.config().challenge_bytes];
        OsRng
            .try_fill_bytes(&mut secret)
            .map_err(|e| DepotError::Crypto(format!("entropy source unavailable: {e}")))?;
        let challenge = STANDARD.encode(&secret);

        let stored = challenge.clone();
        let created_at = Utc::now().timestamp();
        self.depot
            .send_command(|reply_to| WorkerCommand::InsertChallenge {
                challenge: stored,
                created_at,
                reply_to,
            })
            .await?;
        self.logger.debug("Issued challenge");
        Ok(challenge)
    }

    /// Consume a pending secret.
    ///
    /// Unknown, already redeemed and expired secrets all fail with the same
    /// `NotFound("challenge not found")`.
    pub async fn redeem_challenge(&self, secret: &str) -> Result<bool> {
        let not_before = self
            .depot
            .config()
            .challenge_ttl
            .map(|ttl| cutoff(Utc::now().timestamp(), ttl));
        let challenge = secret.to_string();
        let deleted = self
            .depot
            .send_command(|reply_to| WorkerCommand::RedeemChallenge {
                challenge,
                not_before,
                reply_to,
            })
            .await?;

        if deleted == 1 {
            self.logger.debug("Redeemed challenge");
            Ok(true)
        } else {
            self.logger.debug("Rejected unknown challenge");
            Err(DepotError::challenge_not_found())
        }
    }

    /// Delete pending secrets issued more than `older_than` ago, returning how many were removed
    pub async fn prune_challenges(&self, older_than: Duration) -> Result<usize> {
        let created_before = cutoff(Utc::now().timestamp(), older_than);
        let removed = self
            .depot
            .send_command(|reply_to| WorkerCommand::PruneChallenges {
                created_before,
                reply_to,
            })
            .await?;
        if removed > 0 {
            self.logger
                .info(format!("Pruned {removed} stale challenges"));
        }
        Ok(removed)
    }
}

fn cutoff(now: i64, age: Duration) -> i64 {
    now.saturating_sub(i64::try_from(age.as_secs()).unwrap_or(i64::MAX))
}
