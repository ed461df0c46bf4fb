//! Authority bootstrap: create the CA identity once, load it afterwards.
//!
//! Key generation and the passphrase KDF are CPU bound and run on the
//! blocking pool. The authority that bootstrap produces is returned to the
//! caller and also published on the store for [`AuthorityManager::current_authority`].
//! Publishing is write-once: the first authority loaded stays in place.

use std::sync::Arc;

use depot_common::{Component, Logger};
use depot_keys::{
    generate_authority_key, pkcs1_der, self_signed_authority, Authority, Certificate, KeyCodec,
    SubjectName,
};
use zeroize::Zeroizing;

use crate::depot::Depot;
use crate::error::{DepotError, Result};
use crate::worker::{AuthorityCreation, WorkerCommand};

#[derive(Clone)]
pub struct AuthorityManager {
    depot: Depot,
    logger: Arc<Logger>,
}

impl AuthorityManager {
    pub fn new(depot: Depot) -> Self {
        let logger = Arc::new(depot.logger().with_component(Component::Authority));
        Self { depot, logger }
    }

    /// Load the stored authority, or create and store a new self-signed one.
    ///
    /// Concurrent first calls create at most one authority; the others load
    /// what the winner stored. A wrong passphrase fails with `Crypto`.
    pub async fn create_or_load_authority(
        &self,
        passphrase: &[u8],
        validity_years: u32,
        subject: &SubjectName,
    ) -> Result<Arc<Authority>> {
        let passphrase = Zeroizing::new(passphrase.to_vec());

        if let Some(authority) = self.load(&passphrase).await? {
            self.logger.info(format!(
                "Loaded authority '{}'",
                authority.certificate().common_name().unwrap_or_default()
            ));
            return Ok(self.publish(authority));
        }

        self.logger.info(format!(
            "No authority found, creating '{}' valid for {validity_years} years",
            subject.common_name
        ));
        let key = blocking(generate_authority_key).await?;

        let codec = KeyCodec::with_iterations(self.depot.config().kdf_iterations)?;
        let der = pkcs1_der(&key)?;
        let encrypt_passphrase = passphrase.clone();
        let key_pem = blocking(move || codec.encrypt(&der, &encrypt_passphrase)).await?;

        let signing_key = key.clone();
        let subject = subject.clone();
        let creation = self
            .depot
            .send_command(|reply_to| WorkerCommand::CreateAuthority {
                key_pem,
                build: Box::new(move |serial| {
                    Ok(self_signed_authority(
                        &signing_key,
                        &subject,
                        validity_years,
                        serial,
                    )?)
                }),
                reply_to,
            })
            .await?;

        let authority = match creation {
            AuthorityCreation::Created(certificate) => Authority::new(certificate, key)?,
            AuthorityCreation::AlreadyExists => {
                self.logger
                    .info("Authority was created concurrently, loading it instead");
                self.load(&passphrase)
                    .await?
                    .ok_or_else(DepotError::authority_not_initialized)?
            }
        };
        Ok(self.publish(authority))
    }

    /// The authority published by bootstrap, or `NotFound` before bootstrap succeeded
    pub fn current_authority(&self) -> Result<Arc<Authority>> {
        self.depot
            .loaded_authority()
            .load_full()
            .ok_or_else(DepotError::authority_not_initialized)
    }

    /// Id of the certificate record the stored authority key belongs to
    pub async fn certificate_record_id(&self) -> Result<Option<i64>> {
        let stored = self
            .depot
            .send_command(|reply_to| WorkerCommand::LoadAuthority { reply_to })
            .await?;
        Ok(stored.map(|s| s.certificate_id))
    }

    async fn load(&self, passphrase: &Zeroizing<Vec<u8>>) -> Result<Option<Authority>> {
        let stored = self
            .depot
            .send_command(|reply_to| WorkerCommand::LoadAuthority { reply_to })
            .await?;
        let Some(stored) = stored else {
            return Ok(None);
        };

        let certificate = Certificate::from_pem(&stored.certificate_pem)?;
        let passphrase = passphrase.clone();
        let authority = blocking(move || {
            let der = KeyCodec::decrypt(&stored.key_pem, &passphrase)?;
            Authority::from_pkcs1_der(certificate, &der)
        })
        .await?;
        Ok(Some(authority))
    }

    fn publish(&self, authority: Authority) -> Arc<Authority> {
        let candidate = Arc::new(authority);
        let slot = self.depot.loaded_authority();
        slot.rcu(|current| current.clone().or_else(|| Some(candidate.clone())));
        slot.load_full().unwrap_or(candidate)
    }
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> depot_keys::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| DepotError::Crypto(format!("key task failed: {e}")))?
        .map_err(DepotError::from)
}
