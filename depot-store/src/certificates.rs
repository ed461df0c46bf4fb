//! Certificate records and serial allocation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use depot_common::{log_debug, Component, Logger};
use depot_keys::{Certificate, KeyError};
use serde::{Deserialize, Serialize};

use crate::depot::Depot;
use crate::error::Result;
use crate::worker::WorkerCommand;

/// One persisted certificate row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub id: i64,
    pub name: String,
    pub serial: i64,
    pub not_valid_before: DateTime<Utc>,
    pub not_valid_after: DateTime<Utc>,
    pub certificate_pem: String,
}

impl CertificateRecord {
    /// Re-parse the stored PEM block
    pub fn certificate(&self) -> Result<Certificate> {
        Ok(Certificate::from_pem(&self.certificate_pem)?)
    }
}

/// Column values for a new certificate row, validated before any write
pub(crate) struct CertificateRow {
    pub name: String,
    pub serial: i64,
    pub not_valid_before: i64,
    pub not_valid_after: i64,
    pub certificate_pem: String,
}

impl CertificateRow {
    /// `name` is replaced by the SHA-256 fingerprint when the subject has no
    /// common name, and defaults to the common name when absent.
    pub fn new(name: Option<String>, certificate: &Certificate) -> Result<Self> {
        let serial = certificate.serial_i64().ok_or(KeyError::SerialOutOfRange)?;
        let name = match (certificate.common_name(), name) {
            (None, _) => certificate.fingerprint_sha256(),
            (Some(_), Some(name)) => name,
            (Some(cn), None) => cn.to_string(),
        };
        Ok(Self {
            name,
            serial,
            not_valid_before: certificate.not_before().timestamp(),
            not_valid_after: certificate.not_after().timestamp(),
            certificate_pem: certificate.to_pem(),
        })
    }
}

/// Handle for recording issued certificates. Cheap to clone.
#[derive(Clone)]
pub struct CertificateStore {
    depot: Depot,
    logger: Arc<Logger>,
}

impl CertificateStore {
    pub fn new(depot: Depot) -> Self {
        let logger = Arc::new(depot.logger().with_component(Component::Certificates));
        Self { depot, logger }
    }

    /// Record a certificate and return its record id.
    ///
    /// Fails with `ConstraintViolation` when the serial does not fit an i64
    /// or is already recorded.
    pub async fn put(&self, name: &str, certificate: &Certificate) -> Result<i64> {
        let row = CertificateRow::new(Some(name.to_string()), certificate)?;
        let stored_name = row.name.clone();
        let id = self
            .depot
            .send_command(|reply_to| WorkerCommand::InsertCertificate { row, reply_to })
            .await?;
        log_debug!(self.logger, "Stored certificate '{stored_name}' as record {id}");
        Ok(id)
    }

    /// First serial above every recorded id and serial; 1 for an empty store.
    ///
    /// Callers sign with the returned value directly. Nothing is reserved, so
    /// a racing `put` with the same serial is refused. Use
    /// [`issue_with`](Self::issue_with) when several issuers share the store.
    pub async fn next_serial(&self) -> Result<i64> {
        self.depot
            .send_command(|reply_to| WorkerCommand::NextSerial { reply_to })
            .await
    }

    pub async fn has_subject(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.depot
            .send_command(|reply_to| WorkerCommand::HasSubject { name, reply_to })
            .await
    }

    /// Allocate a serial, build the certificate for it and record it, all in
    /// one transaction. `build` runs on the storage thread and must return a
    /// certificate carrying exactly the serial it was given; a panic in
    /// `build` is returned as `Integrity`.
    ///
    /// When `call_timeout` expires while the command is still queued it is
    /// skipped. Once `build` has started the issuance runs to completion, so a
    /// timed-out call may still have recorded the certificate.
    pub async fn issue_with<F>(&self, name: &str, build: F) -> Result<Certificate>
    where
        F: FnOnce(i64) -> Result<Certificate> + Send + 'static,
    {
        let name = Some(name.to_string());
        self.depot
            .send_command(|reply_to| WorkerCommand::IssueCertificate {
                name,
                build: Box::new(build),
                reply_to,
            })
            .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<CertificateRecord>> {
        self.depot
            .send_command(|reply_to| WorkerCommand::GetCertificate { id, reply_to })
            .await
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Vec<CertificateRecord>> {
        let name = name.to_string();
        self.depot
            .send_command(|reply_to| WorkerCommand::FindByName { name, reply_to })
            .await
    }
}
