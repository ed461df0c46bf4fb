//! The SQLite worker thread and the commands it serves.
//!
//! A single thread owns the `rusqlite::Connection`. Store handles send
//! [`WorkerCommand`]s over an mpsc channel and await the reply on a oneshot.
//! Statements of one command run on the worker without interleaving, and
//! every multi-statement command runs in a `BEGIN IMMEDIATE` transaction so
//! other processes sharing the file are serialized as well.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use depot_common::{log_debug, Logger};
use depot_keys::Certificate;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tokio::sync::{mpsc, oneshot};

use crate::certificates::{CertificateRecord, CertificateRow};
use crate::error::{DepotError, Result};
use crate::schema::{apply_schema, Schema};

/// Builds a certificate for the serial allocated inside the issuing transaction
pub(crate) type BuildFn = Box<dyn FnOnce(i64) -> Result<Certificate> + Send>;

/// Encrypted authority key and the certificate it belongs to, as stored
pub(crate) struct StoredAuthority {
    pub certificate_id: i64,
    pub certificate_pem: String,
    pub key_pem: String,
}

pub(crate) enum AuthorityCreation {
    Created(Certificate),
    /// Another creator got there first
    AlreadyExists,
}

pub(crate) enum WorkerCommand {
    ApplySchema {
        schema: Schema,
        reply_to: oneshot::Sender<Result<()>>,
    },
    InsertCertificate {
        row: CertificateRow,
        reply_to: oneshot::Sender<Result<i64>>,
    },
    IssueCertificate {
        name: Option<String>,
        build: BuildFn,
        reply_to: oneshot::Sender<Result<Certificate>>,
    },
    NextSerial {
        reply_to: oneshot::Sender<Result<i64>>,
    },
    HasSubject {
        name: String,
        reply_to: oneshot::Sender<Result<bool>>,
    },
    GetCertificate {
        id: i64,
        reply_to: oneshot::Sender<Result<Option<CertificateRecord>>>,
    },
    FindByName {
        name: String,
        reply_to: oneshot::Sender<Result<Vec<CertificateRecord>>>,
    },
    LoadAuthority {
        reply_to: oneshot::Sender<Result<Option<StoredAuthority>>>,
    },
    CreateAuthority {
        key_pem: String,
        build: BuildFn,
        reply_to: oneshot::Sender<Result<AuthorityCreation>>,
    },
    InsertChallenge {
        challenge: String,
        created_at: i64,
        reply_to: oneshot::Sender<Result<()>>,
    },
    RedeemChallenge {
        challenge: String,
        /// Oldest accepted `created_at`, when challenges expire
        not_before: Option<i64>,
        reply_to: oneshot::Sender<Result<usize>>,
    },
    PruneChallenges {
        created_before: i64,
        reply_to: oneshot::Sender<Result<usize>>,
    },
    Shutdown {
        reply_to: oneshot::Sender<Result<()>>,
    },
}

impl WorkerCommand {
    fn name(&self) -> &'static str {
        match self {
            WorkerCommand::ApplySchema { .. } => "apply_schema",
            WorkerCommand::InsertCertificate { .. } => "insert_certificate",
            WorkerCommand::IssueCertificate { .. } => "issue_certificate",
            WorkerCommand::NextSerial { .. } => "next_serial",
            WorkerCommand::HasSubject { .. } => "has_subject",
            WorkerCommand::GetCertificate { .. } => "get_certificate",
            WorkerCommand::FindByName { .. } => "find_by_name",
            WorkerCommand::LoadAuthority { .. } => "load_authority",
            WorkerCommand::CreateAuthority { .. } => "create_authority",
            WorkerCommand::InsertChallenge { .. } => "insert_challenge",
            WorkerCommand::RedeemChallenge { .. } => "redeem_challenge",
            WorkerCommand::PruneChallenges { .. } => "prune_challenges",
            WorkerCommand::Shutdown { .. } => "shutdown",
        }
    }
}

pub(crate) struct SqliteWorker {
    connection: Connection,
    receiver: mpsc::Receiver<WorkerCommand>,
    logger: Arc<Logger>,
}

impl SqliteWorker {
    pub fn new(
        db_path: &str,
        busy_timeout: Duration,
        receiver: mpsc::Receiver<WorkerCommand>,
        logger: Arc<Logger>,
    ) -> Result<Self> {
        let connection = Connection::open(db_path).map_err(|e| {
            let err_msg = format!("Failed to open SQLite connection to '{db_path}': {e}");
            logger.error(&err_msg);
            DepotError::StorageUnavailable(err_msg)
        })?;

        connection.pragma_update(None, "foreign_keys", "ON")?;
        connection.busy_timeout(busy_timeout)?;
        if db_path != crate::config::IN_MEMORY {
            let mode: String =
                connection.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            log_debug!(logger, "journal_mode={mode}");
        }

        Ok(Self {
            connection,
            receiver,
            logger,
        })
    }

    /// Serve commands until shutdown or until every sender is dropped
    pub fn run(mut self) {
        self.logger.info("SqliteWorker started processing loop.");
        while let Some(command) = self.receiver.blocking_recv() {
            log_debug!(self.logger, "Processing {} command", command.name());
            match command {
                WorkerCommand::ApplySchema { schema, reply_to } => {
                    let res = apply_schema(&self.connection, &schema, &self.logger)
                        .map_err(DepotError::from);
                    let _ = reply_to.send(res);
                }
                WorkerCommand::InsertCertificate { row, reply_to } => {
                    let _ = reply_to.send(self.insert_certificate(&row));
                }
                WorkerCommand::IssueCertificate {
                    name,
                    build,
                    reply_to,
                } => {
                    if self.abandoned(&reply_to, "issue_certificate") {
                        continue;
                    }
                    let _ = reply_to.send(self.issue_certificate(name, build));
                }
                WorkerCommand::NextSerial { reply_to } => {
                    let _ = reply_to.send(allocate_serial(&self.connection));
                }
                WorkerCommand::HasSubject { name, reply_to } => {
                    let _ = reply_to.send(self.has_subject(&name));
                }
                WorkerCommand::GetCertificate { id, reply_to } => {
                    let _ = reply_to.send(self.get_certificate(id));
                }
                WorkerCommand::FindByName { name, reply_to } => {
                    let _ = reply_to.send(self.find_by_name(&name));
                }
                WorkerCommand::LoadAuthority { reply_to } => {
                    let _ = reply_to.send(load_authority(&self.connection));
                }
                WorkerCommand::CreateAuthority {
                    key_pem,
                    build,
                    reply_to,
                } => {
                    if self.abandoned(&reply_to, "create_authority") {
                        continue;
                    }
                    let _ = reply_to.send(self.create_authority(key_pem, build));
                }
                WorkerCommand::InsertChallenge {
                    challenge,
                    created_at,
                    reply_to,
                } => {
                    let res = self
                        .connection
                        .execute(
                            "INSERT INTO challenges (challenge, created_at) VALUES (?1, ?2)",
                            params![challenge, created_at],
                        )
                        .map(|_| ())
                        .map_err(DepotError::from);
                    let _ = reply_to.send(res);
                }
                WorkerCommand::RedeemChallenge {
                    challenge,
                    not_before,
                    reply_to,
                } => {
                    let res = match not_before {
                        Some(cutoff) => self.connection.execute(
                            "DELETE FROM challenges WHERE challenge = ?1 AND created_at >= ?2",
                            params![challenge, cutoff],
                        ),
                        None => self.connection.execute(
                            "DELETE FROM challenges WHERE challenge = ?1",
                            params![challenge],
                        ),
                    };
                    let _ = reply_to.send(res.map_err(DepotError::from));
                }
                WorkerCommand::PruneChallenges {
                    created_before,
                    reply_to,
                } => {
                    let res = self
                        .connection
                        .execute(
                            "DELETE FROM challenges WHERE created_at < ?1",
                            params![created_before],
                        )
                        .map_err(DepotError::from);
                    let _ = reply_to.send(res);
                }
                WorkerCommand::Shutdown { reply_to } => {
                    self.logger.info("SqliteWorker received Shutdown command.");
                    let _ = reply_to.send(Ok(()));
                    break;
                }
            }
        }
        self.logger.info("SqliteWorker finished.");
    }

    /// The caller gave up (timeout or drop) before the command was served
    fn abandoned<T>(&self, reply_to: &oneshot::Sender<T>, command: &str) -> bool {
        if reply_to.is_closed() {
            self.logger
                .warn(format!("Skipping {command}: caller no longer waiting"));
            return true;
        }
        false
    }

    fn insert_certificate(&self, row: &CertificateRow) -> Result<i64> {
        insert_certificate_row(&self.connection, None, row)
    }

    fn issue_certificate(&mut self, name: Option<String>, build: BuildFn) -> Result<Certificate> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let serial = allocate_serial(&tx)?;
        let certificate = build_for_serial(build, serial)?;
        let row = CertificateRow::new(name, &certificate)?;
        insert_certificate_row(&tx, Some(serial), &row)?;
        tx.commit()?;
        self.logger
            .info(format!("Issued certificate '{}' with serial {serial}", row.name));
        Ok(certificate)
    }

    fn has_subject(&self, name: &str) -> Result<bool> {
        let count: i64 = self.connection.query_row(
            "SELECT COUNT(*) FROM certificates WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn get_certificate(&self, id: i64) -> Result<Option<CertificateRecord>> {
        let raw = self
            .connection
            .query_row(
                "SELECT id, name, serial, not_valid_before, not_valid_after, certificate_pem
                 FROM certificates WHERE id = ?1",
                params![id],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    fn find_by_name(&self, name: &str) -> Result<Vec<CertificateRecord>> {
        let mut stmt = self.connection.prepare(
            "SELECT id, name, serial, not_valid_before, not_valid_after, certificate_pem
             FROM certificates WHERE name = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![name], RawRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawRecord::into_record).collect()
    }

    fn create_authority(&mut self, key_pem: String, build: BuildFn) -> Result<AuthorityCreation> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if load_authority(&tx)?.is_some() {
            self.logger
                .info("Authority already present, skipping creation.");
            return Ok(AuthorityCreation::AlreadyExists);
        }

        let serial = allocate_serial(&tx)?;
        let certificate = build_for_serial(build, serial)?;
        let row = CertificateRow::new(None, &certificate)?;
        let certificate_id = insert_certificate_row(&tx, Some(serial), &row)?;

        match tx.execute(
            "INSERT INTO ca_keys (certificate_id, key_pem) VALUES (?1, ?2)",
            params![certificate_id, key_pem],
        ) {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                self.logger
                    .warn(format!("Authority slot already taken: {e}"));
                return Ok(AuthorityCreation::AlreadyExists);
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit()?;
        self.logger.info(format!(
            "Created authority '{}' as certificate {certificate_id}",
            row.name
        ));
        Ok(AuthorityCreation::Created(certificate))
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}

/// Next serial above every recorded id and serial
fn allocate_serial(conn: &Connection) -> Result<i64> {
    let highest: i64 = conn.query_row(
        "SELECT MAX(COALESCE((SELECT MAX(id) FROM certificates), 0),
                    COALESCE((SELECT MAX(serial) FROM certificates), 0))",
        [],
        |row| row.get(0),
    )?;
    highest
        .checked_add(1)
        .ok_or_else(|| DepotError::ConstraintViolation("serial space exhausted".to_string()))
}

/// Run a caller's builder. A panic is reported as an error so the worker
/// keeps serving and the open transaction rolls back on drop.
fn build_for_serial(build: BuildFn, serial: i64) -> Result<Certificate> {
    let certificate = panic::catch_unwind(AssertUnwindSafe(move || build(serial)))
        .map_err(|_| DepotError::Integrity("certificate builder panicked".to_string()))??;
    match certificate.serial_i64() {
        Some(actual) if actual == serial => Ok(certificate),
        actual => Err(DepotError::Integrity(format!(
            "built certificate carries serial {actual:?}, expected {serial}"
        ))),
    }
}

fn insert_certificate_row(conn: &Connection, id: Option<i64>, row: &CertificateRow) -> Result<i64> {
    conn.execute(
        "INSERT INTO certificates
             (id, name, serial, not_valid_before, not_valid_after, certificate_pem)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            row.name,
            row.serial,
            row.not_valid_before,
            row.not_valid_after,
            row.certificate_pem
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn load_authority(conn: &Connection) -> Result<Option<StoredAuthority>> {
    let stored = conn
        .query_row(
            "SELECT k.certificate_id, c.certificate_pem, k.key_pem
             FROM ca_keys k JOIN certificates c ON c.id = k.certificate_id
             WHERE k.slot = 1",
            [],
            |row| {
                Ok(StoredAuthority {
                    certificate_id: row.get(0)?,
                    certificate_pem: row.get(1)?,
                    key_pem: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(stored)
}

struct RawRecord {
    id: i64,
    name: String,
    serial: i64,
    not_valid_before: i64,
    not_valid_after: i64,
    certificate_pem: String,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            serial: row.get(2)?,
            not_valid_before: row.get(3)?,
            not_valid_after: row.get(4)?,
            certificate_pem: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<CertificateRecord> {
        Ok(CertificateRecord {
            id: self.id,
            name: self.name,
            serial: self.serial,
            not_valid_before: timestamp(self.not_valid_before)?,
            not_valid_after: timestamp(self.not_valid_after)?,
            certificate_pem: self.certificate_pem,
        })
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| DepotError::Integrity(format!("stored timestamp {secs} out of range")))
}
