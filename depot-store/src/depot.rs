use std::sync::{Arc, RwLock};
use std::thread;

use arc_swap::ArcSwapOption;
use depot_common::{Component, Logger};
use depot_keys::{Authority, KeyCodec};
use tokio::sync::{mpsc, oneshot};

use crate::authority::AuthorityManager;
use crate::certificates::CertificateStore;
use crate::challenges::ChallengeManager;
use crate::config::DepotConfig;
use crate::error::{DepotError, Result};
use crate::schema::depot_schema;
use crate::worker::{SqliteWorker, WorkerCommand};

const COMMAND_BUFFER: usize = 32;
const MIN_CHALLENGE_BYTES: usize = 16;

/// An open store. Clones share the same worker and connection.
#[derive(Clone)]
pub struct Depot {
    config: Arc<DepotConfig>,
    logger: Arc<Logger>,
    worker_tx: Arc<RwLock<Option<mpsc::Sender<WorkerCommand>>>>,
    /// Authority loaded by the first successful bootstrap
    loaded_authority: Arc<ArcSwapOption<Authority>>,
}

impl std::fmt::Debug for Depot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Depot")
            .field("db_path", &self.config.db_path)
            .finish_non_exhaustive()
    }
}

impl Depot {
    /// Start the storage worker, open the database and apply the schema.
    pub async fn open(config: DepotConfig, logger: Arc<Logger>) -> Result<Self> {
        if config.challenge_bytes < MIN_CHALLENGE_BYTES {
            return Err(DepotError::ConstraintViolation(format!(
                "challenge_bytes must be at least {MIN_CHALLENGE_BYTES}, got {}",
                config.challenge_bytes
            )));
        }
        KeyCodec::with_iterations(config.kdf_iterations)?;

        let logger = Arc::new(logger.with_component(Component::Database));
        logger.info(format!("Opening depot at '{}'", config.db_path));

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let db_path = config.db_path.clone();
        let busy_timeout = config.busy_timeout;
        let worker_logger = logger.clone();
        thread::Builder::new()
            .name("depot-sqlite".to_string())
            .spawn(move || {
                match SqliteWorker::new(&db_path, busy_timeout, rx, worker_logger.clone()) {
                    Ok(worker) => {
                        if ready_tx.send(Ok(())).is_err() {
                            worker_logger.error("Failed to send ready signal; opener went away.");
                            return;
                        }
                        worker.run();
                    }
                    Err(e) => {
                        worker_logger.error(format!("Failed to initialize SqliteWorker: {e}"));
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| {
                DepotError::StorageUnavailable(format!("failed to spawn storage thread: {e}"))
            })?;

        ready_rx.await.map_err(|_| {
            DepotError::StorageUnavailable("storage thread exited during startup".to_string())
        })??;
        logger.debug("SqliteWorker has signaled it is ready.");

        let depot = Self {
            config: Arc::new(config),
            logger,
            worker_tx: Arc::new(RwLock::new(Some(tx))),
            loaded_authority: Arc::new(ArcSwapOption::empty()),
        };

        let schema = depot_schema();
        depot
            .send_command(|reply_to| WorkerCommand::ApplySchema { schema, reply_to })
            .await?;
        depot.logger.info("Depot schema ready");
        Ok(depot)
    }

    pub fn config(&self) -> &DepotConfig {
        &self.config
    }

    pub(crate) fn logger(&self) -> &Logger {
        &self.logger
    }

    pub(crate) fn loaded_authority(&self) -> &ArcSwapOption<Authority> {
        &self.loaded_authority
    }

    pub fn certificates(&self) -> CertificateStore {
        CertificateStore::new(self.clone())
    }

    pub fn challenges(&self) -> ChallengeManager {
        ChallengeManager::new(self.clone())
    }

    pub fn authority(&self) -> AuthorityManager {
        AuthorityManager::new(self.clone())
    }

    /// Stop the worker. Every handle sharing this store fails afterwards.
    pub async fn close(&self) -> Result<()> {
        let sender = {
            let mut guard = self
                .worker_tx
                .write()
                .map_err(|e| DepotError::StorageUnavailable(format!("worker lock poisoned: {e}")))?;
            guard.take()
        };
        let Some(sender) = sender else {
            return Ok(());
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if sender
            .send(WorkerCommand::Shutdown { reply_to: reply_tx })
            .await
            .is_err()
        {
            self.logger
                .warn("Worker already stopped before shutdown was requested.");
            return Ok(());
        }
        reply_rx
            .await
            .map_err(|_| DepotError::StorageUnavailable("worker dropped shutdown reply".into()))?
    }

    pub fn is_closed(&self) -> bool {
        self.worker_tx
            .read()
            .map(|guard| guard.as_ref().map_or(true, |tx| tx.is_closed()))
            .unwrap_or(true)
    }

    /// Send a command and wait for its reply, bounded by `call_timeout`.
    ///
    /// A command that times out after it was queued still runs on the worker.
    pub(crate) async fn send_command<T>(
        &self,
        constructor: impl FnOnce(oneshot::Sender<Result<T>>) -> WorkerCommand,
    ) -> Result<T> {
        let sender = {
            let guard = self
                .worker_tx
                .read()
                .map_err(|e| DepotError::StorageUnavailable(format!("worker lock poisoned: {e}")))?;
            guard.clone()
        }
        .ok_or_else(|| DepotError::StorageUnavailable("depot is closed".to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let command = constructor(reply_tx);

        let exchange = async move {
            sender.send(command).await.map_err(|_| {
                DepotError::StorageUnavailable("storage worker is not running".to_string())
            })?;
            reply_rx.await.map_err(|_| {
                DepotError::StorageUnavailable("storage worker dropped the reply".to_string())
            })?
        };

        match self.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| {
                self.logger
                    .warn(format!("Storage call exceeded {limit:?}"));
                DepotError::StorageUnavailable(format!("storage call timed out after {limit:?}"))
            })?,
            None => exchange.await,
        }
    }
}
