//! Depot Store
//!
//! SQLite persistence for a certificate authority: the authority's own
//! identity, every certificate it issues with its serial, and one-time
//! enrollment challenges.
//!
//! ```no_run
//! # async fn demo() -> depot_store::Result<()> {
//! use std::sync::Arc;
//! use depot_common::{Component, Logger};
//! use depot_keys::SubjectName;
//! use depot_store::{Depot, DepotConfig};
//!
//! let logger = Arc::new(Logger::new_root(Component::Depot, "scep"));
//! let depot = Depot::open(DepotConfig::new("depot.db"), logger).await?;
//!
//! let subject = SubjectName::new("Example CA", "Example", "US");
//! let authority = depot
//!     .authority()
//!     .create_or_load_authority(b"secret", 10, &subject)
//!     .await?;
//!
//! let challenge = depot.challenges().issue_challenge().await?;
//! depot.challenges().redeem_challenge(&challenge).await?;
//! # drop(authority);
//! # Ok(())
//! # }
//! ```

pub mod authority;
pub mod certificates;
pub mod challenges;
pub mod config;
pub mod depot;
pub mod error;
pub mod schema;
mod worker;

pub use authority::AuthorityManager;
pub use certificates::{CertificateRecord, CertificateStore};
pub use challenges::ChallengeManager;
pub use config::{DepotConfig, IN_MEMORY};
pub use depot::Depot;
pub use error::{DepotError, Result};
pub use schema::{depot_schema, Schema, SCHEMA_VERSION};
