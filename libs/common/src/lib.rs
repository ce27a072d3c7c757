//! Common library for the cookie renewal worker
//!
//! This crate provides the pieces shared by the workers operating on the
//! `configs` table: database connectivity, the credential model, the
//! renewal outcome type and the transactional store gateway.

pub mod credential;
pub mod database;
pub mod error;
pub mod store;

pub use credential::{
    Credential, CredentialStatus, ExpiryMode, InvalidReason, Outcome, SESSION_COOKIE_KEY,
};
pub use error::{StoreError, StoreResult};
pub use store::{CredentialBatch, CredentialStore, DueFilter};

/// Example usage of the store gateway
///
/// ```rust,no_run
/// use common::database::{DatabaseConfig, init_pool};
/// use common::store::{CredentialBatch, CredentialStore, DueFilter, PgCredentialStore};
/// use common::{ExpiryMode, SESSION_COOKIE_KEY};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DatabaseConfig::from_env()?;
///     let pool = init_pool(&config).await?;
///     let store = PgCredentialStore::new(pool, ExpiryMode::EpochSeconds);
///
///     let mut batch = store.begin().await?;
///     let due = batch.select_due(&DueFilter::new(SESSION_COOKIE_KEY, 100)).await?;
///     println!("{} cookies due for renewal", due.len());
///     batch.rollback().await?;
///     Ok(())
/// }
/// ```
pub fn example_usage() {}
