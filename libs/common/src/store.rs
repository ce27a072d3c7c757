//! Credential store gateway
//!
//! A batch is one transaction: it selects due credentials under row locks,
//! buffers the mutations derived from renewal outcomes and flushes them in a
//! single commit. Locks are released on commit, rollback or drop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::credential::{Credential, Outcome};
use crate::error::StoreResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgCredentialStore;

/// Selection criteria for due credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueFilter {
    /// Credential class to renew
    pub key: String,
    /// Maximum number of rows returned
    pub limit: u32,
    /// Only rows whose expiry is unknown or at or before this instant.
    /// `None` selects regardless of expiry.
    pub due_before: Option<DateTime<Utc>>,
    /// Rows already attempted during the current run
    pub exclude: Vec<i64>,
}

impl DueFilter {
    pub fn new(key: impl Into<String>, limit: u32) -> Self {
        Self {
            key: key.into(),
            limit,
            due_before: None,
            exclude: Vec::new(),
        }
    }

    pub fn due_before(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.due_before = at;
        self
    }

    pub fn excluding(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.exclude.extend(ids);
        self
    }

    /// Whether a credential satisfies every criterion except locking
    pub fn matches(&self, credential: &Credential) -> bool {
        use crate::credential::CredentialStatus;

        credential.status == CredentialStatus::Active
            && credential.key == self.key
            && credential.renewable_value().is_some()
            && match (self.due_before, credential.expires) {
                (Some(due_before), Some(expires)) => expires <= due_before,
                _ => true,
            }
            && !self.exclude.contains(&credential.id)
    }
}

/// A buffered write derived from an outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Replace the value and, when known, the expiry
    Renew {
        value: String,
        expires: Option<DateTime<Utc>>,
    },
    /// Mark the credential inactive
    Inactivate,
}

/// Mutation addressed to the `(group, key)` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub group: String,
    pub key: String,
    pub mutation: Mutation,
}

impl PendingUpdate {
    /// Translate an outcome into a buffered write; `NoChange` writes nothing
    pub fn from_outcome(group: &str, key: &str, outcome: &Outcome) -> Option<Self> {
        let mutation = match outcome {
            Outcome::Renewed { value, expires } => Mutation::Renew {
                value: value.clone(),
                expires: *expires,
            },
            Outcome::Invalid(_) => Mutation::Inactivate,
            Outcome::NoChange => return None,
        };

        Some(Self {
            group: group.to_string(),
            key: key.to_string(),
            mutation,
        })
    }
}

/// Entry point of a credential store
#[async_trait]
pub trait CredentialStore: Send + Sync {
    type Batch: CredentialBatch;

    /// Open a new batch transaction
    async fn begin(&self) -> StoreResult<Self::Batch>;
}

/// One open batch transaction
#[async_trait]
pub trait CredentialBatch: Send {
    /// Select and lock due credentials, least recently refreshed first
    async fn select_due(&mut self, filter: &DueFilter) -> StoreResult<Vec<Credential>>;

    /// Buffer the write derived from `outcome` for the `(group, key)` row
    fn apply_outcome(&mut self, group: &str, key: &str, outcome: &Outcome);

    /// Number of buffered writes
    fn pending(&self) -> usize;

    /// Flush every buffered write atomically and release the locks.
    /// Returns the number of rows written.
    async fn commit(self) -> StoreResult<u64>;

    /// Discard buffered writes and release the locks
    async fn rollback(self) -> StoreResult<()>;
}
