//! In-process credential store
//!
//! Mirrors the PostgreSQL gateway: rows locked by an open batch are skipped
//! by other batches, writes are buffered and applied under a single lock on
//! commit, and dropping a batch releases its locks. Expiries are kept at
//! the precision of the configured [`ExpiryMode`].

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{CredentialBatch, CredentialStore, DueFilter, Mutation, PendingUpdate};
use crate::credential::{Credential, CredentialStatus, ExpiryMode, Outcome};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
struct MemoryState {
    expiry_mode: ExpiryMode,
    rows: Vec<Credential>,
    locked: HashSet<i64>,
    commits: usize,
}

/// Credential table kept in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new(rows: impl IntoIterator<Item = Credential>) -> Self {
        let store = Self::default();
        store.lock().rows.extend(rows);
        store
    }

    /// Store expiries as a column of `mode` would
    pub fn with_expiry_mode(self, mode: ExpiryMode) -> Self {
        {
            let mut state = self.lock();
            state.expiry_mode = mode;
            for row in &mut state.rows {
                row.expires = row.expires.map(|at| mode.truncate(at));
            }
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of a row by id
    pub fn get(&self, id: i64) -> Option<Credential> {
        self.lock().rows.iter().find(|row| row.id == id).cloned()
    }

    /// Snapshot of every row
    pub fn rows(&self) -> Vec<Credential> {
        self.lock().rows.clone()
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> usize {
        self.lock().commits
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    type Batch = MemoryBatch;

    async fn begin(&self) -> StoreResult<MemoryBatch> {
        Ok(MemoryBatch {
            state: Arc::clone(&self.state),
            locked: Vec::new(),
            pending: Vec::new(),
            open: true,
        })
    }
}

/// Open batch over a [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryBatch {
    state: Arc<Mutex<MemoryState>>,
    locked: Vec<i64>,
    pending: Vec<PendingUpdate>,
    open: bool,
}

impl MemoryBatch {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        let locked = std::mem::take(&mut self.locked);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for id in locked {
            state.locked.remove(&id);
        }
    }
}

#[async_trait]
impl CredentialBatch for MemoryBatch {
    async fn select_due(&mut self, filter: &DueFilter) -> StoreResult<Vec<Credential>> {
        if !self.open {
            return Err(StoreError::Closed);
        }

        let selected: Vec<Credential> = {
            let mut state = self.lock();
            let mode = state.expiry_mode;
            let filter = DueFilter {
                due_before: filter.due_before.map(|at| mode.truncate(at)),
                ..filter.clone()
            };
            let mut due: Vec<Credential> = state
                .rows
                .iter()
                .filter(|row| filter.matches(row))
                .filter(|row| !state.locked.contains(&row.id) || self.locked.contains(&row.id))
                .cloned()
                .collect();

            due.sort_by_key(|row| (row.updated_date, row.expires, row.id));
            due.truncate(filter.limit as usize);

            for row in &due {
                state.locked.insert(row.id);
            }
            due
        };

        self.locked.extend(selected.iter().map(|row| row.id));
        Ok(selected)
    }

    fn apply_outcome(&mut self, group: &str, key: &str, outcome: &Outcome) {
        if let Some(update) = PendingUpdate::from_outcome(group, key, outcome) {
            self.pending.push(update);
        }
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }

    async fn commit(mut self) -> StoreResult<u64> {
        if !self.open {
            return Err(StoreError::Closed);
        }

        let pending = std::mem::take(&mut self.pending);
        let mut written = 0;
        {
            let mut state = self.lock();
            let mode = state.expiry_mode;
            let now = Utc::now();

            for update in &pending {
                for row in state
                    .rows
                    .iter_mut()
                    .filter(|row| row.group == update.group && row.key == update.key)
                {
                    match &update.mutation {
                        Mutation::Renew { value, expires } => {
                            row.value = Some(value.clone());
                            if let Some(at) = expires {
                                row.expires = Some(mode.truncate(*at));
                            }
                        }
                        Mutation::Inactivate => row.status = CredentialStatus::Inactive,
                    }
                    row.updated_date = Some(now);
                    written += 1;
                }
            }
            state.commits += 1;
        }

        self.release();
        Ok(written)
    }

    async fn rollback(mut self) -> StoreResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryBatch {
    fn drop(&mut self) {
        self.release();
    }
}
