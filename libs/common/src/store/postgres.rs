//! PostgreSQL credential store backed by the `configs` table

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::{debug, info};

use super::{CredentialBatch, CredentialStore, DueFilter, Mutation, PendingUpdate};
use crate::credential::{Credential, CredentialStatus, ExpiryMode, Outcome};
use crate::error::{StoreError, StoreResult};

/// Credential store over a PostgreSQL pool
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
    expiry_mode: ExpiryMode,
}

impl PgCredentialStore {
    /// Create a new store; `expiry_mode` must match the `expires` column type
    pub fn new(pool: PgPool, expiry_mode: ExpiryMode) -> Self {
        Self { pool, expiry_mode }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    type Batch = PgCredentialBatch;

    async fn begin(&self) -> StoreResult<PgCredentialBatch> {
        let tx = self.pool.begin().await.map_err(StoreError::Connection)?;

        Ok(PgCredentialBatch {
            tx,
            expiry_mode: self.expiry_mode,
            pending: Vec::new(),
        })
    }
}

/// Batch transaction holding row locks until commit or rollback
pub struct PgCredentialBatch {
    tx: Transaction<'static, Postgres>,
    expiry_mode: ExpiryMode,
    pending: Vec<PendingUpdate>,
}

impl PgCredentialBatch {
    fn select_sql(&self) -> String {
        let (expires_column, threshold) = match self.expiry_mode {
            ExpiryMode::EpochSeconds => ("expires::BIGINT", "$3::BIGINT"),
            ExpiryMode::Date => ("expires::DATE", "$3::DATE"),
        };

        format!(
            r#"
            SELECT id::BIGINT AS id, "group", key, value, status::INT4 AS status,
                   {expires_column} AS expires, updated_date
            FROM configs
            WHERE key = $1
              AND status = $2
              AND value IS NOT NULL
              AND btrim(value) <> ''
              AND ({threshold} IS NULL OR expires IS NULL OR expires <= {threshold})
              AND NOT (id = ANY($4::BIGINT[]))
            ORDER BY updated_date ASC NULLS FIRST, expires ASC NULLS FIRST, id ASC
            LIMIT $5
            FOR UPDATE SKIP LOCKED
            "#
        )
    }

    fn decode(&self, row: &PgRow) -> StoreResult<Credential> {
        let id: i64 = row.try_get("id").map_err(StoreError::Query)?;

        let status: i32 = row.try_get("status").map_err(StoreError::Query)?;
        let status = CredentialStatus::from_i32(status).ok_or_else(|| StoreError::InvalidRow {
            id,
            reason: format!("unknown status {}", status),
        })?;

        let expires = match self.expiry_mode {
            ExpiryMode::EpochSeconds => {
                match row.try_get::<Option<i64>, _>("expires").map_err(StoreError::Query)? {
                    Some(seconds) => Some(ExpiryMode::from_epoch(seconds).ok_or_else(|| {
                        StoreError::InvalidRow {
                            id,
                            reason: format!("expires out of range: {}", seconds),
                        }
                    })?),
                    None => None,
                }
            }
            ExpiryMode::Date => row
                .try_get::<Option<NaiveDate>, _>("expires")
                .map_err(StoreError::Query)?
                .map(ExpiryMode::from_date),
        };

        let updated_date: Option<NaiveDateTime> =
            row.try_get("updated_date").map_err(StoreError::Query)?;

        Ok(Credential {
            id,
            group: row.try_get("group").map_err(StoreError::Query)?,
            key: row.try_get("key").map_err(StoreError::Query)?,
            value: row.try_get("value").map_err(StoreError::Query)?,
            status,
            expires,
            updated_date: updated_date.map(|dt| dt.and_utc()),
        })
    }

    async fn flush(&mut self, update: &PendingUpdate) -> StoreResult<u64> {
        let result = match &update.mutation {
            Mutation::Renew { value, expires } => {
                let sql = match self.expiry_mode {
                    ExpiryMode::EpochSeconds => {
                        r#"
                        UPDATE configs
                        SET value = $1,
                            expires = COALESCE($2::BIGINT, expires),
                            updated_date = NOW() AT TIME ZONE 'UTC'
                        WHERE "group" = $3 AND key = $4
                        "#
                    }
                    ExpiryMode::Date => {
                        r#"
                        UPDATE configs
                        SET value = $1,
                            expires = COALESCE($2::DATE, expires),
                            updated_date = NOW() AT TIME ZONE 'UTC'
                        WHERE "group" = $3 AND key = $4
                        "#
                    }
                };

                let query = sqlx::query(sql).bind(value);
                let query = match self.expiry_mode {
                    ExpiryMode::EpochSeconds => query.bind(expires.map(|at| at.timestamp())),
                    ExpiryMode::Date => query.bind(expires.map(|at| at.date_naive())),
                };

                query
                    .bind(&update.group)
                    .bind(&update.key)
                    .execute(&mut *self.tx)
                    .await
            }
            Mutation::Inactivate => {
                sqlx::query(
                    r#"
                    UPDATE configs
                    SET status = $1,
                        updated_date = NOW() AT TIME ZONE 'UTC'
                    WHERE "group" = $2 AND key = $3
                    "#,
                )
                .bind(CredentialStatus::Inactive.as_i32())
                .bind(&update.group)
                .bind(&update.key)
                .execute(&mut *self.tx)
                .await
            }
        };

        Ok(result.map_err(StoreError::Query)?.rows_affected())
    }
}

#[async_trait]
impl CredentialBatch for PgCredentialBatch {
    async fn select_due(&mut self, filter: &DueFilter) -> StoreResult<Vec<Credential>> {
        let sql = self.select_sql();
        let query = sqlx::query(&sql)
            .bind(&filter.key)
            .bind(CredentialStatus::Active.as_i32());
        let query = match self.expiry_mode {
            ExpiryMode::EpochSeconds => query.bind(filter.due_before.map(|at| at.timestamp())),
            ExpiryMode::Date => query.bind(filter.due_before.map(|at| at.date_naive())),
        };

        let rows = query
            .bind(filter.exclude.as_slice())
            .bind(i64::from(filter.limit))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(StoreError::Query)?;

        let credentials = rows
            .iter()
            .map(|row| self.decode(row))
            .collect::<StoreResult<Vec<_>>>()?;

        debug!("Selected {} due credentials", credentials.len());
        Ok(credentials)
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
        let pending = std::mem::take(&mut self.pending);
        let mut written = 0;

        for update in &pending {
            written += self.flush(update).await?;
        }

        self.tx.commit().await.map_err(StoreError::Query)?;
        info!(
            "Committed {} credential updates ({} rows)",
            pending.len(),
            written
        );

        Ok(written)
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().await.map_err(StoreError::Query)?;
        Ok(())
    }
}
