use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::traits::{MoveOutcome, Partition, Store};
use crate::coordination::LeaseBackend;
use crate::domain::{EventDetail, EventRecord, EventStatus, LeaseToken};
use crate::error::{LivescoreError, Result};

const RECORD_COLUMNS: &str = "id, status, detail, created_at, last_seen_at, quarantined_since, \
     last_score_change_at, last_alert_sent_at, archived_at";

/// Staleness lookup led by `status` so it can use the `(status, last_seen_at)` index
fn stale_before_sql(partition: Partition) -> String {
    let statuses = partition
        .statuses()
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT {RECORD_COLUMNS} FROM {} WHERE status IN ({statuses}) AND last_seen_at < $1",
        partition.table()
    )
}

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations (tables, the (status, last_seen_at) index and the lease table)
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_record(row: &PgRow) -> Result<EventRecord> {
        let status: String = row.try_get("status")?;
        let detail: Option<Json<EventDetail>> = row.try_get("detail")?;
        Ok(EventRecord {
            id: row.try_get("id")?,
            status: EventStatus::try_from(status.as_str()).map_err(LivescoreError::Internal)?,
            detail: detail.map(|d| d.0),
            created_at: row.try_get("created_at")?,
            last_seen_at: row.try_get("last_seen_at")?,
            quarantined_since: row.try_get("quarantined_since")?,
            last_score_change_at: row.try_get("last_score_change_at")?,
            last_alert_sent_at: row.try_get("last_alert_sent_at")?,
            archived_at: row.try_get("archived_at")?,
        })
    }

    fn rows_to_records(rows: &[PgRow]) -> Result<Vec<EventRecord>> {
        rows.iter().map(Self::row_to_record).collect()
    }
}

#[async_trait]
impl Store for PostgresStore {
    #[instrument(skip(self, record), fields(id = %record.id))]
    async fn upsert(&self, partition: Partition, record: &EventRecord) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {table} ({RECORD_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                detail = EXCLUDED.detail,
                last_seen_at = EXCLUDED.last_seen_at,
                quarantined_since = EXCLUDED.quarantined_since,
                last_score_change_at = EXCLUDED.last_score_change_at,
                last_alert_sent_at = EXCLUDED.last_alert_sent_at,
                archived_at = EXCLUDED.archived_at
            "#,
            table = partition.table(),
        );

        sqlx::query(&sql)
            .bind(&record.id)
            .bind(record.status.as_str())
            .bind(record.detail.as_ref().map(Json))
            .bind(record.created_at)
            .bind(record.last_seen_at)
            .bind(record.quarantined_since)
            .bind(record.last_score_change_at)
            .bind(record.last_alert_sent_at)
            .bind(record.archived_at)
            .execute(&self.pool)
            .await
            .map_err(|e| LivescoreError::StoreWrite {
                id: record.id.clone(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    async fn get(&self, partition: Partition, id: &str) -> Result<Option<EventRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE id = $1",
            partition.table()
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn query_all(&self, partition: Partition) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} ORDER BY last_seen_at DESC",
            partition.table()
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Self::rows_to_records(&rows)
    }

    #[instrument(skip(self))]
    async fn query_by_status(
        &self,
        partition: Partition,
        status: EventStatus,
    ) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE status = $1 ORDER BY last_seen_at DESC",
            partition.table()
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        Self::rows_to_records(&rows)
    }

    #[instrument(skip(self))]
    async fn query_stale_before(
        &self,
        partition: Partition,
        before: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>> {
        let sql = stale_before_sql(partition);
        let rows = sqlx::query(&sql)
            .bind(before)
            .fetch_all(&self.pool)
            .await?;
        Self::rows_to_records(&rows)
    }

    #[instrument(skip(self))]
    async fn move_record(
        &self,
        id: &str,
        from: Partition,
        to: Partition,
        at: DateTime<Utc>,
    ) -> Result<MoveOutcome> {
        let write_err = |e: sqlx::Error| LivescoreError::StoreWrite {
            id: id.to_string(),
            reason: e.to_string(),
        };

        let mut tx = self.pool.begin().await.map_err(write_err)?;

        // Lock the source row so a concurrent upsert cannot slip in between copy and delete
        let select = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE id = $1 FOR UPDATE",
            from.table()
        );
        let Some(row) = sqlx::query(&select)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(write_err)?
        else {
            tx.rollback().await.map_err(write_err)?;
            return Ok(MoveOutcome::Missing);
        };

        let mut record = Self::row_to_record(&row)?;
        if to == Partition::History {
            record = record.into_archived(at);
        }

        let insert = format!(
            "INSERT INTO {} ({RECORD_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (id) DO NOTHING",
            to.table()
        );
        let inserted = sqlx::query(&insert)
            .bind(&record.id)
            .bind(record.status.as_str())
            .bind(record.detail.as_ref().map(Json))
            .bind(record.created_at)
            .bind(record.last_seen_at)
            .bind(record.quarantined_since)
            .bind(record.last_score_change_at)
            .bind(record.last_alert_sent_at)
            .bind(record.archived_at)
            .execute(&mut *tx)
            .await
            .map_err(write_err)?
            .rows_affected();

        let delete = format!("DELETE FROM {} WHERE id = $1", from.table());
        sqlx::query(&delete)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;

        tx.commit().await.map_err(write_err)?;

        if inserted == 0 {
            debug!("{} already present in {} partition, keeping existing copy", id, to);
            Ok(MoveOutcome::AlreadyPresent)
        } else {
            Ok(MoveOutcome::Moved)
        }
    }

    async fn delete(&self, partition: Partition, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", partition.table());
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| LivescoreError::StoreWrite {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl LeaseBackend for PostgresStore {
    /// Take the lease when it is free, expired or already ours. The row's
    /// expiry is judged by the database clock; holders bound their own tenure
    /// with a local deadline.
    #[instrument(skip(self))]
    async fn acquire_or_renew(
        &self,
        resource: &str,
        owner: &str,
        lease: Duration,
    ) -> Result<Option<LeaseToken>> {
        let row = sqlx::query(
            r#"
            INSERT INTO leader_leases (resource, owner, acquired_at, expires_at)
            VALUES ($1, $2, NOW(), NOW() + make_interval(secs => $3))
            ON CONFLICT (resource) DO UPDATE SET
                owner = EXCLUDED.owner,
                acquired_at = CASE
                    WHEN leader_leases.owner = EXCLUDED.owner AND leader_leases.expires_at > NOW()
                    THEN leader_leases.acquired_at
                    ELSE EXCLUDED.acquired_at
                END,
                expires_at = EXCLUDED.expires_at
            WHERE leader_leases.owner = EXCLUDED.owner OR leader_leases.expires_at <= NOW()
            RETURNING resource, owner, acquired_at, expires_at
            "#,
        )
        .bind(resource)
        .bind(owner)
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<LeaseToken> {
            Ok(LeaseToken {
                resource: r.try_get("resource")?,
                owner: r.try_get("owner")?,
                acquired_at: r.try_get("acquired_at")?,
                expires_at: r.try_get("expires_at")?,
            })
        })
        .transpose()
    }

    async fn release(&self, resource: &str, owner: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM leader_leases WHERE resource = $1 AND owner = $2")
            .bind(resource)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_lookup_filters_on_status() {
        assert_eq!(
            stale_before_sql(Partition::Active),
            format!(
                "SELECT {RECORD_COLUMNS} FROM events_active \
                 WHERE status IN ('ACTIVE', 'QUARANTINED') AND last_seen_at < $1"
            )
        );
        assert!(stale_before_sql(Partition::History)
            .ends_with("FROM events_history WHERE status IN ('ARCHIVED') AND last_seen_at < $1"));
    }
}
