use async_trait::async_trait;
use snip_core::codec::encode_url_code;
use snip_core::error::{Result, StorageError};
use snip_core::storage::{check_owner, ReadStorage, Storage};
use snip_core::{Deadline, UrlRecord, WriteOutcome};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Connection, Row};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

pub const POSTGRES_INSTANCE: &str = "postgres";

const SCHEMA: &str = include_str!("../ddl/postgres/urls.sql");

/// PostgreSQL implementation of the storage contract.
///
/// Ids come from the `urls` sequence, so rolled back batches leave gaps in
/// it. Concurrent writers of the same URL are serialized with a
/// transaction-scoped advisory lock keyed on the URL. A batch takes all of
/// its locks up front, in ascending key order.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

/// Records resolved by a batch and how many of them were created by it.
struct BatchWrite {
    records: HashMap<String, UrlRecord>,
    created: usize,
}

impl PostgresStorage {
    /// Creates a storage from an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool against `database_dsn` and applies the schema.
    pub async fn connect(database_dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_dsn)
            .await
            .map_err(map_sqlx_error)?;
        let storage = Self::new(pool);
        storage.migrate().await?;
        Ok(storage)
    }

    /// Creates the `urls` table and its indexes if they are missing.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        info!("postgres schema is up to date");
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write_batch<S: AsRef<str> + Sync>(
        &self,
        deadline: Deadline,
        original_urls: &[S],
        owner: i64,
    ) -> Result<BatchWrite> {
        let mut seen = HashSet::new();
        let urls: Vec<&str> = original_urls
            .iter()
            .map(AsRef::as_ref)
            .filter(|url| seen.insert(*url))
            .collect();

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut batch = BatchWrite {
            records: HashMap::new(),
            created: 0,
        };

        // Every writer takes its locks in ascending key order, so two batches
        // sharing URLs never wait on each other in a cycle.
        let lock_keys = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT hashtext(url)::bigint AS lock_key
            FROM unnest($1::text[]) AS url
            ORDER BY lock_key
            "#,
        )
        .bind(&urls)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        for lock_key in lock_keys {
            // dropping `tx` on any early return rolls the batch back
            deadline.check("write_urls")?;
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(lock_key)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        for url in urls {
            deadline.check("write_urls")?;

            let existing = sqlx::query(
                r#"
                SELECT id, short_code, original_url, owner_user_id, deleted
                FROM urls
                WHERE original_url = $1
                "#,
            )
            .bind(url)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            if let Some(row) = existing {
                batch.records.insert(url.to_string(), row_to_record(&row)?);
                continue;
            }

            let id = sqlx::query_scalar::<_, i64>(
                "SELECT nextval(pg_get_serial_sequence('urls', 'id'))",
            )
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
            let short_code = encode_url_code(id)?;

            let inserted = sqlx::query(
                r#"
                INSERT INTO urls (id, short_code, original_url, owner_user_id)
                SELECT $1, $2, $3, $4
                WHERE NOT EXISTS (SELECT 1 FROM urls WHERE original_url = $3)
                "#,
            )
            .bind(id)
            .bind(&short_code)
            .bind(url)
            .bind(owner)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            if inserted.rows_affected() != 1 {
                return Err(StorageError::Query(format!(
                    "conditional insert of '{url}' affected {} rows",
                    inserted.rows_affected()
                )));
            }

            batch.created += 1;
            batch.records.insert(
                url.to_string(),
                UrlRecord {
                    id,
                    short_code,
                    original_url: url.to_string(),
                    owner_user_id: owner,
                    deleted: false,
                },
            );
        }

        deadline.check("write_urls")?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(batch)
    }
}

fn row_to_record(row: &PgRow) -> Result<UrlRecord> {
    Ok(UrlRecord {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        short_code: row.try_get("short_code").map_err(map_sqlx_error)?,
        original_url: row.try_get("original_url").map_err(map_sqlx_error)?,
        owner_user_id: row.try_get("owner_user_id").map_err(map_sqlx_error)?,
        deleted: row.try_get("deleted").map_err(map_sqlx_error)?,
    })
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

#[async_trait]
impl ReadStorage for PostgresStorage {
    fn instance_name(&self) -> &'static str {
        POSTGRES_INSTANCE
    }

    async fn read_url(&self, deadline: Deadline, short_code: &str) -> Result<String> {
        let row = deadline
            .run("read_url", async {
                sqlx::query(
                    r#"
                    SELECT original_url, deleted
                    FROM urls
                    WHERE short_code = $1
                    "#,
                )
                .bind(short_code)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)
            })
            .await?;

        let Some(row) = row else {
            return Err(StorageError::NotFound(format!(
                "short code '{short_code}' is unknown"
            )));
        };

        let deleted: bool = row.try_get("deleted").map_err(map_sqlx_error)?;
        if deleted {
            return Err(StorageError::Gone(format!(
                "short code '{short_code}' was deleted"
            )));
        }
        row.try_get("original_url").map_err(map_sqlx_error)
    }

    async fn user_urls(&self, deadline: Deadline, owner: i64) -> Result<Vec<UrlRecord>> {
        let rows = deadline
            .run("user_urls", async {
                sqlx::query(
                    r#"
                    SELECT id, short_code, original_url, owner_user_id, deleted
                    FROM urls
                    WHERE owner_user_id = $1
                    ORDER BY id
                    "#,
                )
                .bind(owner)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)
            })
            .await?;

        if rows.is_empty() {
            return Err(StorageError::NotFound(format!(
                "user {owner} has no stored urls"
            )));
        }
        rows.iter().map(row_to_record).collect()
    }

    async fn stats(&self, deadline: Deadline) -> Result<usize> {
        let count: i64 = deadline
            .run("stats", async {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM urls")
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_sqlx_error)
            })
            .await?;

        usize::try_from(count)
            .map_err(|_| StorageError::InvalidData(format!("negative url count {count}")))
    }

    async fn ping(&self, deadline: Deadline) -> Result<()> {
        deadline
            .run("ping", async {
                let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
                conn.ping().await.map_err(map_sqlx_error)
            })
            .await
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn write_url(
        &self,
        deadline: Deadline,
        original_url: &str,
        owner: i64,
    ) -> Result<WriteOutcome> {
        let mut batch = deadline
            .run("write_url", self.write_batch(deadline, &[original_url], owner))
            .await?;
        let conflict = batch.created == 0;
        let record = batch
            .records
            .remove(original_url)
            .ok_or_else(|| StorageError::InvalidData(format!("'{original_url}' was not written")))?;

        debug!(short_code = %record.short_code, owner, conflict, "url written");
        Ok(WriteOutcome {
            short_code: record.short_code,
            conflict,
        })
    }

    async fn write_urls(
        &self,
        deadline: Deadline,
        original_urls: &[String],
        owner: i64,
    ) -> Result<HashMap<String, UrlRecord>> {
        let batch = deadline
            .run("write_urls", self.write_batch(deadline, original_urls, owner))
            .await?;

        debug!(
            owner,
            requested = original_urls.len(),
            created = batch.created,
            "url batch written"
        );
        Ok(batch.records)
    }

    async fn check_deleted_urls(
        &self,
        deadline: Deadline,
        owner: i64,
        short_codes: &[String],
    ) -> Result<()> {
        let rows = deadline
            .run("check_deleted_urls", async {
                sqlx::query(
                    r#"
                    SELECT id, short_code, original_url, owner_user_id, deleted
                    FROM urls
                    WHERE short_code = ANY($1)
                    "#,
                )
                .bind(short_codes)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)
            })
            .await?;

        let records = rows.iter().map(row_to_record).collect::<Result<Vec<_>>>()?;
        check_owner(owner, &records)
    }

    async fn delete_urls(&self, deadline: Deadline, short_codes: &[String]) -> Result<()> {
        let result = deadline
            .run("delete_urls", async {
                sqlx::query("UPDATE urls SET deleted = TRUE WHERE short_code = ANY($1)")
                    .bind(short_codes)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_error)
            })
            .await?;

        debug!(
            requested = short_codes.len(),
            affected = result.rows_affected(),
            "urls deleted"
        );
        Ok(())
    }

    async fn stop(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("postgres pool closed");
        }
    }
}
