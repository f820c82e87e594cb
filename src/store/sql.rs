use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::LazyLock;

use super::TrialStore;
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::record::{IdentityKind, TrialRecord};

pub const DEFAULT_TABLE: &str = "trial_records";

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid identifier pattern"));

pub type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Explicit column mapping for a record persisted by [`SqlStore`].
///
/// The key column `id` is managed by the store; `COLUMNS` lists every other
/// column as `(name, declaration)` in the order `bind` pushes values.
pub trait SqlRecord: Sized + Send + Sync + 'static {
    const COLUMNS: &'static [(&'static str, &'static str)];

    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q>;

    fn from_row(row: &SqliteRow) -> ThrottlerResult<Self>;
}

impl SqlRecord for TrialRecord {
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("tries", "INTEGER NOT NULL"),
        ("kind", "TEXT NOT NULL"),
        ("window_expiry", "TEXT NOT NULL"),
        ("blocked_until", "TEXT"),
    ];

    fn bind<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(i64::from(self.tries))
            .bind(self.kind.as_str())
            .bind(self.window_expiry)
            .bind(self.blocked_until)
    }

    fn from_row(row: &SqliteRow) -> ThrottlerResult<Self> {
        let tries: i64 = row.try_get("tries")?;
        let tries = u32::try_from(tries).map_err(|e| {
            ThrottlerError::Database(format!("column 'tries' value {} out of range: {}", tries, e))
        })?;
        let kind: String = row.try_get("kind")?;

        Ok(Self {
            tries,
            kind: IdentityKind::from_str(&kind)?,
            window_expiry: row.try_get::<DateTime<Utc>, _>("window_expiry")?,
            blocked_until: row.try_get::<Option<DateTime<Utc>>, _>("blocked_until")?,
        })
    }
}

/// Relational store with one row per identity.
pub struct SqlStore<T> {
    pool: SqlitePool,
    table: String,
    select_sql: String,
    update_sql: String,
    insert_sql: String,
    _record: PhantomData<fn() -> T>,
}

impl<T: SqlRecord> SqlStore<T> {
    pub async fn connect(database_url: &str, table: &str) -> ThrottlerResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        tracing::info!(table = %table, "connected to database");
        Self::new(pool, table)
    }

    pub fn new(pool: SqlitePool, table: &str) -> ThrottlerResult<Self> {
        if !IDENTIFIER.is_match(table) {
            return Err(ThrottlerError::ValidationError(format!(
                "'{}' is not a valid table name",
                table
            )));
        }

        let names: Vec<&str> = T::COLUMNS.iter().map(|(name, _)| *name).collect();
        let assignments: Vec<String> = names.iter().map(|name| format!("{} = ?", name)).collect();
        let placeholders = vec!["?"; names.len() + 1].join(", ");

        Ok(Self {
            pool,
            table: table.to_string(),
            select_sql: format!("SELECT {} FROM {} WHERE id = ?", names.join(", "), table),
            update_sql: format!("UPDATE {} SET {} WHERE id = ?", table, assignments.join(", ")),
            insert_sql: format!(
                "INSERT INTO {} ({}, id) VALUES ({})",
                table,
                names.join(", "),
                placeholders
            ),
            _record: PhantomData,
        })
    }

    /// Create the backing table when it does not exist yet.
    pub async fn migrate(&self) -> ThrottlerResult<()> {
        let columns: Vec<String> = T::COLUMNS
            .iter()
            .map(|(name, declaration)| format!("{} {}", name, declaration))
            .collect();
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY NOT NULL, {})",
            self.table,
            columns.join(", ")
        );

        sqlx::query(&ddl).execute(&self.pool).await?;
        tracing::debug!(table = %self.table, "throttle table ready");
        Ok(())
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl<T: SqlRecord> TrialStore<T> for SqlStore<T> {
    async fn get(&self, key: &str) -> ThrottlerResult<Option<T>> {
        let row = sqlx::query(&self.select_sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| T::from_row(&row)).transpose()
    }

    // Update first, insert when no row was touched. Two round trips, so
    // callers must serialise writers for the same key.
    async fn set(&self, key: &str, record: &T) -> ThrottlerResult<()> {
        let updated = record
            .bind(sqlx::query(&self.update_sql))
            .bind(key)
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            record
                .bind(sqlx::query(&self.insert_sql))
                .bind(key)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn ping(&self) -> ThrottlerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    async fn memory_store() -> SqlStore<TrialRecord> {
        // A single connection keeps every query on the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqlStore::new(pool, DEFAULT_TABLE).unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn sample() -> TrialRecord {
        let now = Utc.timestamp_opt(1_700_000_000, 123_000_000).unwrap();
        TrialRecord::new(IdentityKind::Ip, now, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_get_unknown_key() {
        let store = memory_store().await;
        assert_eq!(store.get("127.0.0.1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_insert_then_update() {
        let store = memory_store().await;
        let mut record = sample();
        store.set("127.0.0.1", &record).await.unwrap();
        assert_eq!(store.get("127.0.0.1").await.unwrap(), Some(record.clone()));

        record.tries = 4;
        record.block(record.window_expiry, Duration::from_secs(300));
        store.set("127.0.0.1", &record).await.unwrap();
        assert_eq!(store.get("127.0.0.1").await.unwrap(), Some(record));

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trial_records")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let store = memory_store().await;
        store.migrate().await.unwrap();
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_unsafe_table_names() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        assert!(SqlStore::<TrialRecord>::new(pool.clone(), "records; DROP TABLE x").is_err());
        assert!(SqlStore::<TrialRecord>::new(pool, "1records").is_err());
    }

    #[tokio::test]
    async fn test_unknown_kind_is_a_storage_error() {
        let store = memory_store().await;
        sqlx::query(
            "INSERT INTO trial_records (id, tries, kind, window_expiry) VALUES ('x', 0, 'cookie', '2024-01-01T00:00:00Z')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        assert!(store.get("x").await.is_err());
    }
}
