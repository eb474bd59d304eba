use crate::models::{ShortLink, VisitEvent, VisitRow};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut options = SqlitePoolOptions::new().max_connections(max_connections);
        // Every in-memory connection is its own database, so keep exactly one alive
        if database_url.contains(":memory:") || database_url.contains("mode=memory") {
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = options
            .connect(database_url)
            .await
            .with_context(|| format!("failed to open SQLite database {database_url}"))?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn now_secs() -> Result<i64> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs() as i64)
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        // Create URLs table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS urls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                short_code TEXT NOT NULL UNIQUE,
                original_url TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                created_by TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_created_by ON urls(created_by)")
            .execute(self.pool.as_ref())
            .await?;

        // Append-only visit log, one row per recorded visit
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                short_code TEXT NOT NULL,
                timestamp INTEGER,
                device TEXT,
                os TEXT,
                ip TEXT,
                location TEXT,
                region TEXT,
                latitude REAL,
                longitude REAL,
                referrer TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_visits_short_code ON visits(short_code, id)")
            .execute(self.pool.as_ref())
            .await?;

        // Manually promoted administrators
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS admin_users (
                user_id TEXT PRIMARY KEY,
                promoted_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_with_code(
        &self,
        short_code: &str,
        original_url: &str,
        created_by: Option<&str>,
    ) -> StorageResult<ShortLink> {
        let created_at = now_secs()?;

        let result = sqlx::query(
            r#"
            INSERT INTO urls (short_code, original_url, created_at, created_by)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(short_code) DO NOTHING
            "#,
        )
        .bind(short_code)
        .bind(original_url)
        .bind(created_at)
        .bind(created_by)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        let url = sqlx::query_as::<_, ShortLink>(
            r#"
            SELECT id, short_code, original_url, created_at, created_by
            FROM urls
            WHERE short_code = ?
            "#,
        )
        .bind(short_code)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        Ok(url)
    }

    async fn get(&self, short_code: &str) -> Result<Option<ShortLink>> {
        let url = sqlx::query_as::<_, ShortLink>(
            r#"
            SELECT id, short_code, original_url, created_at, created_by
            FROM urls
            WHERE short_code = ?
            "#,
        )
        .bind(short_code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(url)
    }

    async fn append_visit(&self, short_code: &str, visit: &VisitEvent) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO visits
                (short_code, timestamp, device, os, ip, location, region, latitude, longitude, referrer)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM urls WHERE short_code = ?)
            "#,
        )
        .bind(short_code)
        .bind(visit.timestamp)
        .bind(visit.device.as_str())
        .bind(&visit.os)
        .bind(&visit.ip)
        .bind(&visit.location)
        .bind(&visit.region)
        .bind(visit.latitude)
        .bind(visit.longitude)
        .bind(&visit.referrer)
        .bind(short_code)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        Ok(())
    }

    async fn visits(&self, short_code: &str) -> Result<Vec<VisitEvent>> {
        let rows = sqlx::query_as::<_, VisitRow>(
            r#"
            SELECT id, short_code, timestamp, device, os, ip, location, region,
                   latitude, longitude, referrer
            FROM visits
            WHERE short_code = ?
            ORDER BY id ASC
            "#,
        )
        .bind(short_code)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows.into_iter().map(VisitEvent::from).collect())
    }

    async fn list(&self, created_by: Option<&str>) -> Result<Vec<ShortLink>> {
        let urls = match created_by {
            None => {
                sqlx::query_as::<_, ShortLink>(
                    r#"
                    SELECT id, short_code, original_url, created_at, created_by
                    FROM urls
                    ORDER BY created_at DESC, id DESC
                    "#,
                )
                .fetch_all(self.pool.as_ref())
                .await?
            }
            Some(uid) => {
                sqlx::query_as::<_, ShortLink>(
                    r#"
                    SELECT id, short_code, original_url, created_at, created_by
                    FROM urls
                    WHERE created_by = ?
                    ORDER BY created_at DESC, id DESC
                    "#,
                )
                .bind(uid)
                .fetch_all(self.pool.as_ref())
                .await?
            }
        };

        Ok(urls)
    }

    async fn delete(&self, short_code: &str, owner: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM urls WHERE short_code = ? AND created_by = ?")
            .bind(short_code)
            .bind(owner)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM visits WHERE short_code = ?")
            .bind(short_code)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn is_admin(&self, user_id: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM admin_users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count > 0)
    }

    async fn promote_to_admin(&self, user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO admin_users (user_id, promoted_at)
            VALUES (?, ?)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(now_secs()?)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn demote_from_admin(&self, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM admin_users WHERE user_id = ?")
            .bind(user_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_admins(&self) -> Result<Vec<String>> {
        let admins = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM admin_users ORDER BY promoted_at DESC, user_id ASC",
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(admins)
    }
}
