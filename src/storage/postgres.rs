use crate::models::{ShortLink, VisitEvent, VisitRow};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
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
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS urls (
                id BIGSERIAL PRIMARY KEY,
                short_code TEXT NOT NULL UNIQUE,
                original_url TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                created_by TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_created_by ON urls(created_by)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visits (
                id BIGSERIAL PRIMARY KEY,
                short_code TEXT NOT NULL,
                timestamp BIGINT,
                device TEXT,
                os TEXT,
                ip TEXT,
                location TEXT,
                region TEXT,
                latitude DOUBLE PRECISION,
                longitude DOUBLE PRECISION,
                referrer TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_visits_short_code ON visits(short_code, id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS admin_users (
                user_id TEXT PRIMARY KEY,
                promoted_at BIGINT NOT NULL
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

        let row = sqlx::query_as::<_, ShortLink>(
            r#"
            INSERT INTO urls (short_code, original_url, created_at, created_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (short_code) DO NOTHING
            RETURNING id, short_code, original_url, created_at, created_by
            "#,
        )
        .bind(short_code)
        .bind(original_url)
        .bind(created_at)
        .bind(created_by)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        row.ok_or(StorageError::Conflict)
    }

    async fn get(&self, short_code: &str) -> Result<Option<ShortLink>> {
        let url = sqlx::query_as::<_, ShortLink>(
            r#"
            SELECT id, short_code, original_url, created_at, created_by
            FROM urls
            WHERE short_code = $1
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
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
            WHERE EXISTS (SELECT 1 FROM urls WHERE short_code = $1)
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
            WHERE short_code = $1
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
                    WHERE created_by = $1
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

        let result = sqlx::query("DELETE FROM urls WHERE short_code = $1 AND created_by = $2")
            .bind(short_code)
            .bind(owner)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM visits WHERE short_code = $1")
            .bind(short_code)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn is_admin(&self, user_id: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM admin_users WHERE user_id = $1",
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
            VALUES ($1, $2)
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
        let result = sqlx::query("DELETE FROM admin_users WHERE user_id = $1")
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
