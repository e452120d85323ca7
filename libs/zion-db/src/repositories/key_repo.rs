use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::PgPool;

use crate::models::store::UserKey;

/// Store operations on the `user_keys` table.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn create(
        &self,
        tg_id: i64,
        marzban_username: &str,
        device_name: &str,
        vless_link: &str,
        end_date: NaiveDateTime,
        is_trial: bool,
    ) -> Result<UserKey>;

    async fn get(&self, key_id: i64) -> Result<Option<UserKey>>;

    async fn list(&self, tg_id: i64) -> Result<Vec<UserKey>>;

    async fn set_end_date(&self, key_id: i64, end_date: NaiveDateTime) -> Result<()>;

    async fn delete(&self, key_id: i64) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct KeyRepository {
    pool: PgPool,
}

impl KeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyStore for KeyRepository {
    async fn create(
        &self,
        tg_id: i64,
        marzban_username: &str,
        device_name: &str,
        vless_link: &str,
        end_date: NaiveDateTime,
        is_trial: bool,
    ) -> Result<UserKey> {
        let key = sqlx::query_as::<_, UserKey>(
            r#"
            INSERT INTO user_keys (tg_id, marzban_username, device_name, vless_link, end_date, is_trial)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(tg_id)
        .bind(marzban_username)
        .bind(device_name)
        .bind(vless_link)
        .bind(end_date)
        .bind(is_trial)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create user key")?;

        tracing::info!(
            "Created key '{}' for tg_id={} (account={}, trial={})",
            device_name,
            tg_id,
            marzban_username,
            is_trial
        );
        Ok(key)
    }

    async fn get(&self, key_id: i64) -> Result<Option<UserKey>> {
        sqlx::query_as::<_, UserKey>("SELECT * FROM user_keys WHERE id = $1")
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch key by ID")
    }

    async fn list(&self, tg_id: i64) -> Result<Vec<UserKey>> {
        sqlx::query_as::<_, UserKey>(
            "SELECT * FROM user_keys WHERE tg_id = $1 ORDER BY created_at DESC",
        )
        .bind(tg_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list user keys")
    }

    async fn set_end_date(&self, key_id: i64, end_date: NaiveDateTime) -> Result<()> {
        sqlx::query("UPDATE user_keys SET end_date = $1 WHERE id = $2")
            .bind(end_date)
            .bind(key_id)
            .execute(&self.pool)
            .await
            .context("Failed to update key end date")?;
        Ok(())
    }

    async fn delete(&self, key_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM user_keys WHERE id = $1")
            .bind(key_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete key")?;
        Ok(())
    }
}
