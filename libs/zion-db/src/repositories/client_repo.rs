use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::PgPool;

use crate::models::store::Client;
use crate::utils::add_decimal_str;

/// Store operations on the `clients` table. The service layer works
/// against this trait so business flows can be exercised without a
/// live Postgres.
#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn get(&self, tg_id: i64) -> Result<Option<Client>>;

    /// Creates the client row with the trial already marked as granted.
    /// Returns `false` without touching the existing row when the
    /// identity is already known.
    async fn create(
        &self,
        tg_id: i64,
        username: Option<&str>,
        referrer_id: Option<i64>,
        trial_end: NaiveDateTime,
    ) -> Result<bool>;

    /// Pushes the aggregate end date forward (never backward) and
    /// re-activates the client. Called after any paid purchase or
    /// extension so the sweeper sees the renewal.
    async fn extend_aggregate(&self, tg_id: i64, end_date: NaiveDateTime) -> Result<()>;

    /// Marks a lapsed client as expired, keeping the disable timestamp
    /// so the next sweep skips the row.
    async fn mark_expired(&self, tg_id: i64, disabled_at: NaiveDateTime) -> Result<()>;

    /// Adds `delta` (a decimal string) to the stored spend total.
    async fn add_spend(&self, tg_id: i64, delta: &str) -> Result<()>;

    async fn add_bonus_days(&self, tg_id: i64, days: i32) -> Result<()>;

    /// Atomic check-and-deduct. Returns `false` when the balance is
    /// insufficient; the row is left untouched in that case.
    async fn deduct_bonus_days(&self, tg_id: i64, days: i32) -> Result<bool>;

    /// Clients whose aggregate period has elapsed and who have not been
    /// disabled yet. This is the sweeper's work list.
    async fn list_expired_enabled(&self, now: NaiveDateTime) -> Result<Vec<Client>>;

    async fn count_all(&self) -> Result<i64>;
    async fn count_active(&self, now: NaiveDateTime) -> Result<i64>;
    async fn count_inactive(&self, now: NaiveDateTime) -> Result<i64>;
    async fn total_income(&self) -> Result<f64>;
}

#[derive(Debug, Clone)]
pub struct ClientRepository {
    pool: PgPool,
}

impl ClientRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClientStore for ClientRepository {
    async fn get(&self, tg_id: i64) -> Result<Option<Client>> {
        sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE tg_id = $1")
            .bind(tg_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch client by TG ID")
    }

    async fn create(
        &self,
        tg_id: i64,
        username: Option<&str>,
        referrer_id: Option<i64>,
        trial_end: NaiveDateTime,
    ) -> Result<bool> {
        let username = username
            .map(str::to_string)
            .unwrap_or_else(|| format!("user_{tg_id}"));

        let inserted = sqlx::query(
            r#"
            INSERT INTO clients (tg_id, username, payment_status, end_date, referrer_id, trial_given)
            VALUES ($1, $2, 'trial', $3, $4, TRUE)
            ON CONFLICT (tg_id) DO NOTHING
            "#,
        )
        .bind(tg_id)
        .bind(&username)
        .bind(trial_end)
        .bind(referrer_id)
        .execute(&self.pool)
        .await
        .context("Failed to create client")?
        .rows_affected();

        Ok(inserted > 0)
    }

    async fn extend_aggregate(&self, tg_id: i64, end_date: NaiveDateTime) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE clients
            SET end_date = GREATEST(COALESCE(end_date, $1), $1),
                payment_status = 'active',
                disabled_at = NULL
            WHERE tg_id = $2
            "#,
        )
        .bind(end_date)
        .bind(tg_id)
        .execute(&self.pool)
        .await
        .context("Failed to extend aggregate end date")?;
        Ok(())
    }

    async fn mark_expired(&self, tg_id: i64, disabled_at: NaiveDateTime) -> Result<()> {
        sqlx::query(
            "UPDATE clients SET payment_status = 'expired', disabled_at = $1 WHERE tg_id = $2",
        )
        .bind(disabled_at)
        .bind(tg_id)
        .execute(&self.pool)
        .await
        .context("Failed to mark client expired")?;
        Ok(())
    }

    /// The row is locked for the read-modify-write so concurrent
    /// payments for the same client cannot lose an update.
    async fn add_spend(&self, tg_id: i64, delta: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT spend FROM clients WHERE tg_id = $1 FOR UPDATE")
                .bind(tg_id)
                .fetch_optional(&mut *tx)
                .await
                .context("Failed to read spend")?;

        let Some(current) = current else {
            return Ok(());
        };
        let new_spend = add_decimal_str(&current, delta);

        sqlx::query("UPDATE clients SET spend = $1 WHERE tg_id = $2")
            .bind(&new_spend)
            .bind(tg_id)
            .execute(&mut *tx)
            .await
            .context("Failed to update spend")?;

        tx.commit().await?;
        tracing::info!("Spend for {}: {} -> {}", tg_id, current, new_spend);
        Ok(())
    }

    async fn add_bonus_days(&self, tg_id: i64, days: i32) -> Result<()> {
        sqlx::query("UPDATE clients SET bonus_days = bonus_days + $1 WHERE tg_id = $2")
            .bind(days)
            .bind(tg_id)
            .execute(&self.pool)
            .await
            .context("Failed to add bonus days")?;
        Ok(())
    }

    async fn deduct_bonus_days(&self, tg_id: i64, days: i32) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE clients
            SET bonus_days = bonus_days - $1,
                used_bonus_days = used_bonus_days + $1
            WHERE tg_id = $2 AND bonus_days >= $1
            "#,
        )
        .bind(days)
        .bind(tg_id)
        .execute(&self.pool)
        .await
        .context("Failed to deduct bonus days")?
        .rows_affected();

        Ok(updated > 0)
    }

    async fn list_expired_enabled(&self, now: NaiveDateTime) -> Result<Vec<Client>> {
        sqlx::query_as::<_, Client>(
            "SELECT * FROM clients WHERE end_date <= $1 AND disabled_at IS NULL",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list expired clients")
    }

    async fn count_all(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clients")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_active(&self, now: NaiveDateTime) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clients WHERE end_date > $1")
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_inactive(&self, now: NaiveDateTime) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clients WHERE end_date <= $1")
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn total_income(&self) -> Result<f64> {
        let total: Option<f64> = sqlx::query_scalar(
            "SELECT SUM(CAST(spend AS DOUBLE PRECISION)) FROM clients WHERE spend ~ '^-?[0-9.]+$'",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to sum income")?;
        Ok(total.unwrap_or(0.0))
    }
}
