use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

/// Store operations on the `referrals` table.
#[async_trait]
pub trait ReferralStore: Send + Sync {
    /// Records the (referrer, invited) edge. Returns `false` when the
    /// pair already exists, so a bonus is granted at most once.
    async fn insert_unique(&self, referrer_tg_id: i64, invited_tg_id: i64) -> Result<bool>;

    async fn count(&self, referrer_tg_id: i64) -> Result<i64>;
}

#[derive(Debug, Clone)]
pub struct ReferralRepository {
    pool: PgPool,
}

impl ReferralRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferralStore for ReferralRepository {
    async fn insert_unique(&self, referrer_tg_id: i64, invited_tg_id: i64) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO referrals (referrer_tg_id, invited_tg_id, reward_given)
            VALUES ($1, $2, TRUE)
            ON CONFLICT (referrer_tg_id, invited_tg_id) DO NOTHING
            "#,
        )
        .bind(referrer_tg_id)
        .bind(invited_tg_id)
        .execute(&self.pool)
        .await
        .context("Failed to insert referral")?
        .rows_affected();

        Ok(inserted > 0)
    }

    async fn count(&self, referrer_tg_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM referrals WHERE referrer_tg_id = $1")
                .bind(referrer_tg_id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to count referrals")?;
        Ok(count)
    }
}
