use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One end-user subscriber. `end_date` is the aggregate expiry the
/// sweeper keys off; per-key end dates on [`UserKey`] are authoritative
/// for extensions.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub id: i64,
    pub tg_id: i64,
    pub username: Option<String>,
    pub payment_status: String,
    pub end_date: Option<NaiveDateTime>,
    pub disabled_at: Option<NaiveDateTime>,
    pub spend: String,
    pub referrer_id: Option<i64>,
    pub bonus_days: i32,
    pub used_bonus_days: i32,
    pub trial_given: bool,
    pub created_at: NaiveDateTime,
}

impl Client {
    pub fn display_name(&self) -> String {
        self.username
            .clone()
            .unwrap_or_else(|| format!("id{}", self.tg_id))
    }
}

/// One provisioned VPN account belonging to a client. The remote
/// account name is globally unique on the panel.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserKey {
    pub id: i64,
    pub tg_id: i64,
    pub marzban_username: String,
    pub device_name: String,
    pub vless_link: Option<String>,
    pub end_date: Option<NaiveDateTime>,
    pub is_trial: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Referral {
    pub id: i64,
    pub referrer_tg_id: i64,
    pub invited_tg_id: i64,
    pub invited_at: NaiveDateTime,
    pub reward_given: bool,
}
