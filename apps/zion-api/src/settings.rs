use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct PanelSettings {
    pub host: String,
    pub username: String,
    pub password: String,
    pub token_file: String,
}

#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub identity_url: String,
    pub api_url: String,
    pub client_id: String,
    pub token_file: String,
}

/// Everything the service needs, loaded once at startup and passed
/// explicitly to each component. No global singletons.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub listen_port: u16,
    pub panel: PanelSettings,
    pub ledger: LedgerSettings,
    pub payment_url: String,
    pub bot_token: Option<String>,
    pub bot_name: String,
    pub trial_days: i64,
    pub referral_bonus_days: i32,
    pub sweep_interval_secs: u64,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is not set")?,
            listen_port: env::var("LISTEN_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            panel: PanelSettings {
                host: env::var("PANEL_HOST").context("PANEL_HOST is not set")?,
                username: env::var("PANEL_USERNAME").context("PANEL_USERNAME is not set")?,
                password: env::var("PANEL_PASSWORD").context("PANEL_PASSWORD is not set")?,
                token_file: env::var("PANEL_TOKEN_FILE")
                    .unwrap_or_else(|_| "/var/lib/zion/panel_token".to_string()),
            },
            ledger: LedgerSettings {
                identity_url: env::var("LEDGER_IDENTITY_URL")
                    .unwrap_or_else(|_| "https://identity.cloudtips.ru".to_string()),
                api_url: env::var("LEDGER_API_URL")
                    .unwrap_or_else(|_| "https://api.cloudtips.ru".to_string()),
                client_id: env::var("LEDGER_CLIENT_ID").context("LEDGER_CLIENT_ID is not set")?,
                token_file: env::var("LEDGER_TOKEN_FILE")
                    .unwrap_or_else(|_| "/var/lib/zion/ledger_tokens.json".to_string()),
            },
            payment_url: env::var("PAYMENT_URL").unwrap_or_default(),
            bot_token: env::var("BOT_TOKEN").ok().filter(|t| !t.trim().is_empty()),
            bot_name: env::var("BOT_NAME").unwrap_or_else(|_| "ZionVpnBot".to_string()),
            trial_days: env::var("TRIAL_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            referral_bonus_days: env::var("REFERRAL_BONUS_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7),
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        })
    }
}
