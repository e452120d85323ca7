use crate::error::ServiceError;
use crate::retry::send_with_retry;
use crate::settings::LedgerSettings;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Refresh slightly before the reported expiry so an in-flight call
/// never races the cutoff.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenPair {
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(default)]
    token_expiry: i64,
}

/// Read side of the tips ledger. Time-windowed transaction queries
/// only; the window is caller-supplied and passed through untouched.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn get_timeline(
        &self,
        page: u32,
        limit: u32,
        date_from: &str,
        date_to: &str,
    ) -> Result<Timeline, ServiceError>;
}

/// OAuth2-style client for the tips ledger.
#[derive(Clone)]
pub struct LedgerClient {
    http: reqwest::Client,
    cfg: LedgerSettings,
    tokens: Arc<Mutex<TokenPair>>,
}

#[derive(Debug, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub succeed: bool,
    #[serde(default)]
    pub data: TimelineData,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimelineData {
    #[serde(default)]
    pub items: Vec<TimelineItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelineItem {
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(rename = "paymentAmount", default)]
    pub payment_amount: f64,
}

impl LedgerClient {
    pub fn new(cfg: LedgerSettings) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(&cfg.token_file)
            .with_context(|| format!("Ledger token file {} not readable", cfg.token_file))?;
        let tokens: TokenPair = serde_json::from_str(&raw)
            .with_context(|| format!("Ledger token file {} is malformed", cfg.token_file))?;
        info!("Loaded ledger tokens from {}", cfg.token_file);

        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            cfg,
            tokens: Arc::new(Mutex::new(tokens)),
        })
    }

    fn persist(&self, tokens: &TokenPair) {
        match serde_json::to_string(tokens) {
            Ok(raw) => {
                if let Err(e) = fs::write(&self.cfg.token_file, raw) {
                    warn!("Failed to persist ledger tokens: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize ledger tokens: {}", e),
        }
    }

    async fn refresh(&self, tokens: &mut TokenPair) -> Result<(), ServiceError> {
        let refresh_token = tokens
            .refresh_token
            .clone()
            .ok_or(ServiceError::CredentialsExhausted)?;

        let url = format!("{}/connect/token", self.cfg.identity_url);
        let resp = send_with_retry("ledger token refresh", || {
            self.http
                .post(&url)
                .form(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.as_str()),
                    ("client_id", self.cfg.client_id.as_str()),
                ])
                .send()
        })
        .await?;

        if !resp.status().is_success() {
            // A rejected refresh token cannot be recovered from here.
            warn!("Ledger refused token refresh: {}", resp.status());
            return Err(ServiceError::CredentialsExhausted);
        }

        #[derive(Deserialize)]
        struct RefreshResponse {
            access_token: String,
            refresh_token: String,
            #[serde(default)]
            expires_in: i64,
        }

        let body: RefreshResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::RemoteUnavailable(format!("ledger token body: {e}")))?;

        let expires_in = if body.expires_in > 0 { body.expires_in } else { 3600 };
        tokens.access_token = Some(body.access_token);
        tokens.refresh_token = Some(body.refresh_token);
        tokens.token_expiry = chrono::Local::now().timestamp() + expires_in - EXPIRY_SKEW_SECS;
        self.persist(tokens);
        info!("Ledger tokens refreshed");
        Ok(())
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        let mut tokens = self.tokens.lock().await;
        let now = chrono::Local::now().timestamp();
        if tokens.access_token.is_none() || now >= tokens.token_expiry {
            self.refresh(&mut tokens).await?;
        }
        tokens
            .access_token
            .clone()
            .ok_or(ServiceError::CredentialsExhausted)
    }
}

#[async_trait]
impl LedgerGateway for LedgerClient {
    /// `GET /api/timeline` for the given page and caller-supplied time
    /// window (ISO-8601 strings with offset).
    async fn get_timeline(
        &self,
        page: u32,
        limit: u32,
        date_from: &str,
        date_to: &str,
    ) -> Result<Timeline, ServiceError> {
        let token = self.access_token().await?;
        let url = format!("{}/api/timeline", self.cfg.api_url);

        let resp = send_with_retry("ledger timeline", || {
            self.http
                .get(&url)
                .bearer_auth(&token)
                .query(&[
                    ("page", page.to_string()),
                    ("limit", limit.to_string()),
                    ("dateFrom", date_from.to_string()),
                    ("dateTo", date_to.to_string()),
                ])
                .send()
        })
        .await?;

        if !resp.status().is_success() {
            return Err(ServiceError::RemoteUnavailable(format!(
                "ledger timeline -> {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| ServiceError::RemoteUnavailable(format!("ledger timeline body: {e}")))
    }
}
