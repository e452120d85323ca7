use crate::error::ServiceError;
use crate::retry::send_with_retry;
use crate::settings::PanelSettings;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote account operations on the VPN panel. The services depend on
/// this trait, so provisioning flows are testable against a fake
/// panel.
#[async_trait]
pub trait PanelGateway: Send + Sync {
    /// Creates the remote account and returns (subscription link,
    /// account name).
    async fn create_account(
        &self,
        tg_id: i64,
        account_name: &str,
        duration_days: i64,
        is_trial: bool,
    ) -> Result<(String, String), ServiceError>;

    /// Forces the account active with a new absolute expiry.
    async fn update_account(&self, account_name: &str, expire_ts: i64)
    -> Result<(), ServiceError>;

    /// Neutralizes a lapsed account without deleting it.
    async fn disable_account(&self, account_name: &str) -> Result<(), ServiceError>;

    async fn delete_account(&self, account_name: &str) -> Result<(), ServiceError>;

    async fn list_expired_accounts(&self, limit: u32)
    -> Result<Vec<ExpiredAccount>, ServiceError>;
}

/// Authenticated client for the VPN panel's admin API. Owns the bearer
/// token lifecycle: loaded from disk at startup, refreshed via
/// username/password when a call comes back 401, persisted on success.
#[derive(Clone)]
pub struct PanelClient {
    http: reqwest::Client,
    cfg: PanelSettings,
    token: Arc<RwLock<Option<String>>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpiredAccount {
    pub username: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub expire: Option<i64>,
}

impl PanelClient {
    pub fn new(cfg: PanelSettings) -> Self {
        let token = match fs::read_to_string(&cfg.token_file) {
            Ok(t) if !t.trim().is_empty() => {
                info!("Loaded panel token from {}", cfg.token_file);
                Some(t.trim().to_string())
            }
            Ok(_) => None,
            Err(e) => {
                warn!("No panel token at {}: {}", cfg.token_file, e);
                None
            }
        };

        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            cfg,
            token: Arc::new(RwLock::new(token)),
        }
    }

    fn persist_token(&self, token: &str) {
        if let Err(e) = fs::write(&self.cfg.token_file, token) {
            warn!("Failed to persist panel token to {}: {}", self.cfg.token_file, e);
        }
    }

    /// Username/password exchange. The panel accepts the grant as JSON
    /// or as a form body depending on version, so try both.
    async fn login(&self) -> Result<(), ServiceError> {
        let url = format!("{}/api/admin/token", self.cfg.host);
        let grant = json!({
            "username": self.cfg.username,
            "password": self.cfg.password,
            "grant_type": "password",
        });

        let resp = send_with_retry("panel login", || {
            let grant = grant.clone();
            let url = url.clone();
            async move {
                let first = self.http.post(&url).json(&grant).send().await?;
                if first.status() == StatusCode::OK {
                    return Ok(first);
                }
                self.http
                    .post(&url)
                    .form(&[
                        ("username", self.cfg.username.as_str()),
                        ("password", self.cfg.password.as_str()),
                        ("grant_type", "password"),
                    ])
                    .send()
                    .await
            }
        })
        .await?;

        if !resp.status().is_success() {
            return Err(ServiceError::RemoteUnavailable(format!(
                "panel login rejected: {}",
                resp.status()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ServiceError::RemoteUnavailable(format!("panel login body: {e}")))?;
        let token = body
            .get("access_token")
            .and_then(|t| t.as_str())
            .ok_or_else(|| {
                ServiceError::RemoteUnavailable("panel login returned no access_token".into())
            })?
            .to_string();

        self.persist_token(&token);
        *self.token.write().await = Some(token);
        info!("Panel login successful");
        Ok(())
    }

    /// Sends one authenticated call; on 401 re-authenticates and
    /// replays the whole chain exactly once.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ServiceError> {
        if self.token.read().await.is_none() {
            self.login().await?;
        }

        for relogin_done in [false, true] {
            let token = self.token.read().await.clone().unwrap_or_default();
            let url = format!("{}{}", self.cfg.host, path);

            let resp = send_with_retry(&format!("panel {method} {path}"), || {
                let mut req = self.http.request(method.clone(), &url).bearer_auth(&token);
                if let Some(b) = body {
                    req = req.json(b);
                }
                async move { req.send().await }
            })
            .await?;

            if resp.status() == StatusCode::UNAUTHORIZED && !relogin_done {
                warn!("Panel rejected token, re-authenticating");
                self.login().await?;
                continue;
            }

            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(ServiceError::RemoteUnavailable(format!(
                    "panel {method} {path} -> {status}: {text}"
                )));
            }

            if method == Method::DELETE {
                return Ok(json!({"success": true}));
            }
            return resp.json().await.map_err(|e| {
                ServiceError::RemoteUnavailable(format!("panel {method} {path} body: {e}"))
            });
        }

        unreachable!("second pass always returns")
    }
}

#[async_trait]
impl PanelGateway for PanelClient {
    /// A trial is created on hold with zero expiry so its clock starts
    /// on first connection; a paid account gets an absolute expiry
    /// immediately.
    async fn create_account(
        &self,
        tg_id: i64,
        account_name: &str,
        duration_days: i64,
        is_trial: bool,
    ) -> Result<(String, String), ServiceError> {
        let payload = build_create_payload(
            tg_id,
            account_name,
            duration_days,
            is_trial,
            chrono::Local::now().timestamp(),
        );

        let body = self.request(Method::POST, "/api/user", Some(&payload)).await?;

        let link = body
            .get("subscription_url")
            .and_then(|l| l.as_str())
            .filter(|l| !l.is_empty())
            .ok_or_else(|| {
                ServiceError::RemoteUnavailable(format!(
                    "panel returned no subscription_url for {account_name}"
                ))
            })?
            .to_string();

        info!("Created panel account {} (trial={})", account_name, is_trial);
        Ok((link, account_name.to_string()))
    }

    async fn update_account(
        &self,
        account_name: &str,
        expire_ts: i64,
    ) -> Result<(), ServiceError> {
        let payload = build_update_payload(account_name, expire_ts);
        self.request(
            Method::PUT,
            &format!("/api/user/{account_name}"),
            Some(&payload),
        )
        .await?;
        info!("Updated panel account {} (expire={})", account_name, expire_ts);
        Ok(())
    }

    async fn disable_account(&self, account_name: &str) -> Result<(), ServiceError> {
        let payload = json!({ "username": account_name, "status": "disabled" });
        self.request(
            Method::PUT,
            &format!("/api/user/{account_name}"),
            Some(&payload),
        )
        .await?;
        info!("Disabled panel account {}", account_name);
        Ok(())
    }

    async fn delete_account(&self, account_name: &str) -> Result<(), ServiceError> {
        self.request(Method::DELETE, &format!("/api/user/{account_name}"), None)
            .await?;
        info!("Deleted panel account {}", account_name);
        Ok(())
    }

    async fn list_expired_accounts(
        &self,
        limit: u32,
    ) -> Result<Vec<ExpiredAccount>, ServiceError> {
        let body = self
            .request(
                Method::GET,
                &format!("/api/users?status=expired&limit={limit}&sort=expire"),
                None,
            )
            .await?;

        let users = body.get("users").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(users)
            .map_err(|e| ServiceError::RemoteUnavailable(format!("expired user list: {e}")))
    }
}

pub(crate) fn build_create_payload(
    tg_id: i64,
    account_name: &str,
    duration_days: i64,
    is_trial: bool,
    now_ts: i64,
) -> Value {
    let mut payload = json!({
        "username": account_name,
        "proxies": {
            "vless": {
                "id": Uuid::new_v4().to_string(),
                "flow": "xtls-rprx-vision",
            }
        },
        "inbounds": {
            "vless": ["VLESS TCP REALITY"],
        },
        "data_limit": 0,
        "data_limit_reset_strategy": "no_reset",
        "note": format!("VPN for tg_id {tg_id}"),
    });

    if is_trial {
        // On-hold with zero expiry: the remote clock starts on the
        // first connection, not at creation time.
        payload["status"] = json!("on_hold");
        payload["expire"] = json!(0);
        payload["on_hold_expire_duration"] = json!(duration_days * 86_400);
    } else {
        payload["status"] = json!("active");
        payload["expire"] = json!(now_ts + duration_days * 86_400);
    }

    payload
}

pub(crate) fn build_update_payload(account_name: &str, expire_ts: i64) -> Value {
    json!({
        "username": account_name,
        "proxies": {
            "vless": {
                "id": Uuid::new_v4().to_string(),
                "flow": "xtls-rprx-vision",
            }
        },
        "inbounds": {
            "vless": ["VLESS TCP REALITY"],
        },
        "expire": expire_ts,
        "data_limit": 0,
        "data_limit_reset_strategy": "no_reset",
        "status": "active",
        "on_hold_expire_duration": null,
    })
}
