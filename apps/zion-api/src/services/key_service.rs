use crate::error::ServiceError;
use crate::panel_client::PanelGateway;
use crate::utils::{format_date, generate_marzban_username, local_ts};
use chrono::{Duration, Local, NaiveDateTime};
use std::sync::Arc;
use tracing::{info, warn};
use zion_db::models::store::UserKey;
use zion_db::repositories::{ClientStore, KeyStore};

pub const DAYS_PER_MONTH: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    Bonuses,
    Money,
}

#[derive(Debug, Clone)]
pub struct ProvisionedKey {
    pub key: UserKey,
    pub link: String,
    pub end_date: NaiveDateTime,
}

/// Orchestrates the key state machine: trial creation, paid creation,
/// extension, deletion. Combines store reads/writes with panel calls;
/// the pattern is read local -> call remote -> write local, which is
/// best-effort consistent, not transactional.
#[derive(Clone)]
pub struct KeyService {
    clients: Arc<dyn ClientStore>,
    keys: Arc<dyn KeyStore>,
    panel: Arc<dyn PanelGateway>,
    trial_days: i64,
}

impl KeyService {
    pub fn new(
        clients: Arc<dyn ClientStore>,
        keys: Arc<dyn KeyStore>,
        panel: Arc<dyn PanelGateway>,
        trial_days: i64,
    ) -> Self {
        Self {
            clients,
            keys,
            panel,
            trial_days,
        }
    }

    pub fn trial_days(&self) -> i64 {
        self.trial_days
    }

    /// Resolves a key and verifies it belongs to `tg_id`. Every flow
    /// that touches an existing key goes through this check before
    /// charging or calling the panel.
    pub async fn get_owned(&self, tg_id: i64, key_id: i64) -> Result<UserKey, ServiceError> {
        let key = self
            .keys
            .get(key_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Key not found".into()))?;
        if key.tg_id != tg_id {
            warn!("tg_id={} tried to use foreign key {}", tg_id, key_id);
            return Err(ServiceError::Forbidden("Not your key".into()));
        }
        Ok(key)
    }

    /// One trial per client, on first contact. The displayed end date
    /// is informational: the remote account is created on hold, so its
    /// clock starts on the first connection.
    pub async fn create_trial(
        &self,
        tg_id: i64,
        base_name: &str,
    ) -> Result<ProvisionedKey, ServiceError> {
        let account_name = generate_marzban_username(base_name, "trial", true);

        let (link, account_name) = self
            .panel
            .create_account(tg_id, &account_name, self.trial_days, true)
            .await
            .map_err(|e| ServiceError::ProvisioningFailed(format!("trial for {tg_id}: {e:#}")))?;

        let end_date = Local::now().naive_local() + Duration::days(self.trial_days);
        let key = self
            .keys
            .create(tg_id, &account_name, "Trial key", &link, end_date, true)
            .await?;

        info!("Trial provisioned for tg_id={} -> {}", tg_id, account_name);
        Ok(ProvisionedKey { key, link, end_date })
    }

    /// Charges the client ahead of a paid creation or extension:
    /// either an atomic bonus-day deduction or a spend record for the
    /// quoted price. Bonus payments never touch the ledger.
    pub async fn charge(
        &self,
        tg_id: i64,
        months: i32,
        method: PaymentMethod,
        price: f64,
    ) -> Result<(), ServiceError> {
        match method {
            PaymentMethod::Bonuses => {
                let needed = (months as i64 * DAYS_PER_MONTH) as i32;
                if !self.clients.deduct_bonus_days(tg_id, needed).await? {
                    return Err(ServiceError::InsufficientBalance);
                }
                info!("Deducted {} bonus days from tg_id={}", needed, tg_id);
            }
            PaymentMethod::Money => {
                self.clients.add_spend(tg_id, &format!("{price}")).await?;
            }
        }
        Ok(())
    }

    /// Provisions a paid key: active immediately, absolute expiry.
    /// Payment must already be settled (bonus deduction, spend record
    /// or a matched ledger transaction).
    pub async fn create_paid(
        &self,
        tg_id: i64,
        base_name: &str,
        device_name: &str,
        months: i32,
    ) -> Result<ProvisionedKey, ServiceError> {
        let duration_days = months as i64 * DAYS_PER_MONTH;
        let account_name = generate_marzban_username(base_name, device_name, false);

        let (link, account_name) = self
            .panel
            .create_account(tg_id, &account_name, duration_days, false)
            .await
            .map_err(|e| ServiceError::ProvisioningFailed(format!("paid key for {tg_id}: {e:#}")))?;

        let end_date = Local::now().naive_local() + Duration::days(duration_days);
        let key = self
            .keys
            .create(tg_id, &account_name, device_name, &link, end_date, false)
            .await?;
        self.clients.extend_aggregate(tg_id, end_date).await?;

        info!(
            "Paid key provisioned for tg_id={} -> {} ({} months)",
            tg_id, account_name, months
        );
        Ok(ProvisionedKey { key, link, end_date })
    }

    /// Charge-and-extend in the only safe order: the key is resolved
    /// and ownership-checked first, so a request against a nonexistent
    /// or foreign key costs the user nothing.
    pub async fn extend_purchase(
        &self,
        tg_id: i64,
        key_id: i64,
        months: i32,
        method: PaymentMethod,
        price: f64,
    ) -> Result<(UserKey, NaiveDateTime), ServiceError> {
        self.get_owned(tg_id, key_id).await?;
        self.charge(tg_id, months, method, price).await?;
        self.extend(tg_id, key_id, months).await
    }

    /// Extends a specific key off its own stored end date, never the
    /// client aggregate. Early renewal keeps the remaining time; a
    /// lapsed key restarts from now.
    pub async fn extend(
        &self,
        tg_id: i64,
        key_id: i64,
        months: i32,
    ) -> Result<(UserKey, NaiveDateTime), ServiceError> {
        let key = self.get_owned(tg_id, key_id).await?;

        let now = Local::now().naive_local();
        let new_end = compute_extended_end(key.end_date, now, months);

        self.panel
            .update_account(&key.marzban_username, local_ts(new_end))
            .await?;

        self.keys.set_end_date(key_id, new_end).await?;
        self.clients.extend_aggregate(tg_id, new_end).await?;

        info!(
            "Extended key {} for tg_id={} by {} months until {}",
            key_id,
            tg_id,
            months,
            format_date(new_end)
        );
        Ok((key, new_end))
    }

    /// Deletes one key. The remote deletion is attempted first but its
    /// failure never blocks the local delete; the client row stays.
    pub async fn delete(&self, tg_id: i64, key_id: i64) -> Result<UserKey, ServiceError> {
        let key = self.get_owned(tg_id, key_id).await?;

        if let Err(e) = self.panel.delete_account(&key.marzban_username).await {
            warn!(
                "Remote delete of {} failed, removing local record anyway: {:#}",
                key.marzban_username, e
            );
        }

        self.keys.delete(key_id).await?;
        info!("Deleted key {} for tg_id={}", key_id, tg_id);
        Ok(key)
    }
}

/// Extension base rule: a future end date is kept (no lost time on
/// early renewal), a past one restarts from `now`.
pub fn compute_extended_end(
    current: Option<NaiveDateTime>,
    now: NaiveDateTime,
    months: i32,
) -> NaiveDateTime {
    let base = match current {
        Some(end) if end > now => end,
        _ => now,
    };
    base + Duration::days(months as i64 * DAYS_PER_MONTH)
}
