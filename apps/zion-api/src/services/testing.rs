//! In-memory stand-ins for the store and the remote gateways, used by
//! the service tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDateTime};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::error::ServiceError;
use crate::ledger_client::{LedgerGateway, Timeline, TimelineData, TimelineItem};
use crate::panel_client::{ExpiredAccount, PanelGateway};
use zion_db::models::store::{Client, UserKey};
use zion_db::repositories::{ClientStore, KeyStore, ReferralStore};
use zion_db::utils::add_decimal_str;

pub fn client_row(tg_id: i64, bonus_days: i32) -> Client {
    Client {
        id: tg_id,
        tg_id,
        username: Some(format!("user{tg_id}")),
        payment_status: "active".into(),
        end_date: Some(Local::now().naive_local() + Duration::days(10)),
        disabled_at: None,
        spend: "0".into(),
        referrer_id: None,
        bonus_days,
        used_bonus_days: 0,
        trial_given: true,
        created_at: Local::now().naive_local(),
    }
}

pub fn key_row(id: i64, tg_id: i64, device_name: &str) -> UserKey {
    UserKey {
        id,
        tg_id,
        marzban_username: format!("user{tg_id}_{device_name}"),
        device_name: device_name.to_string(),
        vless_link: Some(format!("vless://user{tg_id}_{device_name}")),
        end_date: Some(Local::now().naive_local() + Duration::days(10)),
        is_trial: false,
        created_at: Local::now().naive_local(),
    }
}

#[derive(Default)]
pub struct FakeClientStore {
    pub rows: Mutex<HashMap<i64, Client>>,
}

impl FakeClientStore {
    pub fn with(clients: Vec<Client>) -> Self {
        let store = Self::default();
        {
            let mut rows = store.rows.lock().unwrap();
            for c in clients {
                rows.insert(c.tg_id, c);
            }
        }
        store
    }

    pub fn row(&self, tg_id: i64) -> Client {
        self.rows.lock().unwrap().get(&tg_id).cloned().unwrap()
    }
}

#[async_trait]
impl ClientStore for FakeClientStore {
    async fn get(&self, tg_id: i64) -> Result<Option<Client>> {
        Ok(self.rows.lock().unwrap().get(&tg_id).cloned())
    }

    async fn create(
        &self,
        tg_id: i64,
        username: Option<&str>,
        referrer_id: Option<i64>,
        trial_end: NaiveDateTime,
    ) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&tg_id) {
            return Ok(false);
        }
        let mut row = client_row(tg_id, 0);
        row.username = username.map(str::to_string);
        row.referrer_id = referrer_id;
        row.payment_status = "trial".into();
        row.end_date = Some(trial_end);
        rows.insert(tg_id, row);
        Ok(true)
    }

    async fn extend_aggregate(&self, tg_id: i64, end_date: NaiveDateTime) -> Result<()> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&tg_id) {
            row.end_date = Some(row.end_date.map_or(end_date, |e| e.max(end_date)));
            row.payment_status = "active".into();
            row.disabled_at = None;
        }
        Ok(())
    }

    async fn mark_expired(&self, tg_id: i64, disabled_at: NaiveDateTime) -> Result<()> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&tg_id) {
            row.payment_status = "expired".into();
            row.disabled_at = Some(disabled_at);
        }
        Ok(())
    }

    async fn add_spend(&self, tg_id: i64, delta: &str) -> Result<()> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&tg_id) {
            row.spend = add_decimal_str(&row.spend, delta);
        }
        Ok(())
    }

    async fn add_bonus_days(&self, tg_id: i64, days: i32) -> Result<()> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&tg_id) {
            row.bonus_days += days;
        }
        Ok(())
    }

    async fn deduct_bonus_days(&self, tg_id: i64, days: i32) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&tg_id) else {
            return Ok(false);
        };
        if row.bonus_days < days {
            return Ok(false);
        }
        row.bonus_days -= days;
        row.used_bonus_days += days;
        Ok(true)
    }

    async fn list_expired_enabled(&self, now: NaiveDateTime) -> Result<Vec<Client>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.disabled_at.is_none() && c.end_date.is_some_and(|e| e <= now))
            .cloned()
            .collect())
    }

    async fn count_all(&self) -> Result<i64> {
        Ok(self.rows.lock().unwrap().len() as i64)
    }

    async fn count_active(&self, now: NaiveDateTime) -> Result<i64> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.end_date.is_some_and(|e| e > now))
            .count() as i64)
    }

    async fn count_inactive(&self, now: NaiveDateTime) -> Result<i64> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.end_date.is_some_and(|e| e <= now))
            .count() as i64)
    }

    async fn total_income(&self) -> Result<f64> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter_map(|c| c.spend.parse::<f64>().ok())
            .sum())
    }
}

#[derive(Default)]
pub struct FakeKeyStore {
    pub rows: Mutex<HashMap<i64, UserKey>>,
    next_id: AtomicI64,
}

impl FakeKeyStore {
    pub fn with(keys: Vec<UserKey>) -> Self {
        let store = Self::default();
        {
            let mut rows = store.rows.lock().unwrap();
            for k in keys {
                store.next_id.fetch_max(k.id, Ordering::SeqCst);
                rows.insert(k.id, k);
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl KeyStore for FakeKeyStore {
    async fn create(
        &self,
        tg_id: i64,
        marzban_username: &str,
        device_name: &str,
        vless_link: &str,
        end_date: NaiveDateTime,
        is_trial: bool,
    ) -> Result<UserKey> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let key = UserKey {
            id,
            tg_id,
            marzban_username: marzban_username.to_string(),
            device_name: device_name.to_string(),
            vless_link: Some(vless_link.to_string()),
            end_date: Some(end_date),
            is_trial,
            created_at: Local::now().naive_local(),
        };
        self.rows.lock().unwrap().insert(id, key.clone());
        Ok(key)
    }

    async fn get(&self, key_id: i64) -> Result<Option<UserKey>> {
        Ok(self.rows.lock().unwrap().get(&key_id).cloned())
    }

    async fn list(&self, tg_id: i64) -> Result<Vec<UserKey>> {
        let mut keys: Vec<UserKey> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|k| k.tg_id == tg_id)
            .cloned()
            .collect();
        keys.sort_by_key(|k| std::cmp::Reverse(k.id));
        Ok(keys)
    }

    async fn set_end_date(&self, key_id: i64, end_date: NaiveDateTime) -> Result<()> {
        if let Some(key) = self.rows.lock().unwrap().get_mut(&key_id) {
            key.end_date = Some(end_date);
        }
        Ok(())
    }

    async fn delete(&self, key_id: i64) -> Result<()> {
        self.rows.lock().unwrap().remove(&key_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeReferralStore {
    pub pairs: Mutex<HashSet<(i64, i64)>>,
}

#[async_trait]
impl ReferralStore for FakeReferralStore {
    async fn insert_unique(&self, referrer_tg_id: i64, invited_tg_id: i64) -> Result<bool> {
        Ok(self
            .pairs
            .lock()
            .unwrap()
            .insert((referrer_tg_id, invited_tg_id)))
    }

    async fn count(&self, referrer_tg_id: i64) -> Result<i64> {
        Ok(self
            .pairs
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == referrer_tg_id)
            .count() as i64)
    }
}

#[derive(Default)]
pub struct FakePanel {
    pub fail_deletes: AtomicBool,
    pub fail_disable_for: Mutex<HashSet<String>>,
    pub disabled: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl PanelGateway for FakePanel {
    async fn create_account(
        &self,
        _tg_id: i64,
        account_name: &str,
        _duration_days: i64,
        _is_trial: bool,
    ) -> Result<(String, String), ServiceError> {
        Ok((format!("vless://{account_name}"), account_name.to_string()))
    }

    async fn update_account(
        &self,
        _account_name: &str,
        _expire_ts: i64,
    ) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn disable_account(&self, account_name: &str) -> Result<(), ServiceError> {
        if self.fail_disable_for.lock().unwrap().contains(account_name) {
            return Err(ServiceError::RemoteUnavailable("panel down".into()));
        }
        self.disabled.lock().unwrap().push(account_name.to_string());
        Ok(())
    }

    async fn delete_account(&self, account_name: &str) -> Result<(), ServiceError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ServiceError::RemoteUnavailable("panel down".into()));
        }
        self.deleted.lock().unwrap().push(account_name.to_string());
        Ok(())
    }

    async fn list_expired_accounts(
        &self,
        _limit: u32,
    ) -> Result<Vec<ExpiredAccount>, ServiceError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct FakeLedger {
    pub items: Mutex<Vec<TimelineItem>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl LedgerGateway for FakeLedger {
    async fn get_timeline(
        &self,
        _page: u32,
        _limit: u32,
        _date_from: &str,
        _date_to: &str,
    ) -> Result<Timeline, ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::RemoteUnavailable("ledger down".into()));
        }
        Ok(Timeline {
            succeed: true,
            data: TimelineData {
                items: self.items.lock().unwrap().clone(),
            },
        })
    }
}
