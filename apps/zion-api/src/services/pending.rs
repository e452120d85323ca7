use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A code-keyed payment intent awaiting ledger confirmation. Held in
/// process memory only; a restart during an outstanding payment loses
/// the intent and the user retries.
#[derive(Debug, Clone)]
pub struct PendingPayment {
    pub tg_id: i64,
    pub months: i32,
    pub price: f64,
    pub device_name: Option<String>,
    /// `None` means the confirmation provisions a new key.
    pub key_id: Option<i64>,
    pub created_at: NaiveDateTime,
}

/// Injected store for pending payments. `take` is the only way to read
/// an entry: claim-then-delete in one step, so two concurrent
/// confirmations for the same code cannot both proceed.
#[derive(Clone, Default)]
pub struct PendingPaymentStore {
    inner: Arc<Mutex<HashMap<String, PendingPayment>>>,
}

impl PendingPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The map stays usable after a panicked holder; intents are plain
    /// data, so a poisoned guard carries no broken invariant.
    fn map(&self) -> MutexGuard<'_, HashMap<String, PendingPayment>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, code: String, payment: PendingPayment) {
        self.map().insert(code, payment);
    }

    /// Atomically claims and removes the intent. The second of two
    /// racing callers observes absence.
    pub fn take(&self, code: &str) -> Option<PendingPayment> {
        self.map().remove(code)
    }

    /// Puts a claimed intent back after a confirmation attempt that
    /// found no matching transaction, keeping the code retryable.
    pub fn restore(&self, code: String, payment: PendingPayment) {
        self.map().entry(code).or_insert(payment);
    }
}
