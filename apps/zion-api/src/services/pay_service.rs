use crate::error::ServiceError;
use crate::ledger_client::{LedgerGateway, TimelineItem};
use crate::services::key_service::KeyService;
use crate::services::pending::{PendingPayment, PendingPaymentStore};
use crate::services::referral_service::ReferralService;
use crate::utils::{format_date, generate_payment_code};
use chrono::{DateTime, Duration, Local};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use zion_db::models::store::Client;
use zion_db::repositories::ClientStore;

/// Amounts match within one hundredth of a currency unit.
const AMOUNT_EPSILON: f64 = 0.01;
const TIMELINE_PAGE_LIMIT: u32 = 100;

/// Fixed price tiers; any other positive month count costs
/// `months * 100`.
pub fn price(months: i32) -> f64 {
    match months {
        1 => 100.0,
        3 => 250.0,
        6 => 450.0,
        12 => 800.0,
        m => (m as i64 * 100) as f64,
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentQuote {
    pub code: String,
    pub price: f64,
}

#[derive(Debug, Serialize)]
pub struct ConfirmOutcome {
    pub message: String,
    pub link: Option<String>,
    pub end_date: String,
}

/// Matches pending payment intents against the polled transaction
/// feed and applies matched payments to a key (extension) or to a new
/// paid key.
#[derive(Clone)]
pub struct PayService {
    clients: Arc<dyn ClientStore>,
    key_service: KeyService,
    referral_service: ReferralService,
    ledger: Arc<dyn LedgerGateway>,
    pending: PendingPaymentStore,
}

impl PayService {
    pub fn new(
        clients: Arc<dyn ClientStore>,
        key_service: KeyService,
        referral_service: ReferralService,
        ledger: Arc<dyn LedgerGateway>,
        pending: PendingPaymentStore,
    ) -> Self {
        Self {
            clients,
            key_service,
            referral_service,
            ledger,
            pending,
        }
    }

    /// Quotes a price and registers the payment intent. The returned
    /// code goes into the real-world transfer comment.
    pub async fn init_payment(
        &self,
        tg_id: i64,
        months: i32,
        device_name: Option<String>,
        key_id: Option<i64>,
    ) -> Result<PaymentQuote, ServiceError> {
        self.clients
            .get(tg_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".into()))?;
        if let Some(key_id) = key_id {
            self.key_service.get_owned(tg_id, key_id).await?;
        }

        let code = generate_payment_code();
        let quoted = price(months);
        self.pending.insert(
            code.clone(),
            PendingPayment {
                tg_id,
                months,
                price: quoted,
                device_name,
                key_id,
                created_at: Local::now().naive_local(),
            },
        );

        info!(
            "Registered payment intent {} for tg_id={} ({} months, {})",
            code, tg_id, months, quoted
        );
        Ok(PaymentQuote { code, price: quoted })
    }

    /// Confirms a payment by code. The intent is claimed atomically up
    /// front, so a concurrent confirmation for the same code observes
    /// absence. Before the ledger is consulted the target is
    /// re-validated; a failure there, or a window with no matching
    /// transaction, puts the intent back so the caller may retry.
    pub async fn confirm_payment(&self, code: &str) -> Result<ConfirmOutcome, ServiceError> {
        let code = code.trim();
        let payment = self
            .pending
            .take(code)
            .ok_or(ServiceError::CodeNotFound)?;

        // Nothing has been matched or applied yet, so any preflight
        // failure keeps the intent alive.
        let client = match self.preflight(&payment).await {
            Ok(client) => client,
            Err(e) => {
                self.pending.restore(code.to_string(), payment);
                return Err(e);
            }
        };

        match self.apply_confirmed(code, &payment, &client).await {
            Ok(outcome) => Ok(outcome),
            Err(e @ (ServiceError::PaymentNotFound | ServiceError::RemoteUnavailable(_)
            | ServiceError::CredentialsExhausted)) => {
                self.pending.restore(code.to_string(), payment);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Re-checks the intent's target right before the ledger scan: the
    /// client must still exist, and an extension target must still be
    /// the caller's key. Keys can be deleted between init and confirm.
    async fn preflight(&self, payment: &PendingPayment) -> Result<Client, ServiceError> {
        let client = self
            .clients
            .get(payment.tg_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".into()))?;
        if let Some(key_id) = payment.key_id {
            self.key_service.get_owned(payment.tg_id, key_id).await?;
        }
        Ok(client)
    }

    async fn apply_confirmed(
        &self,
        code: &str,
        payment: &PendingPayment,
        client: &Client,
    ) -> Result<ConfirmOutcome, ServiceError> {
        let (date_from, date_to) = matching_window(Local::now());
        info!(
            "Confirming payment {}: scanning ledger {} .. {}",
            code, date_from, date_to
        );

        let timeline = self
            .ledger
            .get_timeline(1, TIMELINE_PAGE_LIMIT, &date_from, &date_to)
            .await?;
        if !timeline.succeed {
            return Err(ServiceError::RemoteUnavailable(
                "ledger reported failure".into(),
            ));
        }

        let items = timeline.data.items;
        info!("Ledger returned {} transactions in window", items.len());

        if !find_matching(&items, code, payment.price) {
            return Err(ServiceError::PaymentNotFound);
        }
        info!(
            "Payment {} matched in ledger ({} for tg_id={})",
            code, payment.price, payment.tg_id
        );

        let outcome = match payment.key_id {
            Some(key_id) => {
                let (key, new_end) = self
                    .key_service
                    .extend(payment.tg_id, key_id, payment.months)
                    .await?;
                ConfirmOutcome {
                    message: format!(
                        "Key '{}' extended by {} months",
                        key.device_name, payment.months
                    ),
                    link: None,
                    end_date: format_date(new_end),
                }
            }
            None => {
                let device = payment.device_name.as_deref().unwrap_or("My key");
                let provisioned = self
                    .key_service
                    .create_paid(payment.tg_id, &client.display_name(), device, payment.months)
                    .await?;
                ConfirmOutcome {
                    message: format!("Key created for {} months", payment.months),
                    link: Some(provisioned.link),
                    end_date: format_date(provisioned.end_date),
                }
            }
        };

        self.clients
            .add_spend(payment.tg_id, &format!("{}", payment.price))
            .await?;
        self.referral_service
            .apply_first_payment(payment.tg_id, client.referrer_id)
            .await?;

        Ok(outcome)
    }
}

/// The scan window is deliberately asymmetric: an hour back for the
/// transfer itself, ten minutes forward for ledger clock skew.
pub fn matching_window(now: DateTime<Local>) -> (String, String) {
    let fmt = "%Y-%m-%dT%H:%M:%S%:z";
    (
        (now - Duration::hours(1)).format(fmt).to_string(),
        (now + Duration::minutes(10)).format(fmt).to_string(),
    )
}

/// A transaction matches when its trimmed comment equals the code and
/// the amount matches the quote within [`AMOUNT_EPSILON`].
pub fn find_matching(items: &[TimelineItem], code: &str, expected: f64) -> bool {
    items.iter().any(|item| {
        let comment = item.comment.as_deref().unwrap_or("").trim();
        comment == code && (item.payment_amount - expected).abs() < AMOUNT_EPSILON
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{
        FakeClientStore, FakeKeyStore, FakeLedger, FakePanel, FakeReferralStore, client_row,
        key_row,
    };

    #[test]
    fn price_table_matches_fixed_tiers() {
        assert_eq!(price(1), 100.0);
        assert_eq!(price(3), 250.0);
        assert_eq!(price(6), 450.0);
        assert_eq!(price(12), 800.0);
    }

    #[test]
    fn price_falls_back_to_linear() {
        assert_eq!(price(2), 200.0);
        assert_eq!(price(24), 2400.0);
        assert_eq!(price(36), 3600.0);
    }

    fn item(comment: &str, amount: f64) -> TimelineItem {
        TimelineItem {
            comment: Some(comment.to_string()),
            payment_amount: amount,
        }
    }

    #[test]
    fn matching_requires_exact_comment_and_amount() {
        let items = vec![item("12345678", 250.0)];
        assert!(find_matching(&items, "12345678", 250.0));
        assert!(!find_matching(&items, "12345679", 250.0));
        assert!(!find_matching(&items, "12345678", 249.0));
    }

    #[test]
    fn matching_tolerates_comment_whitespace_and_sub_cent_noise() {
        let items = vec![item("  12345678 ", 250.004)];
        assert!(find_matching(&items, "12345678", 250.0));
    }

    #[test]
    fn matching_skips_commentless_transactions() {
        let items = vec![TimelineItem {
            comment: None,
            payment_amount: 250.0,
        }];
        assert!(!find_matching(&items, "12345678", 250.0));
    }

    #[test]
    fn window_is_one_hour_back_ten_minutes_forward() {
        use chrono::Timelike;
        let now = Local::now().with_nanosecond(0).unwrap();
        let (from, to) = matching_window(now);
        let from: DateTime<Local> = from.parse().unwrap();
        let to: DateTime<Local> = to.parse().unwrap();
        assert_eq!((now - from).num_minutes(), 60);
        assert_eq!((to - now).num_minutes(), 10);
    }

    struct Harness {
        svc: PayService,
        clients: Arc<FakeClientStore>,
        keys: Arc<FakeKeyStore>,
        ledger: Arc<FakeLedger>,
        pending: PendingPaymentStore,
    }

    fn harness(
        clients: FakeClientStore,
        keys: FakeKeyStore,
        ledger: FakeLedger,
    ) -> Harness {
        let clients = Arc::new(clients);
        let keys = Arc::new(keys);
        let ledger = Arc::new(ledger);
        let panel = Arc::new(FakePanel::default());
        let referrals = Arc::new(FakeReferralStore::default());
        let pending = PendingPaymentStore::new();

        let key_service = KeyService::new(clients.clone(), keys.clone(), panel, 3);
        let referral_service = ReferralService::new(referrals, clients.clone(), 7);
        let svc = PayService::new(
            clients.clone(),
            key_service,
            referral_service,
            ledger.clone(),
            pending.clone(),
        );
        Harness {
            svc,
            clients,
            keys,
            ledger,
            pending,
        }
    }

    #[tokio::test]
    async fn confirm_applies_matched_payment_to_new_key() {
        let h = harness(
            FakeClientStore::with(vec![client_row(42, 0)]),
            FakeKeyStore::default(),
            FakeLedger::default(),
        );

        let quote = h.svc.init_payment(42, 3, Some("Laptop".into()), None).await.unwrap();
        h.ledger.items.lock().unwrap().push(item(&quote.code, quote.price));

        let outcome = h.svc.confirm_payment(&quote.code).await.unwrap();
        assert!(outcome.link.is_some());
        assert_eq!(h.keys.len(), 1);
        assert_eq!(h.clients.row(42).spend, "250");
        // the intent is consumed for good
        assert!(h.pending.take(&quote.code).is_none());
    }

    #[tokio::test]
    async fn confirm_without_matching_transaction_keeps_intent_retryable() {
        let h = harness(
            FakeClientStore::with(vec![client_row(42, 0)]),
            FakeKeyStore::default(),
            FakeLedger::default(),
        );

        let quote = h.svc.init_payment(42, 1, None, None).await.unwrap();
        let err = h.svc.confirm_payment(&quote.code).await.unwrap_err();
        assert!(matches!(err, ServiceError::PaymentNotFound));

        // same code works once the transfer shows up
        h.ledger.items.lock().unwrap().push(item(&quote.code, quote.price));
        assert!(h.svc.confirm_payment(&quote.code).await.is_ok());
    }

    #[tokio::test]
    async fn confirm_for_deleted_key_fails_before_consuming_the_transfer() {
        let h = harness(
            FakeClientStore::with(vec![client_row(42, 0)]),
            FakeKeyStore::with(vec![key_row(5, 42, "phone")]),
            FakeLedger::default(),
        );

        let quote = h.svc.init_payment(42, 1, None, Some(5)).await.unwrap();
        // the transfer is already visible in the window
        h.ledger.items.lock().unwrap().push(item(&quote.code, quote.price));
        // but the key vanishes between init and confirm
        h.keys.rows.lock().unwrap().remove(&5);

        let err = h.svc.confirm_payment(&quote.code).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        // no money consumed, intent still claimable
        assert_eq!(h.clients.row(42).spend, "0");
        assert!(h.pending.take(&quote.code).is_some());
    }

    #[tokio::test]
    async fn ledger_outage_during_confirm_keeps_intent_retryable() {
        use std::sync::atomic::Ordering;

        let h = harness(
            FakeClientStore::with(vec![client_row(42, 0)]),
            FakeKeyStore::default(),
            FakeLedger::default(),
        );

        let quote = h.svc.init_payment(42, 1, None, None).await.unwrap();
        h.ledger.fail.store(true, Ordering::SeqCst);

        let err = h.svc.confirm_payment(&quote.code).await.unwrap_err();
        assert!(matches!(err, ServiceError::RemoteUnavailable(_)));
        assert!(h.pending.take(&quote.code).is_some());
    }

    #[tokio::test]
    async fn init_payment_rejects_foreign_extension_target() {
        let h = harness(
            FakeClientStore::with(vec![client_row(42, 0), client_row(7, 0)]),
            FakeKeyStore::with(vec![key_row(5, 7, "phone")]),
            FakeLedger::default(),
        );

        let err = h.svc.init_payment(42, 1, None, Some(5)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }
}
