use crate::error::ServiceError;
use std::sync::Arc;
use tracing::info;
use zion_db::repositories::{ClientStore, ReferralStore};

/// Referral codes look like `ref123456789`.
pub fn parse_ref_code(code: &str) -> Option<i64> {
    code.strip_prefix("ref").and_then(|rest| rest.parse().ok())
}

pub fn referral_link(bot_name: &str, tg_id: i64) -> String {
    format!("https://t.me/{bot_name}?start=ref{tg_id}")
}

/// Grants the referrer a fixed bonus-day credit, at most once per
/// (referrer, invited) pair.
#[derive(Clone)]
pub struct ReferralService {
    referrals: Arc<dyn ReferralStore>,
    clients: Arc<dyn ClientStore>,
    bonus_days: i32,
}

impl ReferralService {
    pub fn new(
        referrals: Arc<dyn ReferralStore>,
        clients: Arc<dyn ClientStore>,
        bonus_days: i32,
    ) -> Self {
        Self {
            referrals,
            clients,
            bonus_days,
        }
    }

    pub async fn count(&self, tg_id: i64) -> Result<i64, ServiceError> {
        Ok(self.referrals.count(tg_id).await?)
    }

    /// Called on the invited user's first qualifying payment. The
    /// unique-pair insert makes double invocation a no-op.
    pub async fn apply_first_payment(
        &self,
        invited_tg_id: i64,
        referrer_id: Option<i64>,
    ) -> Result<bool, ServiceError> {
        let Some(referrer_id) = referrer_id else {
            return Ok(false);
        };
        if referrer_id == invited_tg_id {
            return Ok(false);
        }

        if !self
            .referrals
            .insert_unique(referrer_id, invited_tg_id)
            .await?
        {
            return Ok(false);
        }

        self.clients
            .add_bonus_days(referrer_id, self.bonus_days)
            .await?;
        info!(
            "Referral bonus: +{} days to {} for inviting {}",
            self.bonus_days, referrer_id, invited_tg_id
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{FakeClientStore, FakeReferralStore, client_row};

    #[test]
    fn parses_valid_ref_codes() {
        assert_eq!(parse_ref_code("ref123456789"), Some(123456789));
        assert_eq!(parse_ref_code("ref1"), Some(1));
    }

    #[test]
    fn rejects_malformed_ref_codes() {
        assert_eq!(parse_ref_code("123456789"), None);
        assert_eq!(parse_ref_code("refabc"), None);
        assert_eq!(parse_ref_code("ref"), None);
        assert_eq!(parse_ref_code(""), None);
    }

    #[test]
    fn referral_link_embeds_code() {
        assert_eq!(
            referral_link("ZionVpnBot", 42),
            "https://t.me/ZionVpnBot?start=ref42"
        );
    }

    fn service(clients: FakeClientStore) -> (ReferralService, Arc<FakeClientStore>) {
        let clients = Arc::new(clients);
        let svc = ReferralService::new(
            Arc::new(FakeReferralStore::default()),
            clients.clone(),
            7,
        );
        (svc, clients)
    }

    #[tokio::test]
    async fn bonus_is_granted_at_most_once_per_pair() {
        let (svc, clients) = service(FakeClientStore::with(vec![
            client_row(1, 0),
            client_row(2, 0),
        ]));

        assert!(svc.apply_first_payment(2, Some(1)).await.unwrap());
        assert!(!svc.apply_first_payment(2, Some(1)).await.unwrap());
        assert_eq!(clients.row(1).bonus_days, 7);
        assert_eq!(svc.count(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn self_referral_earns_nothing() {
        let (svc, clients) = service(FakeClientStore::with(vec![client_row(1, 0)]));

        assert!(!svc.apply_first_payment(1, Some(1)).await.unwrap());
        assert!(!svc.apply_first_payment(1, None).await.unwrap());
        assert_eq!(clients.row(1).bonus_days, 0);
    }
}
