use crate::ledger_client::{LedgerClient, LedgerGateway};
use crate::panel_client::{PanelClient, PanelGateway};
use crate::services::key_service::KeyService;
use crate::services::pay_service::PayService;
use crate::services::pending::PendingPaymentStore;
use crate::services::referral_service::ReferralService;
use crate::settings::Settings;
use sqlx::PgPool;
use std::sync::Arc;
use zion_db::repositories::{
    ClientRepository, ClientStore, KeyRepository, KeyStore, ReferralRepository, ReferralStore,
};

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub clients: Arc<dyn ClientStore>,
    pub keys: Arc<dyn KeyStore>,
    pub panel: Arc<dyn PanelGateway>,
    pub key_service: KeyService,
    pub referral_service: ReferralService,
    pub pay_service: PayService,
}

impl AppState {
    pub fn new(settings: Settings, pool: PgPool, ledger: LedgerClient) -> Self {
        let clients: Arc<dyn ClientStore> = Arc::new(ClientRepository::new(pool.clone()));
        let keys: Arc<dyn KeyStore> = Arc::new(KeyRepository::new(pool.clone()));
        let referrals: Arc<dyn ReferralStore> = Arc::new(ReferralRepository::new(pool));
        let ledger: Arc<dyn LedgerGateway> = Arc::new(ledger);

        let panel: Arc<dyn PanelGateway> = Arc::new(PanelClient::new(settings.panel.clone()));
        let key_service = KeyService::new(
            clients.clone(),
            keys.clone(),
            panel.clone(),
            settings.trial_days,
        );
        let referral_service = ReferralService::new(
            referrals,
            clients.clone(),
            settings.referral_bonus_days,
        );
        let pay_service = PayService::new(
            clients.clone(),
            key_service.clone(),
            referral_service.clone(),
            ledger,
            PendingPaymentStore::new(),
        );

        Self {
            settings,
            clients,
            keys,
            panel,
            key_service,
            referral_service,
            pay_service,
        }
    }
}
