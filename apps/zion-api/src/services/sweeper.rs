use crate::panel_client::PanelGateway;
use crate::services::notification_service::NotificationService;
use chrono::Local;
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tracing::{error, info, warn};
use zion_db::models::store::Client;
use zion_db::repositories::{ClientStore, KeyStore};

/// Periodic job that disables clients whose active period has elapsed.
/// Each client is marked exactly once: the sweep only picks up rows
/// with no disable timestamp, so an immediate re-run is a no-op.
pub struct ExpirySweeper {
    clients: Arc<dyn ClientStore>,
    keys: Arc<dyn KeyStore>,
    panel: Arc<dyn PanelGateway>,
    notifier: NotificationService,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(
        clients: Arc<dyn ClientStore>,
        keys: Arc<dyn KeyStore>,
        panel: Arc<dyn PanelGateway>,
        notifier: NotificationService,
        interval_secs: u64,
    ) -> Self {
        Self {
            clients,
            keys,
            panel,
            notifier,
            interval: Duration::from_secs(interval_secs),
        }
    }

    pub async fn start(self) {
        info!("Expiry sweeper started (every {:?})", self.interval);
        let mut tick = interval(self.interval);

        loop {
            tick.tick().await;
            match self.sweep_once().await {
                Ok(0) => {}
                Ok(n) => info!("Expiry sweep disabled {} clients", n),
                Err(e) => error!("Expiry sweep failed: {:#}", e),
            }
        }
    }

    /// One pass over the lapsed clients. A failure for one client is
    /// logged and never aborts the batch.
    pub async fn sweep_once(&self) -> anyhow::Result<usize> {
        let now = Local::now().naive_local();
        let expired = self.clients.list_expired_enabled(now).await?;

        let mut disabled = 0;
        for client in expired {
            match self.disable_client(&client).await {
                Ok(()) => disabled += 1,
                Err(e) => error!(
                    "Failed to disable expired client {}: {:#}",
                    client.tg_id, e
                ),
            }
        }
        Ok(disabled)
    }

    async fn disable_client(&self, client: &Client) -> anyhow::Result<()> {
        let now = Local::now().naive_local();

        // Record the disable first: even if every remote call fails the
        // client is not re-processed each sweep.
        self.clients.mark_expired(client.tg_id, now).await?;
        info!(
            "Client {} expired (end_date={:?}), disabling accounts",
            client.tg_id, client.end_date
        );

        for key in self.keys.list(client.tg_id).await? {
            if let Err(e) = self.panel.disable_account(&key.marzban_username).await {
                warn!(
                    "Could not disable panel account {} for {}: {:#}",
                    key.marzban_username, client.tg_id, e
                );
            }
        }

        self.notifier
            .notify_expired(client.tg_id, client.end_date)
            .await;
        Ok(())
    }
}
