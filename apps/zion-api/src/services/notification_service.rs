use chrono::NaiveDateTime;
use teloxide::prelude::*;
use tracing::{info, warn};

use crate::utils::format_date;

/// Best-effort user notifications over Telegram. Without a bot token
/// the service degrades to log-only; a send failure never blocks the
/// caller.
#[derive(Clone)]
pub struct NotificationService {
    bot: Option<Bot>,
}

impl NotificationService {
    pub fn new(bot_token: Option<&str>) -> Self {
        Self {
            bot: bot_token.map(Bot::new),
        }
    }

    pub async fn notify_expired(&self, tg_id: i64, end_date: Option<NaiveDateTime>) {
        let when = end_date.map(format_date).unwrap_or_else(|| "unknown".into());
        let text = format!(
            "⚠️ Your VPN access expired ({when}). Extend your subscription to get back online."
        );

        let Some(bot) = &self.bot else {
            info!("No bot token configured, skipping expiry notice for {}", tg_id);
            return;
        };

        match bot.send_message(ChatId(tg_id), text).await {
            Ok(_) => info!("Sent expiry notice to {}", tg_id),
            Err(e) => warn!("Failed to send expiry notice to {}: {}", tg_id, e),
        }
    }
}
