use axum::{
    Router,
    routing::{get, post},
};
use dotenvy::dotenv;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod error;
mod handlers;
mod ledger_client;
mod panel_client;
mod retry;
mod services;
mod settings;
mod state;
mod utils;

use crate::ledger_client::LedgerClient;
use crate::services::notification_service::NotificationService;
use crate::services::sweeper::ExpirySweeper;
use crate::settings::Settings;
pub use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zion_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    tracing::info!("Zion subscription service starting...");
    tracing::info!("Panel: {}", settings.panel.host);
    tracing::info!("Trial: {} days", settings.trial_days);
    tracing::info!("Sweep interval: {}s", settings.sweep_interval_secs);

    let pool = zion_db::connect(&settings.database_url).await?;
    let ledger = LedgerClient::new(settings.ledger.clone())?;
    let state = AppState::new(settings.clone(), pool, ledger);

    let notifier = NotificationService::new(settings.bot_token.as_deref());
    let sweeper = ExpirySweeper::new(
        state.clients.clone(),
        state.keys.clone(),
        state.panel.clone(),
        notifier,
        settings.sweep_interval_secs,
    );
    tokio::spawn(sweeper.start());

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/create-user", post(handlers::api::create_user))
        .route("/api/my-data", get(handlers::api::my_data))
        .route("/api/create-key", post(handlers::api::create_key))
        .route("/api/extend-key", post(handlers::api::extend_key))
        .route("/api/delete-key", post(handlers::api::delete_key))
        .route("/api/init-payment", post(handlers::api::init_payment))
        .route("/api/confirm-payment", post(handlers::api::confirm_payment))
        .route("/api/stats", get(handlers::api::stats))
        // The presentation layer runs inside Telegram's WebApp, so the
        // origin is not ours to pin down.
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.listen_port));
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
