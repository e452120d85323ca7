use axum::extract::{Query, State};
use axum::response::Json;
use chrono::Local;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use zion_db::models::store::UserKey;
use zion_db::repositories::{ClientStore, KeyStore};

use crate::AppState;
use crate::error::ServiceError;
use crate::panel_client::PanelGateway;
use crate::services::key_service::PaymentMethod;
use crate::services::pay_service::price;
use crate::services::referral_service::{parse_ref_code, referral_link};
use crate::utils::format_date;

type ApiResult = Result<Json<Value>, ServiceError>;

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub tg_id: i64,
    pub username: Option<String>,
    pub ref_code: Option<String>,
}

#[derive(Deserialize)]
pub struct MyDataParams {
    pub user_id: i64,
}

#[derive(Deserialize)]
pub struct CreateKeyRequest {
    pub user_id: i64,
    pub device_name: String,
    pub months: i32,
    /// "bonuses" or unset (money).
    pub payment_method: Option<String>,
}

#[derive(Deserialize)]
pub struct ExtendKeyRequest {
    pub user_id: i64,
    pub key_id: i64,
    pub months: i32,
    pub payment_method: String,
    /// Required for money payments; validated against the quote.
    pub amount: Option<f64>,
}

#[derive(Deserialize)]
pub struct DeleteKeyRequest {
    pub user_id: i64,
    pub key_id: i64,
}

#[derive(Deserialize)]
pub struct InitPaymentRequest {
    pub user_id: i64,
    pub months: i32,
    pub device_name: Option<String>,
    pub key_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct ConfirmPaymentRequest {
    pub code: String,
}

fn key_json(key: &UserKey) -> Value {
    json!({
        "id": key.id,
        "name": key.device_name,
        "key": key.vless_link,
        "expires": key.end_date.map(format_date),
        "is_trial": key.is_trial,
    })
}

fn validate_months(months: i32) -> Result<(), ServiceError> {
    if (1..=36).contains(&months) {
        return Ok(());
    }
    Err(ServiceError::InvalidRequest(format!(
        "Unsupported subscription length: {months} months"
    )))
}

/// First contact: creates the client row and provisions the one trial
/// key. Re-posting for a known identity returns the existing keys
/// instead of failing, which is also the recovery path after a
/// provisioning error.
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult {
    if let Some(client) = state.clients.get(req.tg_id).await? {
        let keys: Vec<Value> = state
            .keys
            .list(client.tg_id)
            .await?
            .iter()
            .map(key_json)
            .collect();
        return Ok(Json(json!({
            "success": true,
            "already_exists": true,
            "keys": keys,
        })));
    }

    let referrer_id = req
        .ref_code
        .as_deref()
        .and_then(parse_ref_code)
        .filter(|id| *id != req.tg_id);

    let base_name = req
        .username
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("id{}", req.tg_id));

    let trial_end = Local::now().naive_local()
        + chrono::Duration::days(state.key_service.trial_days());
    state
        .clients
        .create(req.tg_id, Some(&base_name), referrer_id, trial_end)
        .await?;

    let provisioned = state.key_service.create_trial(req.tg_id, &base_name).await?;

    info!("New user {} provisioned with trial", req.tg_id);
    Ok(Json(json!({
        "success": true,
        "trial_key": provisioned.link,
        "end_date": format_date(provisioned.end_date),
    })))
}

pub async fn my_data(
    State(state): State<AppState>,
    Query(params): Query<MyDataParams>,
) -> ApiResult {
    let client = state
        .clients
        .get(params.user_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("User not found".into()))?;

    let keys: Vec<Value> = state
        .keys
        .list(client.tg_id)
        .await?
        .iter()
        .map(key_json)
        .collect();

    Ok(Json(json!({
        "success": true,
        "keys": keys,
        "bonus_days": client.bonus_days,
        "used_bonus_days": client.used_bonus_days,
        "referrals_count": state.referral_service.count(client.tg_id).await?,
        "ref_link": referral_link(&state.settings.bot_name, client.tg_id),
    })))
}

pub async fn create_key(
    State(state): State<AppState>,
    Json(req): Json<CreateKeyRequest>,
) -> ApiResult {
    validate_months(req.months)?;
    let client = state
        .clients
        .get(req.user_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("User not found".into()))?;

    let method = match req.payment_method.as_deref() {
        Some("bonuses") => PaymentMethod::Bonuses,
        _ => PaymentMethod::Money,
    };
    state
        .key_service
        .charge(req.user_id, req.months, method, price(req.months))
        .await?;

    let provisioned = state
        .key_service
        .create_paid(
            req.user_id,
            &client.display_name(),
            &req.device_name,
            req.months,
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "link": provisioned.link,
        "end_date": format_date(provisioned.end_date),
    })))
}

pub async fn extend_key(
    State(state): State<AppState>,
    Json(req): Json<ExtendKeyRequest>,
) -> ApiResult {
    validate_months(req.months)?;
    state
        .clients
        .get(req.user_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("User not found".into()))?;

    // The quote is validated here; the charge itself happens inside
    // extend_purchase, after the key is resolved and ownership-checked.
    let quoted = price(req.months);
    let method = match req.payment_method.as_str() {
        "bonuses" => PaymentMethod::Bonuses,
        _ => {
            let amount = req.amount.ok_or(ServiceError::AmountMismatch)?;
            if (amount - quoted).abs() > 0.01 {
                return Err(ServiceError::AmountMismatch);
            }
            PaymentMethod::Money
        }
    };

    let (key, new_end) = state
        .key_service
        .extend_purchase(req.user_id, req.key_id, req.months, method, quoted)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Key '{}' extended by {} months", key.device_name, req.months),
        "new_end_date": format_date(new_end),
        "payment_method": req.payment_method,
    })))
}

pub async fn delete_key(
    State(state): State<AppState>,
    Json(req): Json<DeleteKeyRequest>,
) -> ApiResult {
    state.key_service.delete(req.user_id, req.key_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Key deleted",
    })))
}

pub async fn init_payment(
    State(state): State<AppState>,
    Json(req): Json<InitPaymentRequest>,
) -> ApiResult {
    validate_months(req.months)?;
    let quote = state
        .pay_service
        .init_payment(req.user_id, req.months, req.device_name, req.key_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "code": quote.code,
        "price": quote.price,
        "payment_url": state.settings.payment_url,
    })))
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    Json(req): Json<ConfirmPaymentRequest>,
) -> ApiResult {
    if req.code.trim().is_empty() {
        return Err(ServiceError::CodeNotFound);
    }
    let outcome = state.pay_service.confirm_payment(&req.code).await?;

    Ok(Json(json!({
        "success": true,
        "message": outcome.message,
        "link": outcome.link,
        "end_date": outcome.end_date,
    })))
}

/// Totals for the admin surface. The remote expired count is
/// best-effort: the panel being down must not break local stats.
pub async fn stats(State(state): State<AppState>) -> ApiResult {
    let now = Local::now().naive_local();
    let users = state.clients.count_all().await?;
    let active = state.clients.count_active(now).await?;
    let inactive = state.clients.count_inactive(now).await?;
    let income = state.clients.total_income().await?;

    let remote_expired = match state.panel.list_expired_accounts(100).await {
        Ok(accounts) => Some(accounts.len()),
        Err(e) => {
            tracing::warn!("Could not fetch expired accounts from panel: {:#}", e);
            None
        }
    };

    Ok(Json(json!({
        "success": true,
        "users": users,
        "active": active,
        "inactive": inactive,
        "income": income,
        "remote_expired": remote_expired,
    })))
}
