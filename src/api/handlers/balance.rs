use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::accrual::repository::{OrderRepository, WithdrawOutcome};
use crate::api::auth::Claims;
use crate::api::state::AppState;
use crate::domain::balance::{UserBalance, Withdrawal};
use crate::domain::order::parse_order_number;

pub async fn get_balance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserBalance>, (StatusCode, String)> {
    let balance = state
        .repository
        .get_balance(claims.sub)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(balance))
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    pub sum: Decimal,
}

pub async fn withdraw(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<WithdrawRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let order_id = parse_order_number(&body.order)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    match state
        .repository
        .create_withdrawal(claims.sub, order_id, body.sum)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    {
        WithdrawOutcome::Recorded(_) => Ok(StatusCode::OK),
        WithdrawOutcome::InsufficientFunds => {
            Err((StatusCode::PAYMENT_REQUIRED, "insufficient balance".into()))
        }
        WithdrawOutcome::InvalidOrder => {
            Err((StatusCode::UNPROCESSABLE_ENTITY, "invalid order number".into()))
        }
    }
}

pub async fn list_withdrawals(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<(StatusCode, Json<Vec<Withdrawal>>), (StatusCode, String)> {
    let withdrawals = state
        .repository
        .list_withdrawals(claims.sub)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if withdrawals.is_empty() {
        Ok((StatusCode::NO_CONTENT, Json(withdrawals)))
    } else {
        Ok((StatusCode::OK, Json(withdrawals)))
    }
}
