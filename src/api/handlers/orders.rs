use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::accrual::repository::{CreateOrderOutcome, OrderRepository};
use crate::api::auth::Claims;
use crate::api::state::AppState;
use crate::domain::order::{parse_order_number, Order, OrderSnapshot};

pub async fn upload_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: String,
) -> Result<StatusCode, (StatusCode, String)> {
    let order_id = parse_order_number(&body).map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    match state
        .repository
        .create_order(claims.sub, order_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    {
        CreateOrderOutcome::Created(order) => {
            state
                .adapter
                .submit(OrderSnapshot::new(order.id, order.user_id))
                .await;
            Ok(StatusCode::ACCEPTED)
        }
        CreateOrderOutcome::AlreadyUploadedBySameUser(_) => Ok(StatusCode::OK),
        CreateOrderOutcome::AlreadyUploadedByOtherUser(_) => {
            Err((StatusCode::CONFLICT, "order already uploaded by another user".into()))
        }
    }
}

pub async fn list_orders(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<(StatusCode, Json<Vec<Order>>), (StatusCode, String)> {
    let orders = state
        .repository
        .list_orders(claims.sub)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if orders.is_empty() {
        Ok((StatusCode::NO_CONTENT, Json(orders)))
    } else {
        Ok((StatusCode::OK, Json(orders)))
    }
}
