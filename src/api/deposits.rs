use super::{tagged, AppState, AuthUser};
use crate::error::AppError;
use crate::middleware::error::{success_response, success_response_with_meta};
use crate::services::settlement::DepositRequest;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

/// POST /api/deposits
pub async fn create_deposit(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    Json(request): Json<DepositRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let deposit = state
        .engine
        .initiate_deposit(user_id, request)
        .await
        .map_err(tagged(&headers))?;
    info!(deposit_id = %deposit.id, reference = %deposit.psp_reference, "deposit initiated");
    Ok((StatusCode::ACCEPTED, success_response(deposit)))
}

/// GET /api/deposits
pub async fn list_deposits(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let deposits = state
        .engine
        .list_deposits(user_id)
        .await
        .map_err(tagged(&headers))?;
    let count = deposits.len();
    Ok(success_response_with_meta(deposits, json!({ "count": count })))
}

/// GET /api/deposits/{id}/status
///
/// Polls the provider for a deposit still in flight, so the answer reflects
/// the collection as of now rather than the last sweep.
pub async fn deposit_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let deposit = state
        .engine
        .check_deposit_status(user_id, id)
        .await
        .map_err(tagged(&headers))?;
    Ok(success_response(json!({
        "deposit_id": deposit.id,
        "status": deposit.status,
        "queue_status": deposit.queue_status,
        "reference": deposit.psp_reference,
        "processed_at": deposit.processed_at,
    })))
}
