use super::{tagged, AppState, AuthUser};
use crate::error::AppError;
use crate::middleware::error::{success_response, success_response_with_meta};
use crate::services::settlement::SendMoneyRequest;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

/// POST /api/transactions/send
///
/// Answers 202 while the collection is still pending and 200 once the
/// transaction already reached a terminal state (wallet-funded sends).
pub async fn send_money(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    Json(request): Json<SendMoneyRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let tx = state
        .engine
        .send_money(user_id, request)
        .await
        .map_err(tagged(&headers))?;

    info!(transaction_id = %tx.id, status = %tx.status, "send accepted");
    let code = if tx.status().is_terminal() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((code, success_response(tx)))
}

/// GET /api/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let transactions = state
        .engine
        .list_transactions(user_id)
        .await
        .map_err(tagged(&headers))?;
    let count = transactions.len();
    Ok(success_response_with_meta(transactions, json!({ "count": count })))
}

/// GET /api/transactions/{id}/status
pub async fn transaction_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let tx = state
        .engine
        .transaction_for_user(user_id, id)
        .await
        .map_err(tagged(&headers))?;
    Ok(success_response(json!({
        "transaction_id": tx.id,
        "status": tx.status,
        "collection_status": tx.collection_status,
        "investment_status": tx.investment_status,
        "delivery_status": tx.delivery_status,
        "failure_reason": tx.failure_reason,
        "updated_at": tx.updated_at,
    })))
}

/// POST /api/transactions/process-pending
///
/// Runs one reconciliation cycle now and reports what it did.
pub async fn process_pending(
    State(state): State<AppState>,
    _user: AuthUser,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let report = state.worker.run_cycle().await.map_err(tagged(&headers))?;
    info!(report = ?report, "manual reconciliation cycle finished");
    Ok(success_response(report))
}
