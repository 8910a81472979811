//! HTTP surface of the settlement engine.
//!
//! Callers are authenticated upstream; the user id arrives in `x-user-id`.

pub mod deposits;
pub mod psp;
pub mod transactions;

use crate::error::{AppError, DomainError};
use crate::health::HealthChecker;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::settlement::SettlementEngine;
use crate::workers::reconciliation::ReconciliationWorker;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SettlementEngine>,
    pub worker: ReconciliationWorker,
    pub health_checker: HealthChecker,
}

/// Identity of the caller, taken from `x-user-id`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(AuthUser)
            .ok_or_else(|| tag(&parts.headers, AppError::domain(DomainError::Unauthenticated)))
    }
}

/// Attaches the request id, when there is one, to an error on its way out.
pub(crate) fn tag(headers: &HeaderMap, error: AppError) -> AppError {
    match get_request_id_from_headers(headers) {
        Some(request_id) => error.with_request_id(request_id),
        None => error,
    }
}

pub(crate) fn tagged<E: Into<AppError>>(headers: &HeaderMap) -> impl FnOnce(E) -> AppError + '_ {
    move |err| tag(headers, err.into())
}

/// `/api` routes. Health and root routes are added by the binary.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/transactions/send", post(transactions::send_money))
        .route("/api/transactions", get(transactions::list_transactions))
        .route(
            "/api/transactions/{id}/status",
            get(transactions::transaction_status),
        )
        .route(
            "/api/transactions/process-pending",
            post(transactions::process_pending),
        )
        .route(
            "/api/deposits",
            post(deposits::create_deposit).get(deposits::list_deposits),
        )
        .route("/api/deposits/{id}/status", get(deposits::deposit_status))
        .route("/api/psp/providers", get(psp::list_providers))
        .route("/api/psp/recommend", get(psp::recommend_provider))
        .route("/api/psp/test/{psp}", post(psp::test_provider))
}
