use super::{tagged, AppState};
use crate::error::AppError;
use crate::middleware::error::success_response;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct RecommendQuery {
    /// Network code, e.g. `MTN` or `VODAFONE`
    pub provider: String,
}

/// GET /api/psp/providers
pub async fn list_providers(State(state): State<AppState>) -> Json<Value> {
    let psp = state.engine.psp();
    success_response(json!({
        "providers": psp.available_providers(),
        "default": psp.registry().default_provider(),
    }))
}

/// GET /api/psp/recommend?provider=<network>
pub async fn recommend_provider(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RecommendQuery>,
) -> Result<Json<Value>, AppError> {
    if query.provider.trim().is_empty() {
        return Err(tagged(&headers)(AppError::invalid_field(
            "provider",
            "network is required",
        )));
    }
    let recommended = state.engine.psp().recommend(&query.provider);
    Ok(success_response(json!({
        "network": query.provider.to_uppercase(),
        "recommended_psp": recommended,
    })))
}

/// POST /api/psp/test/{psp}
pub async fn test_provider(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(psp): Path<String>,
) -> Result<Json<Value>, AppError> {
    let response = state
        .engine
        .psp()
        .test_connection(&psp)
        .await
        .map_err(tagged(&headers))?;
    Ok(success_response(json!({
        "psp": response.provider,
        "provider_transaction_id": response.provider_transaction_id,
        "status": response.status,
    })))
}
