use crate::database::error::DatabaseError;
use crate::database::store::PspAuditLog;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogDirection {
    Request,
    Response,
}

impl LogDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogDirection::Request => "request",
            LogDirection::Response => "response",
        }
    }
}

/// One audit row per PSP request or response
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PspLogEntry {
    pub id: Uuid,
    pub correlation_id: String,
    pub operation: String,
    pub psp_name: String,
    pub direction: String,
    pub payload: JsonValue,
    pub status: String,
    pub payload_digest: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPspLogEntry {
    pub correlation_id: String,
    pub operation: String,
    pub psp_name: String,
    pub direction: LogDirection,
    pub payload: JsonValue,
    /// `sent`, `success` or `error`
    pub status: String,
}

impl NewPspLogEntry {
    /// Hex SHA-256 of the serialized payload.
    pub fn digest(&self) -> String {
        payload_digest(&self.payload)
    }

    pub fn into_entry(self) -> PspLogEntry {
        PspLogEntry {
            id: Uuid::new_v4(),
            payload_digest: self.digest(),
            correlation_id: self.correlation_id,
            operation: self.operation,
            psp_name: self.psp_name,
            direction: self.direction.as_str().to_string(),
            payload: self.payload,
            status: self.status,
            created_at: Utc::now(),
        }
    }
}

pub fn payload_digest(payload: &JsonValue) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Insert-only repository for `psp_logs`
pub struct PspLogRepository {
    pool: PgPool,
}

impl PspLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PspAuditLog for PspLogRepository {
    async fn append(&self, entry: NewPspLogEntry) -> Result<(), DatabaseError> {
        let entry = entry.into_entry();
        sqlx::query(
            "INSERT INTO psp_logs
             (id, correlation_id, operation, psp_name, direction, payload, status,
              payload_digest, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(entry.id)
        .bind(&entry.correlation_id)
        .bind(&entry.operation)
        .bind(&entry.psp_name)
        .bind(&entry.direction)
        .bind(&entry.payload)
        .bind(&entry.status)
        .bind(&entry.payload_digest)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
