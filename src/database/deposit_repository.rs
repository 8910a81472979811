use crate::database::error::DatabaseError;
use crate::database::store::{DepositStore, ScanCursor};
use crate::services::settlement::state::{DepositStatus, DonationChoice, QueueStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

const DEPOSIT_COLUMNS: &str = "id, user_id, amount, currency, investment_percentage, \
     donation_choice, payment_method_id, payment_method_type, status, queue_status, \
     transaction_id, psp_name, psp_reference, psp_response, processed_at, created_at, updated_at";

/// Wallet top-up entity
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Deposit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub investment_percentage: BigDecimal,
    pub donation_choice: String,
    pub payment_method_id: String,
    pub payment_method_type: String,
    pub status: String,
    pub queue_status: String,
    /// Provider transaction id
    pub transaction_id: Option<String>,
    pub psp_name: Option<String>,
    pub psp_reference: String,
    pub psp_response: Option<JsonValue>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deposit {
    pub fn status(&self) -> DepositStatus {
        DepositStatus::from_db(&self.status).unwrap_or(DepositStatus::Pending)
    }

    pub fn queue_status(&self) -> QueueStatus {
        QueueStatus::from_db(&self.queue_status).unwrap_or(QueueStatus::Queued)
    }

    pub fn donation_choice(&self) -> DonationChoice {
        DonationChoice::parse(&self.donation_choice).unwrap_or_default()
    }

    pub fn psp_transaction_id(&self) -> Option<&str> {
        self.transaction_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct NewDeposit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub investment_percentage: BigDecimal,
    pub donation_choice: DonationChoice,
    pub payment_method_id: String,
    pub payment_method_type: String,
    pub psp_reference: String,
}

#[derive(Debug, Clone)]
pub struct DepositUpdate {
    pub status: DepositStatus,
    pub queue_status: QueueStatus,
    pub transaction_id: Option<String>,
    pub psp_name: Option<String>,
    pub psp_response: Option<JsonValue>,
    /// Stamp `processed_at`
    pub processed: bool,
}

impl DepositUpdate {
    pub fn new(status: DepositStatus, queue_status: QueueStatus) -> Self {
        Self {
            status,
            queue_status,
            transaction_id: None,
            psp_name: None,
            psp_response: None,
            processed: false,
        }
    }

    pub fn with_psp(
        mut self,
        psp_name: impl Into<String>,
        transaction_id: impl Into<String>,
        response: JsonValue,
    ) -> Self {
        self.psp_name = Some(psp_name.into());
        self.transaction_id = Some(transaction_id.into());
        self.psp_response = Some(response);
        self
    }

    pub fn processed(mut self) -> Self {
        self.processed = true;
        self
    }
}

/// Repository for deposits
pub struct DepositRepository {
    pool: PgPool,
}

impl DepositRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DepositStore for DepositRepository {
    async fn insert_deposit(&self, new: NewDeposit) -> Result<Deposit, DatabaseError> {
        let sql = format!(
            "INSERT INTO deposits
             (id, user_id, amount, currency, investment_percentage, donation_choice,
              payment_method_id, payment_method_type, status, queue_status, psp_reference)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', 'queued', $9)
             RETURNING {}",
            DEPOSIT_COLUMNS
        );
        sqlx::query_as::<_, Deposit>(&sql)
            .bind(new.id)
            .bind(new.user_id)
            .bind(&new.amount)
            .bind(&new.currency)
            .bind(&new.investment_percentage)
            .bind(new.donation_choice.as_str())
            .bind(&new.payment_method_id)
            .bind(&new.payment_method_type)
            .bind(&new.psp_reference)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_deposit(&self, id: Uuid) -> Result<Option<Deposit>, DatabaseError> {
        let sql = format!("SELECT {} FROM deposits WHERE id = $1", DEPOSIT_COLUMNS);
        sqlx::query_as::<_, Deposit>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn list_deposits_for_user(&self, user_id: Uuid) -> Result<Vec<Deposit>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM deposits WHERE user_id = $1 ORDER BY created_at DESC",
            DEPOSIT_COLUMNS
        );
        sqlx::query_as::<_, Deposit>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn transition_deposit(
        &self,
        id: Uuid,
        expected: &[DepositStatus],
        update: DepositUpdate,
    ) -> Result<Option<Deposit>, DatabaseError> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
        let sql = format!(
            "UPDATE deposits
             SET status = $2, queue_status = $3,
                 transaction_id = COALESCE($4, transaction_id),
                 psp_name = COALESCE($5, psp_name),
                 psp_response = COALESCE($6, psp_response),
                 processed_at = CASE WHEN $7 THEN NOW() ELSE processed_at END,
                 updated_at = NOW()
             WHERE id = $1 AND status = ANY($8)
             RETURNING {}",
            DEPOSIT_COLUMNS
        );
        sqlx::query_as::<_, Deposit>(&sql)
            .bind(id)
            .bind(update.status.as_str())
            .bind(update.queue_status.as_str())
            .bind(&update.transaction_id)
            .bind(&update.psp_name)
            .bind(&update.psp_response)
            .bind(update.processed)
            .bind(&expected)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_awaiting_collection_deposits(
        &self,
        after: Option<ScanCursor>,
        limit: i64,
    ) -> Result<Vec<Deposit>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM deposits
             WHERE status IN ('initiated', 'pending')
               AND queue_status IN ('queued', 'processing')
               AND transaction_id IS NOT NULL
               AND transaction_id <> ''
               AND ($2::timestamptz IS NULL OR (created_at, id) > ($2::timestamptz, $3::uuid))
             ORDER BY created_at ASC, id ASC
             LIMIT $1",
            DEPOSIT_COLUMNS
        );
        sqlx::query_as::<_, Deposit>(&sql)
            .bind(limit)
            .bind(after.map(|c| c.created_at))
            .bind(after.map(|c| c.id))
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_builder_sets_psp_fields() {
        let update = DepositUpdate::new(DepositStatus::Initiated, QueueStatus::Queued).with_psp(
            "ogate",
            "og-1",
            serde_json::json!({"id": "og-1"}),
        );
        assert_eq!(update.transaction_id.as_deref(), Some("og-1"));
        assert_eq!(update.psp_name.as_deref(), Some("ogate"));
        assert!(!update.processed);
        assert!(update.processed().processed);
    }
}
