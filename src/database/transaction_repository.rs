use crate::database::error::DatabaseError;
use crate::database::repository::{parse_uuid, Repository};
use crate::database::store::{ScanCursor, TransactionStore};
use crate::services::settlement::state::{
    derive_status, CollectionStage, DeliveryStage, DonationChoice, InvestmentStage,
    RecipientType, TransactionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

const TRANSACTION_COLUMNS: &str = "id, user_id, kind, amount, investment_percentage, \
     investment_amount, total_amount, currency, recipient_name, recipient_account, \
     recipient_type, recipient_network, donation_choice, funding_source, payment_method_id, \
     psp_name, psp_transaction_id, psp_request, psp_response, collection_status, \
     investment_status, delivery_status, status, distribution_attempts, \
     distribution_lease_until, failure_reason, created_at, updated_at";

/// Send-money transaction entity
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub amount: BigDecimal,
    pub investment_percentage: BigDecimal,
    pub investment_amount: BigDecimal,
    pub total_amount: BigDecimal,
    pub currency: String,
    pub recipient_name: String,
    pub recipient_account: String,
    pub recipient_type: String,
    pub recipient_network: Option<String>,
    pub donation_choice: String,
    /// `wallet` or `mobile_money`
    pub funding_source: String,
    pub payment_method_id: Option<String>,
    pub psp_name: Option<String>,
    pub psp_transaction_id: Option<String>,
    pub psp_request: Option<JsonValue>,
    pub psp_response: Option<JsonValue>,
    pub collection_status: String,
    pub investment_status: String,
    pub delivery_status: String,
    pub status: String,
    pub distribution_attempts: i32,
    pub distribution_lease_until: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn status(&self) -> TransactionStatus {
        TransactionStatus::from_db(&self.status).unwrap_or(TransactionStatus::Pending)
    }

    pub fn stages(&self) -> StageSet {
        StageSet {
            collection: CollectionStage::from_db(&self.collection_status)
                .unwrap_or(CollectionStage::Pending),
            investment: InvestmentStage::from_db(&self.investment_status)
                .unwrap_or(InvestmentStage::Pending),
            delivery: DeliveryStage::from_db(&self.delivery_status)
                .unwrap_or(DeliveryStage::Pending),
        }
    }

    pub fn recipient_type(&self) -> Option<RecipientType> {
        RecipientType::parse(&self.recipient_type)
    }

    pub fn donation_choice(&self) -> DonationChoice {
        DonationChoice::parse(&self.donation_choice).unwrap_or_default()
    }

    /// Provider transaction id, if the PSP returned a non-empty one.
    pub fn psp_reference(&self) -> Option<&str> {
        self.psp_transaction_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
    }
}

/// The three stage statuses of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSet {
    pub collection: CollectionStage,
    pub investment: InvestmentStage,
    pub delivery: DeliveryStage,
}

impl StageSet {
    pub fn initial() -> Self {
        Self {
            collection: CollectionStage::Pending,
            investment: InvestmentStage::Pending,
            delivery: DeliveryStage::Pending,
        }
    }

    pub fn status(&self) -> TransactionStatus {
        derive_status(self.collection, self.investment, self.delivery)
    }
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub investment_percentage: BigDecimal,
    pub investment_amount: BigDecimal,
    pub total_amount: BigDecimal,
    pub currency: String,
    pub recipient_name: String,
    pub recipient_account: String,
    pub recipient_type: RecipientType,
    pub recipient_network: Option<String>,
    pub donation_choice: DonationChoice,
    pub funding_source: String,
    pub payment_method_id: Option<String>,
    pub stages: StageSet,
}

/// Provider linkage recorded after a successful `initiate_collection`.
#[derive(Debug, Clone)]
pub struct PspLinkage {
    pub psp_name: String,
    pub psp_transaction_id: String,
    pub psp_request: JsonValue,
    pub psp_response: JsonValue,
}

/// A stage change. The stored overall status is always `stages.status()`.
#[derive(Debug, Clone)]
pub struct TransactionUpdate {
    pub stages: StageSet,
    pub failure_reason: Option<String>,
    pub release_lease: bool,
    /// Lease the writer must still hold for the update to apply
    pub held_lease: Option<DateTime<Utc>>,
}

impl TransactionUpdate {
    pub fn stages(stages: StageSet) -> Self {
        Self {
            stages,
            failure_reason: None,
            release_lease: false,
            held_lease: None,
        }
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    pub fn releasing_lease(mut self) -> Self {
        self.release_lease = true;
        self
    }

    pub fn under_lease(mut self, lease_until: Option<DateTime<Utc>>) -> Self {
        self.held_lease = lease_until;
        self
    }
}

/// Repository for send-money transactions
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for TransactionRepository {
    async fn insert_transaction(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        let sql = format!(
            "INSERT INTO transactions
             (id, user_id, kind, amount, investment_percentage, investment_amount, total_amount,
              currency, recipient_name, recipient_account, recipient_type, recipient_network,
              donation_choice, funding_source, payment_method_id, collection_status,
              investment_status, delivery_status, status)
             VALUES ($1, $2, 'send', $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                     $15, $16, $17, $18)
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(new.id)
            .bind(new.user_id)
            .bind(&new.amount)
            .bind(&new.investment_percentage)
            .bind(&new.investment_amount)
            .bind(&new.total_amount)
            .bind(&new.currency)
            .bind(&new.recipient_name)
            .bind(&new.recipient_account)
            .bind(new.recipient_type.as_str())
            .bind(&new.recipient_network)
            .bind(new.donation_choice.as_str())
            .bind(&new.funding_source)
            .bind(&new.payment_method_id)
            .bind(new.stages.collection.as_str())
            .bind(new.stages.investment.as_str())
            .bind(new.stages.delivery.as_str())
            .bind(new.stages.status().as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn list_transactions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE user_id = $1 ORDER BY created_at DESC",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn record_psp_linkage(
        &self,
        id: Uuid,
        linkage: PspLinkage,
    ) -> Result<Transaction, DatabaseError> {
        let sql = format!(
            "UPDATE transactions
             SET psp_name = $2, psp_transaction_id = $3, psp_request = $4, psp_response = $5,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(id)
            .bind(&linkage.psp_name)
            .bind(&linkage.psp_transaction_id)
            .bind(&linkage.psp_request)
            .bind(&linkage.psp_response)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| DatabaseError::not_found("transaction", id.to_string()))
    }

    async fn transition_transaction(
        &self,
        id: Uuid,
        expected: &[TransactionStatus],
        update: TransactionUpdate,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
        let sql = format!(
            "UPDATE transactions
             SET status = $2, collection_status = $3, investment_status = $4,
                 delivery_status = $5,
                 failure_reason =
                     CASE WHEN $2 = 'completed' THEN NULL ELSE COALESCE($6, failure_reason) END,
                 distribution_lease_until =
                     CASE WHEN $7 THEN NULL ELSE distribution_lease_until END,
                 updated_at = NOW()
             WHERE id = $1 AND status = ANY($8)
               AND ($9::timestamptz IS NULL OR distribution_lease_until = $9)
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(id)
            .bind(update.stages.status().as_str())
            .bind(update.stages.collection.as_str())
            .bind(update.stages.investment.as_str())
            .bind(update.stages.delivery.as_str())
            .bind(&update.failure_reason)
            .bind(update.release_lease)
            .bind(&expected)
            .bind(update.held_lease)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn claim_distribution(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let sql = format!(
            "UPDATE transactions
             SET distribution_lease_until = $3,
                 distribution_attempts = distribution_attempts + 1,
                 updated_at = NOW()
             WHERE id = $1
               AND status = 'processing_distribution'
               AND (distribution_lease_until IS NULL OR distribution_lease_until < $2)
               AND distribution_attempts < $4
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(id)
            .bind(now)
            .bind(lease_until)
            .bind(max_attempts)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn extend_distribution_lease(
        &self,
        id: Uuid,
        held_until: DateTime<Utc>,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let sql = format!(
            "UPDATE transactions
             SET distribution_lease_until = $4,
                 updated_at = NOW()
             WHERE id = $1
               AND status = 'processing_distribution'
               AND distribution_lease_until = $2
               AND distribution_lease_until > $3
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(id)
            .bind(held_until)
            .bind(now)
            .bind(lease_until)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_awaiting_collection(
        &self,
        after: Option<ScanCursor>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM transactions
             WHERE status IN ('pending', 'collection_pending')
               AND psp_transaction_id IS NOT NULL
               AND psp_transaction_id <> ''
               AND ($2::timestamptz IS NULL OR (created_at, id) > ($2::timestamptz, $3::uuid))
             ORDER BY created_at ASC, id ASC
             LIMIT $1",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(limit)
            .bind(after.map(|c| c.created_at))
            .bind(after.map(|c| c.id))
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_stalled_distributions(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM transactions
             WHERE status = 'processing_distribution'
               AND (distribution_lease_until IS NULL OR distribution_lease_until < $1)
               AND distribution_attempts < $2
             ORDER BY updated_at ASC
             LIMIT $3",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(now)
            .bind(max_attempts)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl Repository for TransactionRepository {
    type Entity = Transaction;

    async fn find_by_id(&self, id: &str) -> Result<Option<Self::Entity>, DatabaseError> {
        self.find_transaction(parse_uuid(id)?).await
    }

    async fn find_all(&self) -> Result<Vec<Self::Entity>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM transactions ORDER BY created_at DESC",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, Transaction>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_pool;

    fn new_transaction() -> NewTransaction {
        NewTransaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount: BigDecimal::from(100),
            investment_percentage: BigDecimal::from(20),
            investment_amount: BigDecimal::from(20),
            total_amount: BigDecimal::from(120),
            currency: "GHS".to_string(),
            recipient_name: "Ama".to_string(),
            recipient_account: "0244000000".to_string(),
            recipient_type: RecipientType::MobileMoney,
            recipient_network: Some("MTN".to_string()),
            donation_choice: DonationChoice::None,
            funding_source: "mobile_money".to_string(),
            payment_method_id: None,
            stages: StageSet::initial(),
        }
    }

    #[test]
    fn initial_stages_derive_collection_pending() {
        assert_eq!(
            StageSet::initial().status(),
            TransactionStatus::CollectionPending
        );
    }

    #[tokio::test]
    #[ignore] // Requires database running
    async fn conditional_transition_has_a_single_winner() {
        let url = std::env::var("DATABASE_URL").unwrap_or_default();
        let pool = init_pool(&url, None).await.unwrap();
        let repo = TransactionRepository::new(pool);
        let tx = repo.insert_transaction(new_transaction()).await.unwrap();

        let collected = StageSet {
            collection: CollectionStage::Collected,
            ..tx.stages()
        };
        let first = repo
            .transition_transaction(
                tx.id,
                TransactionStatus::awaiting_collection(),
                TransactionUpdate::stages(collected),
            )
            .await
            .unwrap();
        let second = repo
            .transition_transaction(
                tx.id,
                TransactionStatus::awaiting_collection(),
                TransactionUpdate::stages(collected),
            )
            .await
            .unwrap();

        assert_eq!(
            first.map(|t| t.status()),
            Some(TransactionStatus::ProcessingDistribution)
        );
        assert!(second.is_none());
    }
}
