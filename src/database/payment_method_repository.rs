use crate::database::error::DatabaseError;
use crate::database::repository::{parse_uuid, Repository};
use crate::database::store::PaymentMethodLookup;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const PAYMENT_METHOD_COLUMNS: &str = "id, user_id, method_type, provider, phone_number, \
     network, is_active, is_deleted, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodKind {
    MobileMoney,
    BankCard,
    Wallet,
}

impl PaymentMethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodKind::MobileMoney => "mobile_money",
            PaymentMethodKind::BankCard => "bank_card",
            PaymentMethodKind::Wallet => "wallet",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mobile_money" | "momo" => Some(PaymentMethodKind::MobileMoney),
            "bank_card" | "card" => Some(PaymentMethodKind::BankCard),
            "wallet" => Some(PaymentMethodKind::Wallet),
            _ => None,
        }
    }
}

/// Payment Method entity
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub user_id: Uuid,
    pub method_type: String,
    pub provider: Option<String>,
    pub phone_number: Option<String>,
    /// Mobile network operator for mobile-money methods
    pub network: Option<String>,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl PaymentMethod {
    pub fn kind(&self) -> Option<PaymentMethodKind> {
        PaymentMethodKind::parse(&self.method_type)
    }
}

/// Read side of user payment methods; CRUD lives elsewhere
pub struct PaymentMethodRepository {
    pool: PgPool,
}

impl PaymentMethodRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new payment method
    pub async fn create_payment_method(
        &self,
        user_id: Uuid,
        kind: PaymentMethodKind,
        phone_number: Option<&str>,
        network: Option<&str>,
    ) -> Result<PaymentMethod, DatabaseError> {
        let sql = format!(
            "INSERT INTO payment_methods (user_id, method_type, phone_number, network)
             VALUES ($1, $2, $3, $4)
             RETURNING {}",
            PAYMENT_METHOD_COLUMNS
        );
        sqlx::query_as::<_, PaymentMethod>(&sql)
            .bind(user_id)
            .bind(kind.as_str())
            .bind(phone_number)
            .bind(network)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl PaymentMethodLookup for PaymentMethodRepository {
    async fn find_active(
        &self,
        user_id: Uuid,
        payment_method_id: Uuid,
    ) -> Result<Option<PaymentMethod>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payment_methods
             WHERE id = $1 AND user_id = $2 AND is_active = true AND is_deleted = false",
            PAYMENT_METHOD_COLUMNS
        );
        sqlx::query_as::<_, PaymentMethod>(&sql)
            .bind(payment_method_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl Repository for PaymentMethodRepository {
    type Entity = PaymentMethod;

    async fn find_by_id(&self, id: &str) -> Result<Option<Self::Entity>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payment_methods WHERE id = $1",
            PAYMENT_METHOD_COLUMNS
        );
        sqlx::query_as::<_, PaymentMethod>(&sql)
            .bind(parse_uuid(id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_all(&self) -> Result<Vec<Self::Entity>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payment_methods WHERE is_deleted = false ORDER BY created_at DESC",
            PAYMENT_METHOD_COLUMNS
        );
        sqlx::query_as::<_, PaymentMethod>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}
