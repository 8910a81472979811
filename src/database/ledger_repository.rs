use crate::database::error::DatabaseError;
use crate::database::store::LedgerStore;
use crate::services::exchange_rate::RateSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

const INVESTMENT_COLUMNS: &str = "id, user_id, source_id, amount, currency, investment_type, \
     status, rate_to_usd, rate_source, rate_captured_at, created_at";
const DONATION_COLUMNS: &str = "id, user_id, source_id, amount, choice, status, created_at";
const RECIPIENT_COLUMNS: &str = "id, user_id, name, account, recipient_type, network, \
     times_used, created_at, updated_at";

/// Investment side-record. The rate snapshot is captured once at creation.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Investment {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Transaction or deposit this allocation came from
    pub source_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub investment_type: String,
    pub status: String,
    pub rate_to_usd: f64,
    pub rate_source: String,
    pub rate_captured_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewInvestment {
    pub user_id: Uuid,
    pub source_id: Uuid,
    pub amount: BigDecimal,
    pub investment_type: String,
    pub status: String,
    pub rate: RateSnapshot,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Donation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source_id: Uuid,
    pub amount: BigDecimal,
    pub choice: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDonation {
    pub user_id: Uuid,
    pub source_id: Uuid,
    pub amount: BigDecimal,
    pub choice: String,
}

/// Address-book entry, one per (user, account)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Recipient {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub account: String,
    pub recipient_type: String,
    pub network: Option<String>,
    pub times_used: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RecipientUpsert {
    pub user_id: Uuid,
    pub name: String,
    pub account: String,
    pub recipient_type: String,
    pub network: Option<String>,
}

/// Wallets, investments, donations and recipients
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for LedgerRepository {
    async fn credit_wallet(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        currency: &str,
    ) -> Result<BigDecimal, DatabaseError> {
        sqlx::query_scalar::<_, BigDecimal>(
            "INSERT INTO wallets (user_id, balance, currency)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_id)
             DO UPDATE SET balance = wallets.balance + EXCLUDED.balance, updated_at = NOW()
             RETURNING balance",
        )
        .bind(user_id)
        .bind(amount)
        .bind(currency)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn debit_wallet(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<Option<BigDecimal>, DatabaseError> {
        sqlx::query_scalar::<_, BigDecimal>(
            "UPDATE wallets
             SET balance = balance - $2, updated_at = NOW()
             WHERE user_id = $1 AND balance >= $2
             RETURNING balance",
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn wallet_balance(&self, user_id: Uuid) -> Result<Option<BigDecimal>, DatabaseError> {
        sqlx::query_scalar::<_, BigDecimal>("SELECT balance FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn insert_investment(
        &self,
        new: NewInvestment,
    ) -> Result<Option<Investment>, DatabaseError> {
        let sql = format!(
            "INSERT INTO investments
             (user_id, source_id, amount, currency, investment_type, status,
              rate_to_usd, rate_source, rate_captured_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (source_id) DO NOTHING
             RETURNING {}",
            INVESTMENT_COLUMNS
        );
        sqlx::query_as::<_, Investment>(&sql)
            .bind(new.user_id)
            .bind(new.source_id)
            .bind(&new.amount)
            .bind(&new.rate.currency)
            .bind(&new.investment_type)
            .bind(&new.status)
            .bind(new.rate.rate_to_usd)
            .bind(&new.rate.source)
            .bind(new.rate.captured_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn insert_donation(&self, new: NewDonation) -> Result<Option<Donation>, DatabaseError> {
        let sql = format!(
            "INSERT INTO donations (user_id, source_id, amount, choice, status)
             VALUES ($1, $2, $3, $4, 'pledged')
             ON CONFLICT (source_id) DO NOTHING
             RETURNING {}",
            DONATION_COLUMNS
        );
        sqlx::query_as::<_, Donation>(&sql)
            .bind(new.user_id)
            .bind(new.source_id)
            .bind(&new.amount)
            .bind(&new.choice)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn upsert_recipient(&self, upsert: RecipientUpsert) -> Result<Recipient, DatabaseError> {
        let sql = format!(
            "INSERT INTO recipients (user_id, name, account, recipient_type, network)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (user_id, account)
             DO UPDATE SET name = EXCLUDED.name,
                           times_used = recipients.times_used + 1,
                           updated_at = NOW()
             RETURNING {}",
            RECIPIENT_COLUMNS
        );
        sqlx::query_as::<_, Recipient>(&sql)
            .bind(upsert.user_id)
            .bind(&upsert.name)
            .bind(&upsert.account)
            .bind(&upsert.recipient_type)
            .bind(&upsert.network)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}
