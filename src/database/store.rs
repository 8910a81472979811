//! Storage seams used by the settlement engine, the PSP service and the
//! reconciliation worker.
//!
//! Every status change goes through a conditional update: the write is
//! applied only when the stored status is still one of the expected values,
//! and the caller learns whether it won. Postgres repositories and the
//! in-memory store both implement these traits.

use crate::database::deposit_repository::{Deposit, DepositUpdate, NewDeposit};
use crate::database::error::DatabaseError;
use crate::database::memory::InMemoryStore;
use crate::database::ledger_repository::{
    Donation, Investment, NewDonation, NewInvestment, Recipient, RecipientUpsert,
};
use crate::database::payment_method_repository::PaymentMethod;
use crate::database::psp_log_repository::NewPspLogEntry;
use crate::database::transaction_repository::{
    NewTransaction, PspLinkage, Transaction, TransactionUpdate,
};
use crate::services::settlement::state::{DepositStatus, TransactionStatus};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Keyset position within a sweep scan. A page holds the rows strictly after
/// it in `(created_at, id)` order, so records that stay pending cannot hide
/// newer ones from later pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl ScanCursor {
    pub fn new(created_at: DateTime<Utc>, id: Uuid) -> Self {
        Self { created_at, id }
    }

    pub fn admits(after: Option<ScanCursor>, created_at: DateTime<Utc>, id: Uuid) -> bool {
        after.map_or(true, |c| (created_at, id) > (c.created_at, c.id))
    }
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert_transaction(&self, new: NewTransaction) -> Result<Transaction, DatabaseError>;

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError>;

    async fn list_transactions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Transaction>, DatabaseError>;

    /// Stores the provider id and snapshots returned by `initiate_collection`.
    async fn record_psp_linkage(
        &self,
        id: Uuid,
        linkage: PspLinkage,
    ) -> Result<Transaction, DatabaseError>;

    /// Applies `update` only if the stored status is in `expected` and, when
    /// the update names a held lease, that lease is still the stored one.
    /// `None` means another writer got there first.
    async fn transition_transaction(
        &self,
        id: Uuid,
        expected: &[TransactionStatus],
        update: TransactionUpdate,
    ) -> Result<Option<Transaction>, DatabaseError>;

    /// Takes the distribution lease of a `processing_distribution` transaction
    /// whose lease is free or expired and whose attempt budget is not spent.
    async fn claim_distribution(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Option<Transaction>, DatabaseError>;

    /// Pushes a held, unexpired lease out to `lease_until`. `None` when the
    /// lease lapsed or was re-claimed.
    async fn extend_distribution_lease(
        &self,
        id: Uuid,
        held_until: DateTime<Utc>,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Transaction>, DatabaseError>;

    /// Non-terminal transactions with a provider id, oldest first, starting
    /// after `after`.
    async fn find_awaiting_collection(
        &self,
        after: Option<ScanCursor>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError>;

    /// `processing_distribution` transactions a sweep may re-claim.
    async fn find_stalled_distributions(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError>;
}

#[async_trait]
pub trait DepositStore: Send + Sync {
    async fn insert_deposit(&self, new: NewDeposit) -> Result<Deposit, DatabaseError>;

    async fn find_deposit(&self, id: Uuid) -> Result<Option<Deposit>, DatabaseError>;

    async fn list_deposits_for_user(&self, user_id: Uuid) -> Result<Vec<Deposit>, DatabaseError>;

    /// Applies `update` only if the stored status is in `expected`.
    async fn transition_deposit(
        &self,
        id: Uuid,
        expected: &[DepositStatus],
        update: DepositUpdate,
    ) -> Result<Option<Deposit>, DatabaseError>;

    /// Initiated/pending deposits still queued or processing, with a provider id.
    async fn find_awaiting_collection_deposits(
        &self,
        after: Option<ScanCursor>,
        limit: i64,
    ) -> Result<Vec<Deposit>, DatabaseError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Atomic increment, creating the wallet if needed. Returns the new balance.
    async fn credit_wallet(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        currency: &str,
    ) -> Result<BigDecimal, DatabaseError>;

    /// Atomic conditional decrement. `None` when the balance cannot cover it.
    async fn debit_wallet(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<Option<BigDecimal>, DatabaseError>;

    async fn wallet_balance(&self, user_id: Uuid) -> Result<Option<BigDecimal>, DatabaseError>;

    /// `None` when an investment already exists for `new.source_id`.
    async fn insert_investment(
        &self,
        new: NewInvestment,
    ) -> Result<Option<Investment>, DatabaseError>;

    /// `None` when a donation already exists for `new.source_id`.
    async fn insert_donation(&self, new: NewDonation) -> Result<Option<Donation>, DatabaseError>;

    async fn upsert_recipient(&self, upsert: RecipientUpsert) -> Result<Recipient, DatabaseError>;
}

/// Append-only PSP request/response log.
#[async_trait]
pub trait PspAuditLog: Send + Sync {
    async fn append(&self, entry: NewPspLogEntry) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait PaymentMethodLookup: Send + Sync {
    /// Active, non-deleted method owned by `user_id`.
    async fn find_active(
        &self,
        user_id: Uuid,
        payment_method_id: Uuid,
    ) -> Result<Option<PaymentMethod>, DatabaseError>;
}

/// Everything the settlement engine needs from storage, behind one handle.
#[derive(Clone)]
pub struct Stores {
    pub transactions: Arc<dyn TransactionStore>,
    pub deposits: Arc<dyn DepositStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub audit: Arc<dyn PspAuditLog>,
    pub payment_methods: Arc<dyn PaymentMethodLookup>,
}

impl Stores {
    /// All five seams backed by one in-memory store.
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            transactions: store.clone(),
            deposits: store.clone(),
            ledger: store.clone(),
            audit: store.clone(),
            payment_methods: store,
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        use crate::database::{
            deposit_repository::DepositRepository, ledger_repository::LedgerRepository,
            payment_method_repository::PaymentMethodRepository,
            psp_log_repository::PspLogRepository, transaction_repository::TransactionRepository,
        };

        Self {
            transactions: Arc::new(TransactionRepository::new(pool.clone())),
            deposits: Arc::new(DepositRepository::new(pool.clone())),
            ledger: Arc::new(LedgerRepository::new(pool.clone())),
            audit: Arc::new(PspLogRepository::new(pool.clone())),
            payment_methods: Arc::new(PaymentMethodRepository::new(pool)),
        }
    }
}
