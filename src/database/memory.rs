//! Process-local store implementing every storage seam.
//!
//! Used when the service runs with `SKIP_EXTERNALS=true` and by the test
//! suites. Each trait method takes the lock once, so conditional updates are
//! atomic with respect to each other exactly like the SQL versions.

use crate::database::deposit_repository::{Deposit, DepositUpdate, NewDeposit};
use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::ledger_repository::{
    Donation, Investment, NewDonation, NewInvestment, Recipient, RecipientUpsert,
};
use crate::database::payment_method_repository::{PaymentMethod, PaymentMethodKind};
use crate::database::psp_log_repository::{NewPspLogEntry, PspLogEntry};
use crate::database::store::{
    DepositStore, LedgerStore, PaymentMethodLookup, PspAuditLog, ScanCursor, TransactionStore,
};
use crate::database::transaction_repository::{
    NewTransaction, PspLinkage, Transaction, TransactionUpdate,
};
use crate::services::settlement::state::{DepositStatus, QueueStatus, TransactionStatus};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    transactions: HashMap<Uuid, Transaction>,
    deposits: HashMap<Uuid, Deposit>,
    wallets: HashMap<Uuid, BigDecimal>,
    investments: Vec<Investment>,
    donations: Vec<Donation>,
    recipients: Vec<Recipient>,
    psp_logs: Vec<PspLogEntry>,
    payment_methods: HashMap<Uuid, PaymentMethod>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    reject_audit_writes: AtomicBool,
    failing_donation_writes: AtomicUsize,
    failing_wallet_credits: AtomicUsize,
}

fn unavailable(what: &str) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::ConnectionFailed {
        message: format!("{} unavailable", what),
    })
}

/// Spends one scripted failure, if any are left.
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // a panicked test thread must not wedge the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_payment_method(
        &self,
        user_id: Uuid,
        kind: PaymentMethodKind,
        phone_number: Option<&str>,
        network: Option<&str>,
    ) -> PaymentMethod {
        let now = Utc::now();
        let method = PaymentMethod {
            id: Uuid::new_v4(),
            user_id,
            method_type: kind.as_str().to_string(),
            provider: None,
            phone_number: phone_number.map(str::to_string),
            network: network.map(str::to_string),
            is_active: true,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.lock()
            .payment_methods
            .insert(method.id, method.clone());
        method
    }

    /// Rewrites `created_at`, for exercising the wall-clock timeout.
    pub fn backdate_transaction(&self, id: Uuid, created_at: DateTime<Utc>) {
        if let Some(tx) = self.lock().transactions.get_mut(&id) {
            tx.created_at = created_at;
        }
    }

    pub fn backdate_deposit(&self, id: Uuid, created_at: DateTime<Utc>) {
        if let Some(deposit) = self.lock().deposits.get_mut(&id) {
            deposit.created_at = created_at;
        }
    }

    /// Makes every audit append fail, to check that callers swallow it.
    pub fn reject_audit_writes(&self, reject: bool) {
        self.reject_audit_writes.store(reject, Ordering::SeqCst);
    }

    /// The next `n` donation inserts fail.
    pub fn fail_donation_writes(&self, n: usize) {
        self.failing_donation_writes.store(n, Ordering::SeqCst);
    }

    /// The next `n` wallet credits fail.
    pub fn fail_wallet_credits(&self, n: usize) {
        self.failing_wallet_credits.store(n, Ordering::SeqCst);
    }

    pub fn investments(&self) -> Vec<Investment> {
        self.lock().investments.clone()
    }

    pub fn donations(&self) -> Vec<Donation> {
        self.lock().donations.clone()
    }

    pub fn recipients(&self) -> Vec<Recipient> {
        self.lock().recipients.clone()
    }

    pub fn psp_logs(&self) -> Vec<PspLogEntry> {
        self.lock().psp_logs.clone()
    }
}

fn newest_first<T>(mut rows: Vec<T>, created_at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    rows.sort_by_key(|row| std::cmp::Reverse(created_at(row)));
    rows
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn insert_transaction(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        let now = Utc::now();
        let tx = Transaction {
            id: new.id,
            user_id: new.user_id,
            kind: "send".to_string(),
            amount: new.amount,
            investment_percentage: new.investment_percentage,
            investment_amount: new.investment_amount,
            total_amount: new.total_amount,
            currency: new.currency,
            recipient_name: new.recipient_name,
            recipient_account: new.recipient_account,
            recipient_type: new.recipient_type.as_str().to_string(),
            recipient_network: new.recipient_network,
            donation_choice: new.donation_choice.as_str().to_string(),
            funding_source: new.funding_source,
            payment_method_id: new.payment_method_id,
            psp_name: None,
            psp_transaction_id: None,
            psp_request: None,
            psp_response: None,
            collection_status: new.stages.collection.as_str().to_string(),
            investment_status: new.stages.investment.as_str().to_string(),
            delivery_status: new.stages.delivery.as_str().to_string(),
            status: new.stages.status().as_str().to_string(),
            distribution_attempts: 0,
            distribution_lease_until: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        let mut state = self.lock();
        if state.transactions.contains_key(&tx.id) {
            return Err(DatabaseError::new(
                DatabaseErrorKind::UniqueViolation {
                    constraint: "transactions_pkey".to_string(),
                },
            ));
        }
        state.transactions.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        Ok(self.lock().transactions.get(&id).cloned())
    }

    async fn list_transactions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let rows = self
            .lock()
            .transactions
            .values()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |tx: &Transaction| tx.created_at))
    }

    async fn record_psp_linkage(
        &self,
        id: Uuid,
        linkage: PspLinkage,
    ) -> Result<Transaction, DatabaseError> {
        let mut state = self.lock();
        let tx = state
            .transactions
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("transaction", id.to_string()))?;
        tx.psp_name = Some(linkage.psp_name);
        tx.psp_transaction_id = Some(linkage.psp_transaction_id);
        tx.psp_request = Some(linkage.psp_request);
        tx.psp_response = Some(linkage.psp_response);
        tx.updated_at = Utc::now();
        Ok(tx.clone())
    }

    async fn transition_transaction(
        &self,
        id: Uuid,
        expected: &[TransactionStatus],
        update: TransactionUpdate,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let mut state = self.lock();
        let Some(tx) = state.transactions.get_mut(&id) else {
            return Ok(None);
        };
        if !expected.contains(&tx.status()) {
            return Ok(None);
        }
        if update
            .held_lease
            .is_some_and(|held| tx.distribution_lease_until != Some(held))
        {
            return Ok(None);
        }
        tx.collection_status = update.stages.collection.as_str().to_string();
        tx.investment_status = update.stages.investment.as_str().to_string();
        tx.delivery_status = update.stages.delivery.as_str().to_string();
        tx.status = update.stages.status().as_str().to_string();
        if update.stages.status() == TransactionStatus::Completed {
            tx.failure_reason = None;
        } else if let Some(reason) = update.failure_reason {
            tx.failure_reason = Some(reason);
        }
        if update.release_lease {
            tx.distribution_lease_until = None;
        }
        tx.updated_at = Utc::now();
        Ok(Some(tx.clone()))
    }

    async fn claim_distribution(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let mut state = self.lock();
        let Some(tx) = state.transactions.get_mut(&id) else {
            return Ok(None);
        };
        let lease_free = tx.distribution_lease_until.map_or(true, |until| until < now);
        if tx.status() != TransactionStatus::ProcessingDistribution
            || !lease_free
            || tx.distribution_attempts >= max_attempts
        {
            return Ok(None);
        }
        tx.distribution_lease_until = Some(lease_until);
        tx.distribution_attempts += 1;
        tx.updated_at = Utc::now();
        Ok(Some(tx.clone()))
    }

    async fn extend_distribution_lease(
        &self,
        id: Uuid,
        held_until: DateTime<Utc>,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let mut state = self.lock();
        let Some(tx) = state.transactions.get_mut(&id) else {
            return Ok(None);
        };
        if tx.status() != TransactionStatus::ProcessingDistribution
            || tx.distribution_lease_until != Some(held_until)
            || held_until <= now
        {
            return Ok(None);
        }
        tx.distribution_lease_until = Some(lease_until);
        tx.updated_at = Utc::now();
        Ok(Some(tx.clone()))
    }

    async fn find_awaiting_collection(
        &self,
        after: Option<ScanCursor>,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let mut rows: Vec<Transaction> = self
            .lock()
            .transactions
            .values()
            .filter(|tx| {
                TransactionStatus::awaiting_collection().contains(&tx.status())
                    && tx.psp_reference().is_some()
                    && ScanCursor::admits(after, tx.created_at, tx.id)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|tx| (tx.created_at, tx.id));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }

    async fn find_stalled_distributions(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let mut rows: Vec<Transaction> = self
            .lock()
            .transactions
            .values()
            .filter(|tx| {
                tx.status() == TransactionStatus::ProcessingDistribution
                    && tx.distribution_lease_until.map_or(true, |until| until < now)
                    && tx.distribution_attempts < max_attempts
            })
            .cloned()
            .collect();
        rows.sort_by_key(|tx| tx.updated_at);
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }
}

#[async_trait]
impl DepositStore for InMemoryStore {
    async fn insert_deposit(&self, new: NewDeposit) -> Result<Deposit, DatabaseError> {
        let now = Utc::now();
        let deposit = Deposit {
            id: new.id,
            user_id: new.user_id,
            amount: new.amount,
            currency: new.currency,
            investment_percentage: new.investment_percentage,
            donation_choice: new.donation_choice.as_str().to_string(),
            payment_method_id: new.payment_method_id,
            payment_method_type: new.payment_method_type,
            status: DepositStatus::Pending.as_str().to_string(),
            queue_status: QueueStatus::Queued.as_str().to_string(),
            transaction_id: None,
            psp_name: None,
            psp_reference: new.psp_reference,
            psp_response: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.lock().deposits.insert(deposit.id, deposit.clone());
        Ok(deposit)
    }

    async fn find_deposit(&self, id: Uuid) -> Result<Option<Deposit>, DatabaseError> {
        Ok(self.lock().deposits.get(&id).cloned())
    }

    async fn list_deposits_for_user(&self, user_id: Uuid) -> Result<Vec<Deposit>, DatabaseError> {
        let rows = self
            .lock()
            .deposits
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |d: &Deposit| d.created_at))
    }

    async fn transition_deposit(
        &self,
        id: Uuid,
        expected: &[DepositStatus],
        update: DepositUpdate,
    ) -> Result<Option<Deposit>, DatabaseError> {
        let mut state = self.lock();
        let Some(deposit) = state.deposits.get_mut(&id) else {
            return Ok(None);
        };
        if !expected.contains(&deposit.status()) {
            return Ok(None);
        }
        let now = Utc::now();
        deposit.status = update.status.as_str().to_string();
        deposit.queue_status = update.queue_status.as_str().to_string();
        if let Some(transaction_id) = update.transaction_id {
            deposit.transaction_id = Some(transaction_id);
        }
        if let Some(psp_name) = update.psp_name {
            deposit.psp_name = Some(psp_name);
        }
        if let Some(response) = update.psp_response {
            deposit.psp_response = Some(response);
        }
        if update.processed {
            deposit.processed_at = Some(now);
        }
        deposit.updated_at = now;
        Ok(Some(deposit.clone()))
    }

    async fn find_awaiting_collection_deposits(
        &self,
        after: Option<ScanCursor>,
        limit: i64,
    ) -> Result<Vec<Deposit>, DatabaseError> {
        let mut rows: Vec<Deposit> = self
            .lock()
            .deposits
            .values()
            .filter(|d| {
                DepositStatus::awaiting_collection().contains(&d.status())
                    && QueueStatus::awaiting_collection().contains(&d.queue_status())
                    && d.psp_transaction_id().is_some()
                    && ScanCursor::admits(after, d.created_at, d.id)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|d| (d.created_at, d.id));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn credit_wallet(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        _currency: &str,
    ) -> Result<BigDecimal, DatabaseError> {
        if take_failure(&self.failing_wallet_credits) {
            return Err(unavailable("wallet store"));
        }
        let mut state = self.lock();
        let balance = state
            .wallets
            .entry(user_id)
            .or_insert_with(|| BigDecimal::from(0));
        *balance += amount;
        Ok(balance.clone())
    }

    async fn debit_wallet(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<Option<BigDecimal>, DatabaseError> {
        let mut state = self.lock();
        match state.wallets.get_mut(&user_id) {
            Some(balance) if &*balance >= amount => {
                *balance -= amount;
                Ok(Some(balance.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn wallet_balance(&self, user_id: Uuid) -> Result<Option<BigDecimal>, DatabaseError> {
        Ok(self.lock().wallets.get(&user_id).cloned())
    }

    async fn insert_investment(
        &self,
        new: NewInvestment,
    ) -> Result<Option<Investment>, DatabaseError> {
        let mut state = self.lock();
        if state.investments.iter().any(|i| i.source_id == new.source_id) {
            return Ok(None);
        }
        let investment = Investment {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            source_id: new.source_id,
            amount: new.amount,
            currency: new.rate.currency,
            investment_type: new.investment_type,
            status: new.status,
            rate_to_usd: new.rate.rate_to_usd,
            rate_source: new.rate.source,
            rate_captured_at: new.rate.captured_at,
            created_at: Utc::now(),
        };
        state.investments.push(investment.clone());
        Ok(Some(investment))
    }

    async fn insert_donation(&self, new: NewDonation) -> Result<Option<Donation>, DatabaseError> {
        if take_failure(&self.failing_donation_writes) {
            return Err(unavailable("donation store"));
        }
        let mut state = self.lock();
        if state.donations.iter().any(|d| d.source_id == new.source_id) {
            return Ok(None);
        }
        let donation = Donation {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            source_id: new.source_id,
            amount: new.amount,
            choice: new.choice,
            status: "pledged".to_string(),
            created_at: Utc::now(),
        };
        state.donations.push(donation.clone());
        Ok(Some(donation))
    }

    async fn upsert_recipient(&self, upsert: RecipientUpsert) -> Result<Recipient, DatabaseError> {
        let mut state = self.lock();
        let now = Utc::now();
        if let Some(existing) = state
            .recipients
            .iter_mut()
            .find(|r| r.user_id == upsert.user_id && r.account == upsert.account)
        {
            existing.name = upsert.name;
            existing.times_used += 1;
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let recipient = Recipient {
            id: Uuid::new_v4(),
            user_id: upsert.user_id,
            name: upsert.name,
            account: upsert.account,
            recipient_type: upsert.recipient_type,
            network: upsert.network,
            times_used: 1,
            created_at: now,
            updated_at: now,
        };
        state.recipients.push(recipient.clone());
        Ok(recipient)
    }
}

#[async_trait]
impl PspAuditLog for InMemoryStore {
    async fn append(&self, entry: NewPspLogEntry) -> Result<(), DatabaseError> {
        if self.reject_audit_writes.load(Ordering::SeqCst) {
            return Err(unavailable("audit store"));
        }
        self.lock().psp_logs.push(entry.into_entry());
        Ok(())
    }
}

#[async_trait]
impl PaymentMethodLookup for InMemoryStore {
    async fn find_active(
        &self,
        user_id: Uuid,
        payment_method_id: Uuid,
    ) -> Result<Option<PaymentMethod>, DatabaseError> {
        Ok(self
            .lock()
            .payment_methods
            .get(&payment_method_id)
            .filter(|m| m.user_id == user_id && m.is_active && !m.is_deleted)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::transaction_repository::StageSet;
    use crate::services::settlement::state::{CollectionStage, DonationChoice, RecipientType};
    use std::sync::Arc;

    fn new_tx(user_id: Uuid) -> NewTransaction {
        NewTransaction {
            id: Uuid::new_v4(),
            user_id,
            amount: BigDecimal::from(100),
            investment_percentage: BigDecimal::from(0),
            investment_amount: BigDecimal::from(0),
            total_amount: BigDecimal::from(100),
            currency: "GHS".to_string(),
            recipient_name: "Kofi".to_string(),
            recipient_account: "0244111111".to_string(),
            recipient_type: RecipientType::MobileMoney,
            recipient_network: Some("MTN".to_string()),
            donation_choice: DonationChoice::None,
            funding_source: "mobile_money".to_string(),
            payment_method_id: None,
            stages: StageSet::initial(),
        }
    }

    #[tokio::test]
    async fn concurrent_transitions_have_exactly_one_winner() {
        let store = Arc::new(InMemoryStore::new());
        let tx = store.insert_transaction(new_tx(Uuid::new_v4())).await.unwrap();
        let collected = StageSet {
            collection: CollectionStage::Collected,
            ..tx.stages()
        };

        let id = tx.id;
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .transition_transaction(
                        id,
                        TransactionStatus::awaiting_collection(),
                        TransactionUpdate::stages(collected),
                    )
                    .await
                    .unwrap()
                    .is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn debit_refuses_to_go_negative() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        assert!(store
            .debit_wallet(user, &BigDecimal::from(1))
            .await
            .unwrap()
            .is_none());
        store
            .credit_wallet(user, &BigDecimal::from(10), "GHS")
            .await
            .unwrap();
        assert!(store
            .debit_wallet(user, &BigDecimal::from(11))
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store.debit_wallet(user, &BigDecimal::from(10)).await.unwrap(),
            Some(BigDecimal::from(0))
        );
    }

    #[tokio::test]
    async fn claim_respects_lease_and_attempt_budget() {
        let store = InMemoryStore::new();
        let tx = store.insert_transaction(new_tx(Uuid::new_v4())).await.unwrap();
        let collected = StageSet {
            collection: CollectionStage::Collected,
            ..tx.stages()
        };
        store
            .transition_transaction(
                tx.id,
                TransactionStatus::awaiting_collection(),
                TransactionUpdate::stages(collected),
            )
            .await
            .unwrap();

        let now = Utc::now();
        let lease = now + chrono::Duration::seconds(60);
        assert!(store.claim_distribution(tx.id, now, lease, 2).await.unwrap().is_some());
        assert!(store.claim_distribution(tx.id, now, lease, 2).await.unwrap().is_none());

        let later = lease + chrono::Duration::seconds(1);
        let relet = later + chrono::Duration::seconds(60);
        assert!(store.claim_distribution(tx.id, later, relet, 2).await.unwrap().is_some());

        let much_later = relet + chrono::Duration::seconds(1);
        assert!(store
            .claim_distribution(tx.id, much_later, much_later, 2)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn recipient_upsert_touches_existing_entry() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let upsert = RecipientUpsert {
            user_id: user,
            name: "Esi".to_string(),
            account: "0244222222".to_string(),
            recipient_type: "mobile_money".to_string(),
            network: Some("MTN".to_string()),
        };
        store.upsert_recipient(upsert.clone()).await.unwrap();
        let second = store.upsert_recipient(upsert).await.unwrap();
        assert_eq!(second.times_used, 2);
        assert_eq!(store.recipients().len(), 1);
    }
}
