//! Distribution stage: investment allocation, donation bookkeeping,
//! recipient delivery and the address-book touch.
//!
//! Runs only under a distribution lease. Each pass retries just the stages
//! that have not succeeded; a transaction with a failed stage stays in
//! `processing_distribution` for the sweep to pick up again. The lease is
//! extended right before the delivery call and every write is conditioned on
//! still holding it, so a pass that lost its lease never delivers or persists.

use super::state::{DeliveryStage, InvestmentStage, TransactionStatus};
use super::{SettlementEngine, SettlementError, SettlementResult};
use crate::database::ledger_repository::RecipientUpsert;
use crate::database::transaction_repository::{Transaction, TransactionUpdate};
use crate::services::ledger::INVESTMENT_TYPE_TRANSACTION;
use crate::services::psp_service::DeliveryInstruction;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub const REASON_DISTRIBUTION_INCOMPLETE: &str = "distribution_incomplete";

impl SettlementEngine {
    fn lease_length(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.distribution_lease)
            .unwrap_or_else(|_| chrono::Duration::seconds(120))
    }

    /// Takes the distribution lease. `None` when another pass holds it, the
    /// attempt budget is spent, or the transaction is not distributing.
    pub async fn claim_distribution(&self, id: Uuid) -> SettlementResult<Option<Transaction>> {
        let now = Utc::now();
        Ok(self
            .stores
            .transactions
            .claim_distribution(
                id,
                now,
                now + self.lease_length(),
                self.config.max_distribution_attempts,
            )
            .await?)
    }

    /// Renews the lease held as `held` for one more full lease length.
    async fn extend_lease(
        &self,
        id: Uuid,
        held: Option<DateTime<Utc>>,
    ) -> SettlementResult<Option<DateTime<Utc>>> {
        let Some(held) = held else {
            return Ok(None);
        };
        let now = Utc::now();
        let renewed = self
            .stores
            .transactions
            .extend_distribution_lease(id, held, now, now + self.lease_length())
            .await?;
        Ok(renewed.and_then(|tx| tx.distribution_lease_until))
    }

    async fn current(&self, id: Uuid) -> SettlementResult<Transaction> {
        self.stores
            .transactions
            .find_transaction(id)
            .await?
            .ok_or(SettlementError::TransactionNotFound(id))
    }

    /// Runs one distribution pass over a claimed transaction and releases
    /// the lease.
    #[instrument(skip(self, tx), fields(transaction_id = %tx.id, attempt = tx.distribution_attempts))]
    pub async fn distribute(&self, tx: Transaction) -> SettlementResult<Transaction> {
        let mut stages = tx.stages();
        let mut held = tx.distribution_lease_until;

        if !stages.investment.is_settled() {
            stages.investment = self.allocate_investment(&tx).await;
        }
        // Idempotent per source, so every pass re-records until it sticks
        if stages.investment.is_settled() && !self.record_donation(&tx).await {
            stages.investment = InvestmentStage::Failed;
        }

        if stages.delivery != DeliveryStage::Delivered {
            match self.extend_lease(tx.id, held).await? {
                Some(renewed) => {
                    held = Some(renewed);
                    stages.delivery = self.deliver(&tx).await;
                }
                None => {
                    warn!("distribution lease lapsed before delivery, pass abandoned");
                    return self.current(tx.id).await;
                }
            }
        }

        let mut update = TransactionUpdate::stages(stages)
            .releasing_lease()
            .under_lease(held);
        if stages.status() != TransactionStatus::Completed {
            update = update.with_failure_reason(REASON_DISTRIBUTION_INCOMPLETE);
        }

        let persisted = self
            .stores
            .transactions
            .transition_transaction(tx.id, &[TransactionStatus::ProcessingDistribution], update)
            .await?;
        let Some(persisted) = persisted else {
            warn!("distribution lease lost to another pass, result discarded");
            return self.current(tx.id).await;
        };

        match persisted.status() {
            TransactionStatus::Completed => info!("transaction completed"),
            status if persisted.distribution_attempts >= self.config.max_distribution_attempts => {
                error!(
                    status = %status,
                    investment_status = %persisted.investment_status,
                    delivery_status = %persisted.delivery_status,
                    attempts = persisted.distribution_attempts,
                    "distribution attempts exhausted, manual review required"
                )
            }
            status => warn!(
                status = %status,
                investment_status = %persisted.investment_status,
                delivery_status = %persisted.delivery_status,
                "distribution incomplete, will retry"
            ),
        }
        Ok(persisted)
    }

    async fn allocate_investment(&self, tx: &Transaction) -> InvestmentStage {
        if tx.investment_amount <= BigDecimal::zero() {
            return InvestmentStage::Skipped;
        }
        match self
            .ledger
            .allocate_investment(
                tx.user_id,
                tx.id,
                &tx.investment_amount,
                &tx.currency,
                INVESTMENT_TYPE_TRANSACTION,
            )
            .await
        {
            // `None` means an earlier pass already recorded it
            Ok(_) => InvestmentStage::Allocated,
            Err(e) => {
                warn!(error = %e, "investment allocation failed");
                InvestmentStage::Failed
            }
        }
    }

    /// `false` when the donation could not be written.
    async fn record_donation(&self, tx: &Transaction) -> bool {
        match self
            .ledger
            .record_donation(
                tx.user_id,
                tx.id,
                tx.donation_choice(),
                &tx.amount,
                &tx.investment_amount,
            )
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "donation record failed");
                false
            }
        }
    }

    async fn deliver(&self, tx: &Transaction) -> DeliveryStage {
        let Some(recipient_type) = tx.recipient_type() else {
            warn!(recipient_type = %tx.recipient_type, "unknown recipient type, delivery skipped");
            return DeliveryStage::Failed;
        };
        let instruction = DeliveryInstruction {
            reference: tx.id.to_string(),
            amount: tx.amount.clone(),
            currency: tx.currency.clone(),
            recipient_type,
            account: tx.recipient_account.clone(),
            network: tx.recipient_network.clone(),
        };

        match self.psp.initiate_delivery(instruction).await {
            Ok(outcome) => {
                debug!(outcome = ?outcome, "delivery accepted");
                self.remember_recipient(tx).await;
                DeliveryStage::Delivered
            }
            Err(e) => {
                warn!(error = %e, "delivery failed");
                DeliveryStage::Failed
            }
        }
    }

    async fn remember_recipient(&self, tx: &Transaction) {
        let upsert = RecipientUpsert {
            user_id: tx.user_id,
            name: tx.recipient_name.clone(),
            account: tx.recipient_account.clone(),
            recipient_type: tx.recipient_type.clone(),
            network: tx.recipient_network.clone(),
        };
        if let Err(e) = self.ledger.remember_recipient(upsert).await {
            warn!(error = %e, "recipient upsert failed");
        }
    }
}
