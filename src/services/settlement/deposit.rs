//! Deposit flow: a single collection stage followed by the wallet credit.

use super::policy::{decide_collection, CollectionDecision, Expiry};
use super::send::{
    validate_amount, validate_currency, validate_donation, validate_percentage, WALLET_BALANCE,
};
use super::state::{DepositStatus, QueueStatus};
use super::{Advance, SettlementEngine, SettlementError, SettlementResult};
use crate::database::deposit_repository::{Deposit, DepositUpdate, NewDeposit};
use crate::database::payment_method_repository::PaymentMethodKind;
use crate::payments::types::{CollectionRequest, NetworkCode};
use crate::services::ledger::{deposit_wallet_credit, INVESTMENT_TYPE_DEPOSIT};
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct DepositRequest {
    pub amount: BigDecimal,
    #[serde(default)]
    pub currency: Option<String>,
    pub payment_method_id: String,
    #[serde(default)]
    pub investment_percentage: Option<BigDecimal>,
    #[serde(default)]
    pub donation_choice: Option<String>,
}

/// `DEP_<unix seconds>_<first 8 hex chars of the user id>`
pub fn deposit_reference(user_id: Uuid, now: DateTime<Utc>) -> String {
    let user = user_id.simple().to_string();
    format!("DEP_{}_{}", now.timestamp(), &user[..8])
}

impl SettlementEngine {
    /// Records a deposit and asks the provider to collect it. The wallet is
    /// credited later, when a status check or the sweep sees the collection.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn initiate_deposit(
        &self,
        user_id: Uuid,
        request: DepositRequest,
    ) -> SettlementResult<Deposit> {
        let amount = validate_amount(&request.amount)?;
        let currency = validate_currency(request.currency.as_deref())?;
        let investment_percentage = validate_percentage(request.investment_percentage.as_ref())?;
        let donation_choice = validate_donation(request.donation_choice.as_deref())?;

        let payment_method_id = request.payment_method_id.trim().to_string();
        if payment_method_id == WALLET_BALANCE {
            return Err(SettlementError::validation(
                "payment_method_id",
                "a deposit cannot be funded from the wallet it credits",
            ));
        }
        let not_found = || SettlementError::PaymentMethodNotFound(payment_method_id.clone());
        let method_id = Uuid::parse_str(&payment_method_id).map_err(|_| not_found())?;
        let method = self
            .stores
            .payment_methods
            .find_active(user_id, method_id)
            .await?
            .ok_or_else(not_found)?;

        let reference = deposit_reference(user_id, Utc::now());
        let deposit = self
            .stores
            .deposits
            .insert_deposit(NewDeposit {
                id: Uuid::new_v4(),
                user_id,
                amount,
                currency,
                investment_percentage,
                donation_choice,
                payment_method_id,
                payment_method_type: method.method_type.clone(),
                psp_reference: reference.clone(),
            })
            .await?;
        info!(deposit_id = %deposit.id, reference = %reference, "deposit recorded");

        let pending = [DepositStatus::Pending];
        if method.kind() != Some(PaymentMethodKind::MobileMoney) {
            let mut update = DepositUpdate::new(DepositStatus::Initiated, QueueStatus::Queued);
            update.transaction_id = Some(reference);
            let initiated = self
                .stores
                .deposits
                .transition_deposit(deposit.id, &pending, update)
                .await?;
            return Ok(initiated.unwrap_or(deposit));
        }

        let phone = method
            .phone_number
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                SettlementError::validation(
                    "payment_method_id",
                    "mobile money method has no phone number",
                )
            })?;
        let request = CollectionRequest {
            amount: deposit.amount.clone(),
            phone_number: phone,
            network: NetworkCode::parse(method.network.as_deref().unwrap_or_default()),
            reference,
        };

        match self.psp.initiate_collection(request).await {
            Ok(outcome) => {
                let update = DepositUpdate::new(DepositStatus::Initiated, QueueStatus::Queued)
                    .with_psp(
                        outcome.provider.to_string(),
                        outcome.response.provider_transaction_id,
                        outcome.response.raw_response,
                    );
                let initiated = self
                    .stores
                    .deposits
                    .transition_deposit(deposit.id, &pending, update)
                    .await?;
                Ok(initiated.unwrap_or(deposit))
            }
            Err(e) => {
                let update = DepositUpdate::new(DepositStatus::Failed, QueueStatus::Failed);
                if let Err(db) = self
                    .stores
                    .deposits
                    .transition_deposit(deposit.id, &pending, update)
                    .await
                {
                    warn!(deposit_id = %deposit.id, error = %db, "could not mark deposit failed");
                }
                Err(SettlementError::CollectionInitiation {
                    reference: deposit.id,
                    source: e,
                })
            }
        }
    }

    /// Polls the provider for an owned deposit and applies the result.
    pub async fn check_deposit_status(&self, user_id: Uuid, id: Uuid) -> SettlementResult<Deposit> {
        let deposit = self.deposit_for_user(user_id, id).await?;
        if deposit.status().is_terminal() {
            return Ok(deposit);
        }
        self.advance_deposit(id, Expiry::Never).await?;
        self.deposit_for_user(user_id, id).await
    }

    /// Same claim as [`SettlementEngine::advance_transaction`]: the caller
    /// whose conditional update lands applies the ledger effects, once.
    #[instrument(skip(self))]
    pub async fn advance_deposit(
        &self,
        id: Uuid,
        expiry: Expiry,
    ) -> SettlementResult<Advance<DepositStatus>> {
        let deposit = self
            .stores
            .deposits
            .find_deposit(id)
            .await?
            .ok_or(SettlementError::DepositNotFound(id))?;

        let status = deposit.status();
        if !DepositStatus::awaiting_collection().contains(&status) {
            return Ok(Advance::Decided(status));
        }
        let Some(psp_transaction_id) = deposit.psp_transaction_id() else {
            return Ok(Advance::Pending);
        };

        // Non-mobile deposits carry our own reference as their id and no PSP
        // holds the collection, so there is nobody to ask.
        let observed = match deposit.psp_name.as_deref() {
            None => None,
            Some(psp_name) => match self
                .psp
                .check_collection_status(&deposit.psp_reference, Some(psp_name), psp_transaction_id)
                .await
            {
                Ok(status) => Some(status),
                Err(e) => {
                    warn!(deposit_id = %id, error = %e, "deposit status check failed");
                    None
                }
            },
        };

        let decision = decide_collection(observed, expiry.is_due(deposit.created_at, Utc::now()));
        let update = match decision {
            CollectionDecision::Collect => {
                DepositUpdate::new(DepositStatus::Collected, QueueStatus::Completed).processed()
            }
            CollectionDecision::Fail => DepositUpdate::new(DepositStatus::Failed, QueueStatus::Failed),
            CollectionDecision::Timeout => {
                DepositUpdate::new(DepositStatus::Failed, QueueStatus::Timeout)
            }
            CollectionDecision::Leave => return Ok(Advance::Pending),
        };

        let Some(moved) = self
            .stores
            .deposits
            .transition_deposit(id, DepositStatus::awaiting_collection(), update)
            .await?
        else {
            return Ok(Advance::Lost);
        };
        info!(
            deposit_id = %id,
            status = %moved.status,
            queue_status = %moved.queue_status,
            "deposit decided"
        );

        if decision == CollectionDecision::Collect {
            self.apply_deposit_credit(&moved).await?;
        }
        Ok(Advance::Moved(moved.status()))
    }

    /// Wallet credit, investment and donation for a freshly collected deposit.
    /// Only the credit is propagated as an error; the side records are best
    /// effort and idempotent per deposit.
    async fn apply_deposit_credit(&self, deposit: &Deposit) -> SettlementResult<()> {
        let credit = deposit_wallet_credit(&deposit.amount, &deposit.investment_percentage);
        if credit > BigDecimal::zero() {
            if let Err(e) = self
                .ledger
                .credit_wallet(deposit.user_id, &credit, &deposit.currency)
                .await
            {
                // Collected but uncredited: flag the queue row for manual review
                error!(deposit_id = %deposit.id, amount = %credit, error = %e, "deposit wallet credit failed");
                let flag = DepositUpdate::new(DepositStatus::Collected, QueueStatus::Failed);
                if let Err(db) = self
                    .stores
                    .deposits
                    .transition_deposit(deposit.id, &[DepositStatus::Collected], flag)
                    .await
                {
                    warn!(deposit_id = %deposit.id, error = %db, "could not flag uncredited deposit");
                }
                return Err(e.into());
            }
        }

        let invested = &deposit.amount - &credit;
        if invested > BigDecimal::zero() {
            if let Err(e) = self
                .ledger
                .allocate_investment(
                    deposit.user_id,
                    deposit.id,
                    &invested,
                    &deposit.currency,
                    INVESTMENT_TYPE_DEPOSIT,
                )
                .await
            {
                warn!(deposit_id = %deposit.id, error = %e, "deposit investment failed");
            }
        }

        if let Err(e) = self
            .ledger
            .record_donation(
                deposit.user_id,
                deposit.id,
                deposit.donation_choice(),
                &deposit.amount,
                &invested,
            )
            .await
        {
            warn!(deposit_id = %deposit.id, error = %e, "deposit donation failed");
        }
        Ok(())
    }

    pub async fn deposit_for_user(&self, user_id: Uuid, id: Uuid) -> SettlementResult<Deposit> {
        self.stores
            .deposits
            .find_deposit(id)
            .await?
            .filter(|d| d.user_id == user_id)
            .ok_or(SettlementError::DepositNotFound(id))
    }

    pub async fn list_deposits(&self, user_id: Uuid) -> SettlementResult<Vec<Deposit>> {
        Ok(self.stores.deposits.list_deposits_for_user(user_id).await?)
    }
}
