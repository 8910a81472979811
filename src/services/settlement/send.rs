//! Send-money entry point and the collection stage of a transaction.

use super::policy::{decide_collection, CollectionDecision, Expiry};
use super::state::{CollectionStage, DonationChoice, RecipientType, TransactionStatus};
use super::{Advance, SettlementEngine, SettlementError, SettlementResult};
use crate::database::payment_method_repository::PaymentMethodKind;
use crate::database::transaction_repository::{
    NewTransaction, PspLinkage, StageSet, Transaction, TransactionUpdate,
};
use crate::payments::types::{CollectionRequest, NetworkCode};
use crate::services::ledger;
use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Payment method id meaning "debit my platform wallet".
pub const WALLET_BALANCE: &str = "wallet_balance";

pub const SUPPORTED_CURRENCIES: [&str; 4] = ["GHS", "USD", "KES", "ZMW"];
pub const DEFAULT_CURRENCY: &str = "GHS";

pub const FUNDING_WALLET: &str = "wallet";
pub const FUNDING_MOBILE_MONEY: &str = "mobile_money";

pub const REASON_PSP_FAILED: &str = "psp_reported_failure";
pub const REASON_TIMEOUT: &str = "collection_timeout";

#[derive(Debug, Clone, Deserialize)]
pub struct SendMoneyRequest {
    pub amount: BigDecimal,
    #[serde(default)]
    pub currency: Option<String>,
    pub recipient_name: String,
    pub recipient_account: String,
    pub recipient_type: String,
    #[serde(default)]
    pub network: Option<String>,
    pub payment_method_id: String,
    #[serde(default)]
    pub investment_percentage: Option<BigDecimal>,
    #[serde(default)]
    pub donation_choice: Option<String>,
}

/// A request that passed every check that needs no storage.
#[derive(Debug, Clone)]
pub(crate) struct ValidatedSend {
    pub amount: BigDecimal,
    pub currency: String,
    pub investment_percentage: BigDecimal,
    pub recipient_name: String,
    pub recipient_account: String,
    pub recipient_type: RecipientType,
    pub network: Option<String>,
    pub donation_choice: DonationChoice,
    pub payment_method_id: String,
}

impl SendMoneyRequest {
    pub(crate) fn validate(&self) -> SettlementResult<ValidatedSend> {
        let amount = validate_amount(&self.amount)?;
        let currency = validate_currency(self.currency.as_deref())?;
        let investment_percentage = validate_percentage(self.investment_percentage.as_ref())?;
        let donation_choice = validate_donation(self.donation_choice.as_deref())?;

        let recipient_type = RecipientType::parse(&self.recipient_type).ok_or_else(|| {
            SettlementError::validation(
                "recipient_type",
                format!("unsupported recipient type '{}'", self.recipient_type),
            )
        })?;
        if self.recipient_name.trim().is_empty() {
            return Err(SettlementError::validation("recipient_name", "is required"));
        }
        let recipient_account = self.recipient_account.trim().to_string();
        if recipient_account.is_empty() {
            return Err(SettlementError::validation("recipient_account", "is required"));
        }
        let network = self
            .network
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        if recipient_type == RecipientType::MobileMoney {
            if network.is_none() {
                return Err(SettlementError::validation(
                    "network",
                    "is required for mobile money recipients",
                ));
            }
            if !is_phone_number(&recipient_account) {
                return Err(SettlementError::validation(
                    "recipient_account",
                    "must be a phone number for mobile money recipients",
                ));
            }
        }
        if self.payment_method_id.trim().is_empty() {
            return Err(SettlementError::validation("payment_method_id", "is required"));
        }

        Ok(ValidatedSend {
            amount,
            currency,
            investment_percentage,
            recipient_name: self.recipient_name.trim().to_string(),
            recipient_account,
            recipient_type,
            network,
            donation_choice,
            payment_method_id: self.payment_method_id.trim().to_string(),
        })
    }
}

pub(crate) fn validate_amount(amount: &BigDecimal) -> SettlementResult<BigDecimal> {
    if *amount <= BigDecimal::zero() {
        return Err(SettlementError::validation("amount", "must be greater than zero"));
    }
    // Anything finer than a pesewa cannot be collected as sent
    if !ledger::fits_minor_units(amount) {
        return Err(SettlementError::validation(
            "amount",
            "must not have more than 2 decimal places",
        ));
    }
    Ok(amount.clone())
}

pub(crate) fn validate_currency(currency: Option<&str>) -> SettlementResult<String> {
    let currency = currency
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    if !SUPPORTED_CURRENCIES.contains(&currency.as_str()) {
        return Err(SettlementError::UnsupportedCurrency(currency));
    }
    Ok(currency)
}

pub(crate) fn validate_percentage(percentage: Option<&BigDecimal>) -> SettlementResult<BigDecimal> {
    let percentage = percentage.cloned().unwrap_or_else(BigDecimal::zero);
    if percentage < BigDecimal::zero() || percentage > BigDecimal::from(100) {
        return Err(SettlementError::validation(
            "investment_percentage",
            "must be between 0 and 100",
        ));
    }
    if !ledger::fits_minor_units(&percentage) {
        return Err(SettlementError::validation(
            "investment_percentage",
            "must not have more than 2 decimal places",
        ));
    }
    Ok(percentage)
}

pub(crate) fn validate_donation(choice: Option<&str>) -> SettlementResult<DonationChoice> {
    let raw = choice.unwrap_or_default();
    DonationChoice::parse(raw).ok_or_else(|| {
        SettlementError::validation(
            "donation_choice",
            format!("'{}' is not one of none, profit, both", raw),
        )
    })
}

/// Digits with an optional leading `+`, 9 to 15 long, ignoring spaces.
pub fn is_phone_number(value: &str) -> bool {
    static PHONE: OnceLock<Option<Regex>> = OnceLock::new();
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    PHONE
        .get_or_init(|| Regex::new(r"^\+?[0-9]{9,15}$").ok())
        .as_ref()
        .map_or(false, |re| re.is_match(&compact))
}

/// Where the money for a send comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Funding {
    Wallet,
    MobileMoney { phone: String, network: String },
}

impl Funding {
    fn source(&self) -> &'static str {
        match self {
            Funding::Wallet => FUNDING_WALLET,
            Funding::MobileMoney { .. } => FUNDING_MOBILE_MONEY,
        }
    }
}

impl SettlementEngine {
    /// Validates, records and starts a send. Wallet-funded sends are
    /// collected and distributed before this returns; mobile-money sends
    /// return in `collection_pending` with the poller running.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn send_money(
        self: &Arc<Self>,
        user_id: Uuid,
        request: SendMoneyRequest,
    ) -> SettlementResult<Transaction> {
        let send = request.validate()?;
        let funding = self.resolve_funding(user_id, &send.payment_method_id).await?;

        let investment_amount = ledger::investment_amount(&send.amount, &send.investment_percentage);
        let total_amount = ledger::total_amount(&send.amount, &send.investment_percentage);
        let new = NewTransaction {
            id: Uuid::new_v4(),
            user_id,
            amount: send.amount,
            investment_percentage: send.investment_percentage,
            investment_amount,
            total_amount,
            currency: send.currency,
            recipient_name: send.recipient_name,
            recipient_account: send.recipient_account,
            recipient_type: send.recipient_type,
            recipient_network: send.network,
            donation_choice: send.donation_choice,
            funding_source: funding.source().to_string(),
            payment_method_id: Some(send.payment_method_id),
            stages: StageSet::initial(),
        };

        match funding {
            Funding::Wallet => self.send_from_wallet(new).await,
            Funding::MobileMoney { phone, network } => {
                self.send_from_mobile_money(new, phone, network).await
            }
        }
    }

    pub(crate) async fn resolve_funding(
        &self,
        user_id: Uuid,
        payment_method_id: &str,
    ) -> SettlementResult<Funding> {
        if payment_method_id == WALLET_BALANCE {
            return Ok(Funding::Wallet);
        }
        let not_found = || SettlementError::PaymentMethodNotFound(payment_method_id.to_string());
        let id = Uuid::parse_str(payment_method_id).map_err(|_| not_found())?;
        let method = self
            .stores
            .payment_methods
            .find_active(user_id, id)
            .await?
            .ok_or_else(not_found)?;

        match method.kind() {
            Some(PaymentMethodKind::MobileMoney) => {
                let phone = method
                    .phone_number
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| {
                        SettlementError::validation(
                            "payment_method_id",
                            "mobile money method has no phone number",
                        )
                    })?;
                Ok(Funding::MobileMoney {
                    phone,
                    network: method.network.unwrap_or_default(),
                })
            }
            Some(PaymentMethodKind::Wallet) => Ok(Funding::Wallet),
            Some(PaymentMethodKind::BankCard) | None => Err(SettlementError::validation(
                "payment_method_id",
                format!("'{}' payment methods cannot fund a send", method.method_type),
            )),
        }
    }

    async fn send_from_wallet(&self, mut new: NewTransaction) -> SettlementResult<Transaction> {
        let available = self.ledger.wallet_balance(new.user_id).await?;
        if available < new.total_amount {
            return Err(SettlementError::InsufficientBalance {
                available,
                required: new.total_amount,
            });
        }
        if self
            .ledger
            .debit_wallet(new.user_id, &new.total_amount)
            .await?
            .is_none()
        {
            // lost a race with another debit between the read and the write
            return Err(SettlementError::InsufficientBalance {
                available: self.ledger.wallet_balance(new.user_id).await?,
                required: new.total_amount,
            });
        }

        new.stages.collection = CollectionStage::Collected;
        let (user_id, total, currency) = (new.user_id, new.total_amount.clone(), new.currency.clone());
        let tx = match self.stores.transactions.insert_transaction(new).await {
            Ok(tx) => tx,
            Err(e) => {
                if let Err(refund) = self.ledger.credit_wallet(user_id, &total, &currency).await {
                    error!(
                        user_id = %user_id,
                        amount = %total,
                        error = %refund,
                        "refund after failed transaction insert did not apply"
                    );
                }
                return Err(e.into());
            }
        };
        info!(transaction_id = %tx.id, total_amount = %tx.total_amount, "wallet-funded send recorded");

        match self.claim_distribution(tx.id).await? {
            Some(claimed) => self.distribute(claimed).await,
            None => Ok(tx),
        }
    }

    async fn send_from_mobile_money(
        self: &Arc<Self>,
        new: NewTransaction,
        phone: String,
        network: String,
    ) -> SettlementResult<Transaction> {
        let tx = self.stores.transactions.insert_transaction(new).await?;
        let request = CollectionRequest {
            amount: tx.total_amount.clone(),
            phone_number: phone,
            network: NetworkCode::parse(&network),
            reference: tx.id.to_string(),
        };

        let outcome = match self.psp.initiate_collection(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let update = TransactionUpdate::stages(StageSet {
                    collection: CollectionStage::Failed,
                    ..tx.stages()
                })
                .with_failure_reason(format!("collection initiation failed: {}", e));
                if let Err(db) = self
                    .stores
                    .transactions
                    .transition_transaction(tx.id, TransactionStatus::awaiting_collection(), update)
                    .await
                {
                    warn!(transaction_id = %tx.id, error = %db, "could not mark transaction failed");
                }
                return Err(SettlementError::CollectionInitiation {
                    reference: tx.id,
                    source: e,
                });
            }
        };

        let linked = self
            .stores
            .transactions
            .record_psp_linkage(
                tx.id,
                PspLinkage {
                    psp_name: outcome.provider.to_string(),
                    psp_transaction_id: outcome.response.provider_transaction_id,
                    psp_request: outcome.request_snapshot,
                    psp_response: outcome.response.raw_response,
                },
            )
            .await?;
        info!(
            transaction_id = %linked.id,
            psp = ?linked.psp_name,
            "collection requested"
        );

        if self.config.inline_poller_enabled {
            self.spawn_poller(linked.id);
        }
        Ok(linked)
    }

    /// One collection check. Safe to call from any number of tasks at once:
    /// only the caller whose conditional update lands applies the outcome.
    #[instrument(skip(self))]
    pub async fn advance_transaction(
        &self,
        id: Uuid,
        expiry: Expiry,
    ) -> SettlementResult<Advance<TransactionStatus>> {
        let tx = self
            .stores
            .transactions
            .find_transaction(id)
            .await?
            .ok_or(SettlementError::TransactionNotFound(id))?;

        let status = tx.status();
        if !TransactionStatus::awaiting_collection().contains(&status) {
            return Ok(Advance::Decided(status));
        }
        let Some(psp_reference) = tx.psp_reference() else {
            return Ok(Advance::Pending);
        };

        let observed = match self
            .psp
            .check_collection_status(&tx.id.to_string(), tx.psp_name.as_deref(), psp_reference)
            .await
        {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(transaction_id = %id, error = %e, "collection status check failed");
                None
            }
        };

        let decision = decide_collection(observed, expiry.is_due(tx.created_at, Utc::now()));
        let stages = tx.stages();
        let update = match decision {
            CollectionDecision::Collect => TransactionUpdate::stages(StageSet {
                collection: CollectionStage::Collected,
                ..stages
            }),
            CollectionDecision::Fail => TransactionUpdate::stages(StageSet {
                collection: CollectionStage::Failed,
                ..stages
            })
            .with_failure_reason(REASON_PSP_FAILED),
            CollectionDecision::Timeout => TransactionUpdate::stages(StageSet {
                collection: CollectionStage::Timeout,
                ..stages
            })
            .with_failure_reason(REASON_TIMEOUT),
            CollectionDecision::Leave => return Ok(Advance::Pending),
        };

        let Some(moved) = self
            .stores
            .transactions
            .transition_transaction(id, TransactionStatus::awaiting_collection(), update)
            .await?
        else {
            return Ok(Advance::Lost);
        };
        info!(transaction_id = %id, status = %moved.status(), "collection decided");

        if decision == CollectionDecision::Collect {
            if let Some(claimed) = self.claim_distribution(id).await? {
                let distributed = self.distribute(claimed).await?;
                return Ok(Advance::Moved(distributed.status()));
            }
        }
        Ok(Advance::Moved(moved.status()))
    }

    /// Transaction owned by `user_id`.
    pub async fn transaction_for_user(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> SettlementResult<Transaction> {
        self.stores
            .transactions
            .find_transaction(id)
            .await?
            .filter(|tx| tx.user_id == user_id)
            .ok_or(SettlementError::TransactionNotFound(id))
    }

    pub async fn list_transactions(&self, user_id: Uuid) -> SettlementResult<Vec<Transaction>> {
        Ok(self
            .stores
            .transactions
            .list_transactions_for_user(user_id)
            .await?)
    }
}
