//! Ledger side effects of settlement: wallet balance movements, investment
//! and donation records, and the recipient address book.
//!
//! Each effect is individually idempotent or atomic; a group of effects is
//! not applied as one unit.

use crate::database::error::DatabaseError;
use crate::database::ledger_repository::{
    Donation, Investment, NewDonation, NewInvestment, Recipient, RecipientUpsert,
};
use crate::database::store::LedgerStore;
use crate::services::exchange_rate::ExchangeRateService;
use crate::services::settlement::state::DonationChoice;
use bigdecimal::{BigDecimal, RoundingMode, Zero};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub const INVESTMENT_TYPE_TRANSACTION: &str = "transaction_investment";
pub const INVESTMENT_TYPE_DEPOSIT: &str = "deposit_investment";

// ---------------------------------------------------------------------------
// Amount arithmetic
// ---------------------------------------------------------------------------

/// Decimal places of the minor unit (pesewas, cents). Amounts and
/// percentages accepted by settlement never carry more.
pub const MONEY_SCALE: i64 = 2;

/// True when `value` has no digits below the minor unit.
pub fn fits_minor_units(value: &BigDecimal) -> bool {
    value.with_scale(MONEY_SCALE) == *value
}

/// Rounds to the minor unit, half to even, matching what the PSP collects.
pub fn to_money(value: BigDecimal) -> BigDecimal {
    value.with_scale_round(MONEY_SCALE, RoundingMode::HalfEven)
}

/// `amount * percentage / 100`, in minor units
pub fn investment_amount(amount: &BigDecimal, percentage: &BigDecimal) -> BigDecimal {
    to_money(amount * percentage / BigDecimal::from(100))
}

/// `amount + investment_amount(amount, percentage)`
pub fn total_amount(amount: &BigDecimal, percentage: &BigDecimal) -> BigDecimal {
    amount + investment_amount(amount, percentage)
}

/// Portion of a deposit that lands in the wallet: `amount * (100 - pct) / 100`,
/// in minor units. The remainder `amount - credit` is the invested share.
pub fn deposit_wallet_credit(amount: &BigDecimal, percentage: &BigDecimal) -> BigDecimal {
    to_money(amount * (BigDecimal::from(100) - percentage) / BigDecimal::from(100))
}

/// Donation size for a choice: everything, the invested part, or nothing.
pub fn donation_amount(
    choice: DonationChoice,
    full_amount: &BigDecimal,
    invested: &BigDecimal,
) -> Option<BigDecimal> {
    let amount = match choice {
        DonationChoice::None => return None,
        DonationChoice::Both => full_amount.clone(),
        DonationChoice::Profit => invested.clone(),
    };
    (amount > BigDecimal::zero()).then_some(amount)
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    rates: ExchangeRateService,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, rates: ExchangeRateService) -> Self {
        Self { store, rates }
    }

    pub fn rates(&self) -> &ExchangeRateService {
        &self.rates
    }

    pub async fn credit_wallet(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        currency: &str,
    ) -> Result<BigDecimal, DatabaseError> {
        let balance = self.store.credit_wallet(user_id, amount, currency).await?;
        info!(user_id = %user_id, amount = %amount, balance = %balance, "wallet credited");
        Ok(balance)
    }

    /// `None` when the balance cannot cover `amount`.
    pub async fn debit_wallet(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<Option<BigDecimal>, DatabaseError> {
        let balance = self.store.debit_wallet(user_id, amount).await?;
        if let Some(balance) = &balance {
            info!(user_id = %user_id, amount = %amount, balance = %balance, "wallet debited");
        }
        Ok(balance)
    }

    pub async fn wallet_balance(&self, user_id: Uuid) -> Result<BigDecimal, DatabaseError> {
        Ok(self
            .store
            .wallet_balance(user_id)
            .await?
            .unwrap_or_else(BigDecimal::zero))
    }

    /// Records an investment with the current rate. A second call for the same
    /// source is a no-op returning `None`.
    pub async fn allocate_investment(
        &self,
        user_id: Uuid,
        source_id: Uuid,
        amount: &BigDecimal,
        currency: &str,
        investment_type: &str,
    ) -> Result<Option<Investment>, DatabaseError> {
        let rate = self.rates.snapshot(currency);
        let investment = self
            .store
            .insert_investment(NewInvestment {
                user_id,
                source_id,
                amount: amount.clone(),
                investment_type: investment_type.to_string(),
                status: "active".to_string(),
                rate,
            })
            .await?;
        match &investment {
            Some(i) => info!(
                source_id = %source_id,
                amount = %i.amount,
                rate_to_usd = i.rate_to_usd,
                "investment allocated"
            ),
            None => debug!(source_id = %source_id, "investment already recorded"),
        }
        Ok(investment)
    }

    pub async fn record_donation(
        &self,
        user_id: Uuid,
        source_id: Uuid,
        choice: DonationChoice,
        full_amount: &BigDecimal,
        invested: &BigDecimal,
    ) -> Result<Option<Donation>, DatabaseError> {
        let Some(amount) = donation_amount(choice, full_amount, invested) else {
            return Ok(None);
        };
        self.store
            .insert_donation(NewDonation {
                user_id,
                source_id,
                amount,
                choice: choice.as_str().to_string(),
            })
            .await
    }

    pub async fn remember_recipient(
        &self,
        upsert: RecipientUpsert,
    ) -> Result<Recipient, DatabaseError> {
        self.store.upsert_recipient(upsert).await
    }
}
