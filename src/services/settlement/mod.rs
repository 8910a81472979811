//! Settlement engine
//!
//! Drives send-money transactions from collection through investment
//! allocation and delivery, and deposits through collection and the wallet
//! credit. All coordination goes through conditional updates on the stored
//! record, so the inline poller, the status endpoints and the reconciliation
//! sweep can race on the same id without applying side effects twice.

pub mod deposit;
pub mod distribution;
pub mod policy;
pub mod poller;
pub mod send;
pub mod state;

use crate::database::error::DatabaseError;
use crate::database::store::Stores;
use crate::error::{AppError, DomainError, ValidationError};
use crate::services::exchange_rate::ExchangeRateService;
use crate::services::ledger::LedgerService;
use crate::services::psp_service::{PspService, PspServiceError};
use bigdecimal::BigDecimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub use deposit::DepositRequest;
pub use policy::Expiry;
pub use send::SendMoneyRequest;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Inline status checks per transaction before it times out
    pub poll_max_attempts: u32,
    /// Attempt `n` sleeps `n * poll_base_delay` first
    pub poll_base_delay: Duration,
    /// When off, only the reconciliation sweep advances collections
    pub inline_poller_enabled: bool,
    /// How long one distribution pass owns a transaction
    pub distribution_lease: Duration,
    pub max_distribution_attempts: i32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            poll_max_attempts: 10,
            poll_base_delay: Duration::from_secs(5),
            inline_poller_enabled: true,
            distribution_lease: Duration::from_secs(120),
            max_distribution_attempts: 5,
        }
    }
}

impl SettlementConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_max_attempts = std::env::var("SETTLEMENT_POLL_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(cfg.poll_max_attempts);
        cfg.poll_base_delay = Duration::from_secs(
            std::env::var("SETTLEMENT_POLL_BASE_DELAY_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_base_delay.as_secs()),
        );
        cfg.inline_poller_enabled = std::env::var("SETTLEMENT_INLINE_POLLER_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(cfg.inline_poller_enabled);
        cfg.distribution_lease = Duration::from_secs(
            std::env::var("SETTLEMENT_DISTRIBUTION_LEASE_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.distribution_lease.as_secs()),
        );
        cfg.max_distribution_attempts = std::env::var("SETTLEMENT_MAX_DISTRIBUTION_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(cfg.max_distribution_attempts);
        cfg
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("payment method not found: {0}")]
    PaymentMethodNotFound(String),

    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        available: BigDecimal,
        required: BigDecimal,
    },

    #[error("transaction not found: {0}")]
    TransactionNotFound(Uuid),

    #[error("deposit not found: {0}")]
    DepositNotFound(Uuid),

    /// The provider refused the collection; the record is already failed.
    #[error("collection could not be initiated for {reference}: {source}")]
    CollectionInitiation {
        reference: Uuid,
        #[source]
        source: PspServiceError,
    },

    #[error(transparent)]
    Psp(#[from] PspServiceError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl SettlementError {
    pub(crate) fn validation(field: &str, reason: impl Into<String>) -> Self {
        SettlementError::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::Validation { field, reason } => AppError::invalid_field(field, reason),
            SettlementError::UnsupportedCurrency(currency) => {
                AppError::validation(ValidationError::InvalidCurrency {
                    currency,
                    reason: "supported currencies are GHS, USD, KES, ZMW".to_string(),
                })
            }
            SettlementError::PaymentMethodNotFound(payment_method_id) => {
                AppError::domain(DomainError::PaymentMethodNotFound { payment_method_id })
            }
            SettlementError::InsufficientBalance {
                available,
                required,
            } => AppError::domain(DomainError::InsufficientBalance {
                available: available.to_string(),
                required: required.to_string(),
            }),
            SettlementError::TransactionNotFound(id) => {
                AppError::domain(DomainError::TransactionNotFound {
                    transaction_id: id.to_string(),
                })
            }
            SettlementError::DepositNotFound(id) => AppError::domain(DomainError::DepositNotFound {
                deposit_id: id.to_string(),
            }),
            SettlementError::CollectionInitiation { reference, source } => {
                AppError::from(source).with_context(format!("transaction {} marked failed", reference))
            }
            SettlementError::Psp(e) => e.into(),
            SettlementError::Database(e) => e.into(),
        }
    }
}

pub type SettlementResult<T> = Result<T, SettlementError>;

/// What one advancement attempt did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance<S> {
    /// Collection was already decided before this call; nothing was polled
    Decided(S),
    /// The provider has no verdict yet
    Pending,
    /// This call applied the transition and now owns its side effects
    Moved(S),
    /// A concurrent writer applied a transition first
    Lost,
}

impl<S> Advance<S> {
    pub fn keeps_polling(&self) -> bool {
        matches!(self, Advance::Pending)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SettlementEngine {
    stores: Stores,
    psp: Arc<PspService>,
    ledger: LedgerService,
    config: SettlementConfig,
}

impl SettlementEngine {
    pub fn new(
        stores: Stores,
        psp: Arc<PspService>,
        rates: ExchangeRateService,
        config: SettlementConfig,
    ) -> Self {
        let ledger = LedgerService::new(stores.ledger.clone(), rates);
        Self {
            stores,
            psp,
            ledger,
            config,
        }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    pub fn psp(&self) -> &PspService {
        &self.psp
    }

    pub fn ledger(&self) -> &LedgerService {
        &self.ledger
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }
}
