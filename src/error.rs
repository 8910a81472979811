//! Errors as the API reports them.
//!
//! Lower layers keep their own `thiserror` enums and convert into
//! [`AppError`] at the handler boundary, which picks the HTTP status, the
//! stable [`ErrorCode`] and the message shown to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable codes clients branch on. Serialized in SCREAMING_SNAKE_CASE.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "UNAUTHENTICATED")]
    Unauthenticated,
    #[serde(rename = "INSUFFICIENT_BALANCE")]
    InsufficientBalance,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "DEPOSIT_NOT_FOUND")]
    DepositNotFound,
    #[serde(rename = "PAYMENT_METHOD_NOT_FOUND")]
    PaymentMethodNotFound,
    #[serde(rename = "PROVIDER_NOT_CONFIGURED")]
    ProviderNotConfigured,
    #[serde(rename = "INVALID_CURRENCY")]
    InvalidCurrency,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Settlement rules the request broke.
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No user identity on the request
    Unauthenticated,
    /// Wallet balance cannot cover a wallet-funded send
    InsufficientBalance { available: String, required: String },
    TransactionNotFound { transaction_id: String },
    DepositNotFound { deposit_id: String },
    /// Unknown, inactive or foreign payment method
    PaymentMethodNotFound { payment_method_id: String },
    /// Provider name is valid but nothing is registered under it
    ProviderNotConfigured { provider: String },
}

#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
}

/// Failures on the PSP side of a call.
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
}

#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidCurrency { currency: String, reason: String },
    InvalidAmount { amount: String, reason: String },
    InvalidField { field: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        })
    }

    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::Unauthenticated => 401,
                DomainError::InsufficientBalance { .. } => 422,
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::DepositNotFound { .. } => 404,
                DomainError::PaymentMethodNotFound { .. } => 404,
                DomainError::ProviderNotConfigured { .. } => 404,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502,
                ExternalError::RateLimit { .. } => 429,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::Unauthenticated => ErrorCode::Unauthenticated,
                DomainError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::DepositNotFound { .. } => ErrorCode::DepositNotFound,
                DomainError::PaymentMethodNotFound { .. } => ErrorCode::PaymentMethodNotFound,
                DomainError::ProviderNotConfigured { .. } => ErrorCode::ProviderNotConfigured,
            },
            AppErrorKind::Infrastructure(InfrastructureError::Database { .. }) => {
                ErrorCode::DatabaseError
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidCurrency { .. } => ErrorCode::InvalidCurrency,
                ValidationError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                _ => ErrorCode::ValidationError,
            },
        }
    }

    /// Message safe to show to the end user.
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::Unauthenticated => "Authentication required".to_string(),
                DomainError::InsufficientBalance {
                    available,
                    required,
                } => format!(
                    "Insufficient wallet balance. Available: {}, Required: {}",
                    available, required
                ),
                DomainError::TransactionNotFound { transaction_id } => {
                    format!("Transaction '{}' not found", transaction_id)
                }
                DomainError::DepositNotFound { deposit_id } => {
                    format!("Deposit '{}' not found", deposit_id)
                }
                DomainError::PaymentMethodNotFound { payment_method_id } => {
                    format!("Payment method '{}' not found", payment_method_id)
                }
                DomainError::ProviderNotConfigured { provider } => {
                    format!("Payment provider '{}' is not configured", provider)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => match retry_after {
                    Some(secs) => format!(
                        "Rate limit exceeded for {}. Please try again in {} seconds",
                        service, secs
                    ),
                    None => format!("Rate limit exceeded for {}. Please try again later", service),
                },
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid '{}': {}", field, reason)
                }
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(InfrastructureError::Database { is_retryable, .. }) => {
                *is_retryable
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<PaymentError> in payments/error.rs

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_error() {
        let error = AppError::domain(DomainError::InsufficientBalance {
            available: "50".to_string(),
            required: "120".to_string(),
        });

        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::InsufficientBalance);
        assert!(error.user_message().contains("Insufficient wallet balance"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_unauthenticated_error() {
        let error = AppError::domain(DomainError::Unauthenticated);
        assert_eq!(error.status_code(), 401);
        assert_eq!(error.error_code(), ErrorCode::Unauthenticated);
    }

    #[test]
    fn test_rate_limit_error() {
        let error = AppError::new(AppErrorKind::External(ExternalError::RateLimit {
            service: "ogate".to_string(),
            retry_after: Some(60),
        }));

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.error_code(), ErrorCode::RateLimitError);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount must be greater than zero".to_string(),
        });

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::InvalidAmount);
        assert!(!error.is_retryable());

        let error = AppError::invalid_field("network", "required for mobile money");
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(error.user_message().contains("network"));
    }

    #[test]
    fn test_error_code_serializes_screaming() {
        let json = serde_json::to_string(&ErrorCode::PaymentMethodNotFound).unwrap();
        assert_eq!(json, "\"PAYMENT_METHOD_NOT_FOUND\"");
    }
}
