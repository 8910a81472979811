//! PSP Service
//!
//! Front door to the payment providers. Callers hand over a collection or a
//! delivery and never name a provider: the registry picks one per payer
//! network. Every provider call is bracketed by request/response rows in the
//! audit log; audit failures are logged and swallowed.

use crate::database::error::DatabaseError;
use crate::database::psp_log_repository::{LogDirection, NewPspLogEntry};
use crate::database::store::{LedgerStore, PspAuditLog};
use crate::error::{AppError, DomainError};
use crate::payments::error::PaymentError;
use crate::payments::factory::PspRegistry;
use crate::payments::types::{
    CollectionRequest, CollectionResponse, CollectionStatus, DeliveryRequest, NetworkCode,
    ProviderName,
};
use crate::services::settlement::state::RecipientType;
use bigdecimal::BigDecimal;
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const OP_INITIATE_COLLECTION: &str = "initiate_collection";
pub const OP_CHECK_COLLECTION_STATUS: &str = "check_collection_status";
pub const OP_INITIATE_DELIVERY: &str = "initiate_delivery";
pub const OP_TEST_CONNECTION: &str = "test_connection";

#[derive(Debug, thiserror::Error)]
pub enum PspServiceError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("No provider registered under '{0}'")]
    ProviderNotRegistered(String),

    #[error("Invalid delivery: {0}")]
    InvalidDelivery(String),
}

impl From<PspServiceError> for AppError {
    fn from(err: PspServiceError) -> Self {
        match err {
            PspServiceError::Payment(e) => e.into(),
            PspServiceError::Database(e) => e.into(),
            PspServiceError::ProviderNotRegistered(provider) => {
                AppError::domain(DomainError::ProviderNotConfigured { provider })
            }
            PspServiceError::InvalidDelivery(reason) => AppError::invalid_field("recipient", reason),
        }
    }
}

/// Result of a collection, with the request snapshot that was sent.
#[derive(Debug, Clone)]
pub struct CollectionOutcome {
    pub provider: ProviderName,
    pub request_snapshot: JsonValue,
    pub response: CollectionResponse,
}

/// Where a delivery should land.
#[derive(Debug, Clone)]
pub struct DeliveryInstruction {
    pub reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub recipient_type: RecipientType,
    pub account: String,
    pub network: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Payout handed to a mobile-money provider
    Dispatched { provider: ProviderName },
    /// Platform wallet credited directly
    WalletCredited { balance: BigDecimal },
    /// On-chain delivery is not settled here; the instruction is only logged
    Logged,
}

pub struct PspService {
    registry: Arc<PspRegistry>,
    audit: Arc<dyn PspAuditLog>,
    ledger: Arc<dyn LedgerStore>,
}

impl PspService {
    pub fn new(
        registry: Arc<PspRegistry>,
        audit: Arc<dyn PspAuditLog>,
        ledger: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            registry,
            audit,
            ledger,
        }
    }

    pub fn registry(&self) -> &PspRegistry {
        &self.registry
    }

    pub fn available_providers(&self) -> Vec<ProviderName> {
        self.registry.available()
    }

    /// Provider that a collection on `network` would go to right now.
    pub fn recommend(&self, network: &str) -> ProviderName {
        self.registry.select_for_network(&NetworkCode::parse(network))
    }

    #[instrument(skip(self, request), fields(reference = %request.reference))]
    pub async fn initiate_collection(
        &self,
        request: CollectionRequest,
    ) -> Result<CollectionOutcome, PspServiceError> {
        request.validate()?;
        let name = self.registry.select_for_network(&request.network);
        let provider = self.registry.resolve(&name);
        let snapshot = serde_json::to_value(&request).unwrap_or_default();

        self.audit(
            &request.reference,
            OP_INITIATE_COLLECTION,
            &name,
            LogDirection::Request,
            snapshot.clone(),
            "sent",
        )
        .await;

        let reference = request.reference.clone();
        match provider.initiate_collection(request).await {
            Ok(response) => {
                self.audit(
                    &reference,
                    OP_INITIATE_COLLECTION,
                    &name,
                    LogDirection::Response,
                    response.raw_response.clone(),
                    "success",
                )
                .await;
                info!(
                    provider = %name,
                    provider_transaction_id = %response.provider_transaction_id,
                    "collection initiated"
                );
                Ok(CollectionOutcome {
                    provider: name,
                    request_snapshot: snapshot,
                    response,
                })
            }
            Err(e) => {
                self.audit_error(&reference, OP_INITIATE_COLLECTION, &name, &e)
                    .await;
                warn!(provider = %name, error = %e, "collection initiation failed");
                Err(e.into())
            }
        }
    }

    /// Polls the provider that took the collection, or the default provider
    /// when the record does not name one. A provider that is not registered
    /// gives no verdict rather than a stand-in's answer.
    #[instrument(skip(self))]
    pub async fn check_collection_status(
        &self,
        correlation_id: &str,
        psp_name: Option<&str>,
        provider_transaction_id: &str,
    ) -> Result<CollectionStatus, PspServiceError> {
        let name = match psp_name {
            Some(n) => ProviderName::from_str(n)
                .map_err(|_| PspServiceError::ProviderNotRegistered(n.to_string()))?,
            None => self.registry.default_provider().clone(),
        };
        let provider = self
            .registry
            .lookup(&name)
            .ok_or_else(|| PspServiceError::ProviderNotRegistered(name.to_string()))?;

        self.audit(
            correlation_id,
            OP_CHECK_COLLECTION_STATUS,
            &name,
            LogDirection::Request,
            json!({ "provider_transaction_id": provider_transaction_id }),
            "sent",
        )
        .await;

        match provider.check_collection_status(provider_transaction_id).await {
            Ok(status) => {
                self.audit(
                    correlation_id,
                    OP_CHECK_COLLECTION_STATUS,
                    &name,
                    LogDirection::Response,
                    json!({ "status": status.as_str() }),
                    "success",
                )
                .await;
                Ok(status)
            }
            Err(e) => {
                self.audit_error(correlation_id, OP_CHECK_COLLECTION_STATUS, &name, &e)
                    .await;
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self, instruction), fields(reference = %instruction.reference))]
    pub async fn initiate_delivery(
        &self,
        instruction: DeliveryInstruction,
    ) -> Result<DeliveryOutcome, PspServiceError> {
        match instruction.recipient_type {
            RecipientType::MobileMoney => self.deliver_mobile_money(instruction).await,
            RecipientType::PlatformWallet => {
                let recipient = Uuid::parse_str(instruction.account.trim()).map_err(|_| {
                    PspServiceError::InvalidDelivery(format!(
                        "platform wallet account '{}' is not a user id",
                        instruction.account
                    ))
                })?;
                let balance = self
                    .ledger
                    .credit_wallet(recipient, &instruction.amount, &instruction.currency)
                    .await?;
                info!(recipient = %recipient, amount = %instruction.amount, "platform wallet credited");
                Ok(DeliveryOutcome::WalletCredited { balance })
            }
            RecipientType::CryptoWallet | RecipientType::StellarWallet => {
                info!(
                    recipient_type = instruction.recipient_type.as_str(),
                    account = %instruction.account,
                    amount = %instruction.amount,
                    "on-chain delivery recorded, no transfer submitted"
                );
                Ok(DeliveryOutcome::Logged)
            }
        }
    }

    async fn deliver_mobile_money(
        &self,
        instruction: DeliveryInstruction,
    ) -> Result<DeliveryOutcome, PspServiceError> {
        let network = instruction
            .network
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .map(NetworkCode::parse)
            .ok_or_else(|| {
                PspServiceError::InvalidDelivery("mobile money delivery needs a network".into())
            })?;
        let name = self.registry.select_for_network(&network);
        let provider = self.registry.resolve(&name);
        let request = DeliveryRequest {
            amount: instruction.amount,
            account_number: instruction.account,
            network,
            reference: instruction.reference,
        };

        self.audit(
            &request.reference,
            OP_INITIATE_DELIVERY,
            &name,
            LogDirection::Request,
            serde_json::to_value(&request).unwrap_or_default(),
            "sent",
        )
        .await;

        let reference = request.reference.clone();
        match provider.initiate_delivery(request).await {
            Ok(()) => {
                self.audit(
                    &reference,
                    OP_INITIATE_DELIVERY,
                    &name,
                    LogDirection::Response,
                    json!({ "delivered": true }),
                    "success",
                )
                .await;
                Ok(DeliveryOutcome::Dispatched { provider: name })
            }
            Err(e) => {
                self.audit_error(&reference, OP_INITIATE_DELIVERY, &name, &e)
                    .await;
                Err(e.into())
            }
        }
    }

    /// Sends a 1.00 GHS collection through a named provider.
    pub async fn test_connection(
        &self,
        psp: &str,
    ) -> Result<CollectionResponse, PspServiceError> {
        let name = ProviderName::from_str(psp)?;
        let provider = self
            .registry
            .get(&name)
            .ok_or_else(|| PspServiceError::ProviderNotRegistered(name.to_string()))?;
        let request = CollectionRequest {
            amount: BigDecimal::from(1),
            phone_number: "0244000000".to_string(),
            network: NetworkCode::Mtn,
            reference: format!("TEST_{}", psp),
        };

        self.audit(
            &request.reference,
            OP_TEST_CONNECTION,
            &name,
            LogDirection::Request,
            serde_json::to_value(&request).unwrap_or_default(),
            "sent",
        )
        .await;

        let reference = request.reference.clone();
        match provider.initiate_collection(request).await {
            Ok(response) => {
                self.audit(
                    &reference,
                    OP_TEST_CONNECTION,
                    &name,
                    LogDirection::Response,
                    response.raw_response.clone(),
                    "success",
                )
                .await;
                Ok(response)
            }
            Err(e) => {
                self.audit_error(&reference, OP_TEST_CONNECTION, &name, &e)
                    .await;
                Err(e.into())
            }
        }
    }

    async fn audit_error(
        &self,
        correlation_id: &str,
        operation: &str,
        provider: &ProviderName,
        error: &PaymentError,
    ) {
        self.audit(
            correlation_id,
            operation,
            provider,
            LogDirection::Response,
            json!({ "error": error.to_string(), "retryable": error.is_retryable() }),
            "error",
        )
        .await;
    }

    async fn audit(
        &self,
        correlation_id: &str,
        operation: &str,
        provider: &ProviderName,
        direction: LogDirection,
        payload: JsonValue,
        status: &str,
    ) {
        let entry = NewPspLogEntry {
            correlation_id: correlation_id.to_string(),
            operation: operation.to_string(),
            psp_name: provider.to_string(),
            direction,
            payload,
            status: status.to_string(),
        };
        if let Err(e) = self.audit.append(entry).await {
            warn!(
                error = %e,
                correlation_id = %correlation_id,
                operation = %operation,
                "psp audit write failed"
            );
        }
    }
}
