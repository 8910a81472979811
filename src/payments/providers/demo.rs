use crate::payments::error::PaymentResult;
use crate::payments::provider::PspProvider;
use crate::payments::types::{
    CollectionRequest, CollectionResponse, CollectionStatus, DeliveryRequest, ProviderName,
};
use crate::payments::utils::unix_suffix;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// No-op provider for development and as the last selection fallback.
pub struct DemoProvider {
    label: String,
}

impl DemoProvider {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("DEMO_PSP_NAME")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "demo".to_string()),
        )
    }
}

impl Default for DemoProvider {
    fn default() -> Self {
        Self::new("demo")
    }
}

#[async_trait]
impl PspProvider for DemoProvider {
    async fn initiate_collection(
        &self,
        request: CollectionRequest,
    ) -> PaymentResult<CollectionResponse> {
        request.validate()?;
        let provider_transaction_id = format!("{}_{}", self.label, unix_suffix());
        info!(
            reference = %request.reference,
            amount = %request.amount,
            provider_transaction_id = %provider_transaction_id,
            "demo collection accepted"
        );
        Ok(CollectionResponse {
            provider: ProviderName::Demo,
            raw_response: json!({
                "id": provider_transaction_id,
                "status": "collected",
                "psp": self.label,
            }),
            provider_transaction_id,
            status: CollectionStatus::Collected,
        })
    }

    async fn check_collection_status(
        &self,
        _provider_transaction_id: &str,
    ) -> PaymentResult<CollectionStatus> {
        Ok(CollectionStatus::Collected)
    }

    async fn initiate_delivery(&self, request: DeliveryRequest) -> PaymentResult<()> {
        info!(
            reference = %request.reference,
            account = %request.account_number,
            network = %request.network,
            amount = %request.amount,
            "demo delivery logged"
        );
        Ok(())
    }

    fn name(&self) -> ProviderName {
        ProviderName::Demo
    }
}
