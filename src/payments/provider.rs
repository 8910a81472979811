use crate::payments::error::PaymentResult;
use crate::payments::types::{
    CollectionRequest, CollectionResponse, CollectionStatus, DeliveryRequest, ProviderName,
};
use async_trait::async_trait;

/// A mobile-money PSP able to pull funds from a payer and push funds to a
/// recipient. Provider choice lives in the registry, never in implementations.
#[async_trait]
pub trait PspProvider: Send + Sync {
    /// Requests a debit from the payer's wallet. Implementations must treat
    /// `request.reference` as the idempotency key.
    async fn initiate_collection(
        &self,
        request: CollectionRequest,
    ) -> PaymentResult<CollectionResponse>;

    async fn check_collection_status(
        &self,
        provider_transaction_id: &str,
    ) -> PaymentResult<CollectionStatus>;

    async fn initiate_delivery(&self, request: DeliveryRequest) -> PaymentResult<()>;

    fn name(&self) -> ProviderName;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::NetworkCode;
    use bigdecimal::BigDecimal;

    struct MockProvider;

    #[async_trait]
    impl PspProvider for MockProvider {
        async fn initiate_collection(
            &self,
            request: CollectionRequest,
        ) -> PaymentResult<CollectionResponse> {
            Ok(CollectionResponse {
                provider: ProviderName::Demo,
                provider_transaction_id: format!("mock_{}", request.reference),
                status: CollectionStatus::Pending,
                raw_response: serde_json::json!({}),
            })
        }

        async fn check_collection_status(
            &self,
            _provider_transaction_id: &str,
        ) -> PaymentResult<CollectionStatus> {
            Ok(CollectionStatus::Collected)
        }

        async fn initiate_delivery(&self, _request: DeliveryRequest) -> PaymentResult<()> {
            Ok(())
        }

        fn name(&self) -> ProviderName {
            ProviderName::Demo
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_provider() {
        let provider: Box<dyn PspProvider> = Box::new(MockProvider);
        let response = provider
            .initiate_collection(CollectionRequest {
                amount: BigDecimal::from(100),
                phone_number: "0244000000".to_string(),
                network: NetworkCode::Mtn,
                reference: "txn_1".to_string(),
            })
            .await
            .expect("collection should succeed");
        assert_eq!(response.provider_transaction_id, "mock_txn_1");

        let status = provider
            .check_collection_status(&response.provider_transaction_id)
            .await
            .expect("status check should succeed");
        assert_eq!(status, CollectionStatus::Collected);
    }
}
