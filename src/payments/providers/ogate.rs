use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PspProvider;
use crate::payments::types::{
    CollectionRequest, CollectionResponse, CollectionStatus, DeliveryRequest, NetworkCode,
    ProviderName,
};
use crate::payments::utils::{to_minor_units, HttpRetryPolicy, PaymentHttpClient};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::info;

const DEFAULT_BASE_URL: &str = "https://api.ogate.com";
const CURRENCY: &str = "GHS";

#[derive(Debug, Clone)]
pub struct OgateConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl OgateConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let api_key = std::env::var("OGATE_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "OGATE_API_KEY is required".to_string(),
                field: Some("ogate".to_string()),
            });
        }
        let base_url = std::env::var("OGATE_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let HttpRetryPolicy {
            timeout,
            max_retries,
        } = HttpRetryPolicy::from_env();
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            max_retries,
        })
    }
}

/// Generic mobile-money aggregator covering all Ghanaian networks.
pub struct OgateProvider {
    config: OgateConfig,
    http: PaymentHttpClient,
}

impl OgateProvider {
    pub fn new(config: OgateConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            ProviderName::Ogate,
            HttpRetryPolicy {
                timeout: config.timeout,
                max_retries: config.max_retries,
            },
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(OgateConfig::from_env()?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn headers(&self) -> [(&str, &str); 1] {
        [("Authorization", self.config.api_key.as_str())]
    }
}

/// Ogate's own network identifiers.
pub fn ogate_network_code(network: &NetworkCode) -> &'static str {
    match network {
        NetworkCode::Mtn => "MTN",
        NetworkCode::AirtelTigo => "ATM",
        NetworkCode::Vodafone => "VOD",
        NetworkCode::Other(_) => "MTN",
    }
}

pub fn map_ogate_status(raw: &str) -> CollectionStatus {
    match raw.trim().to_uppercase().as_str() {
        "COMPLETED" => CollectionStatus::Collected,
        "FAILED" => CollectionStatus::Failed,
        _ => CollectionStatus::Pending,
    }
}

/// Collection amounts go out in minor units, the same as disbursements, so
/// the provider collects exactly the recorded total.
pub fn collection_body(request: &CollectionRequest) -> PaymentResult<JsonValue> {
    Ok(json!({
        "amount": to_minor_units(&request.amount)?,
        "reason": format!("Collection with reference {}", request.reference),
        "currency": CURRENCY,
        "network": ogate_network_code(&request.network),
        "accountName": "Customer",
        "accountNumber": request.phone_number,
        "reference": request.reference,
    }))
}

pub fn disbursement_body(request: &DeliveryRequest) -> PaymentResult<JsonValue> {
    Ok(json!({
        "recipients": [{
            "network": ogate_network_code(&request.network),
            "currency": CURRENCY,
            "amount": to_minor_units(&request.amount)?,
            "accountName": "Recipient",
            "accountNumber": request.account_number,
        }],
        "reference": request.reference,
    }))
}

#[async_trait]
impl PspProvider for OgateProvider {
    async fn initiate_collection(
        &self,
        request: CollectionRequest,
    ) -> PaymentResult<CollectionResponse> {
        request.validate()?;
        let body = collection_body(&request)?;
        let response: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.url("/collections/mobilemoney"),
                Some(&body),
                &self.headers(),
            )
            .await?;

        let provider_transaction_id = response
            .get("id")
            .and_then(|v| match v {
                JsonValue::String(s) => Some(s.clone()),
                JsonValue::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PaymentError::ProviderError {
                provider: ProviderName::Ogate.to_string(),
                message: "collection response is missing an id".to_string(),
                provider_code: None,
                retryable: false,
            })?;
        let status = response
            .get("status")
            .and_then(|v| v.as_str())
            .map(map_ogate_status)
            .unwrap_or(CollectionStatus::Pending);

        Ok(CollectionResponse {
            provider: ProviderName::Ogate,
            provider_transaction_id,
            status,
            raw_response: response,
        })
    }

    async fn check_collection_status(
        &self,
        provider_transaction_id: &str,
    ) -> PaymentResult<CollectionStatus> {
        let response: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.url(&format!("/payments/{}", provider_transaction_id)),
                None,
                &self.headers(),
            )
            .await?;

        Ok(response
            .get("status")
            .and_then(|v| v.as_str())
            .map(map_ogate_status)
            .unwrap_or(CollectionStatus::Pending))
    }

    async fn initiate_delivery(&self, request: DeliveryRequest) -> PaymentResult<()> {
        let body = disbursement_body(&request)?;
        let _response: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.url("/disbursements/mobilemoney"),
                Some(&body),
                &self.headers(),
            )
            .await?;
        info!(reference = %request.reference, "ogate disbursement accepted");
        Ok(())
    }

    fn name(&self) -> ProviderName {
        ProviderName::Ogate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    #[test]
    fn network_codes_follow_ogate_vocabulary() {
        assert_eq!(ogate_network_code(&NetworkCode::Mtn), "MTN");
        assert_eq!(ogate_network_code(&NetworkCode::AirtelTigo), "ATM");
        assert_eq!(ogate_network_code(&NetworkCode::Vodafone), "VOD");
        assert_eq!(
            ogate_network_code(&NetworkCode::Other("GLO".to_string())),
            "MTN"
        );
    }

    #[test]
    fn only_completed_and_failed_are_final() {
        assert_eq!(map_ogate_status("COMPLETED"), CollectionStatus::Collected);
        assert_eq!(map_ogate_status("FAILED"), CollectionStatus::Failed);
        assert_eq!(map_ogate_status("INITIATED"), CollectionStatus::Pending);
        assert_eq!(map_ogate_status("PENDING"), CollectionStatus::Pending);
    }

    #[test]
    fn collection_body_uses_minor_units_and_reference_reason() {
        let request = |amount: &str| CollectionRequest {
            amount: BigDecimal::from_str(amount).expect("decimal"),
            phone_number: "0244123456".to_string(),
            network: NetworkCode::Vodafone,
            reference: "tx_1".to_string(),
        };
        for (total, minor) in [("0.40", 40), ("0.60", 60), ("112.50", 11250), ("100.75", 10075)] {
            let body = collection_body(&request(total)).unwrap();
            assert_eq!(body["amount"], json!(minor), "total {}", total);
        }

        let body = collection_body(&request("120")).unwrap();
        assert_eq!(body["amount"], json!(12000));
        assert_eq!(body["network"], json!("VOD"));
        assert_eq!(body["reason"], json!("Collection with reference tx_1"));
        assert_eq!(body["currency"], json!("GHS"));
        assert_eq!(body["accountNumber"], json!("0244123456"));
    }

    #[test]
    fn disbursement_body_sends_minor_units() {
        let body = disbursement_body(&DeliveryRequest {
            amount: BigDecimal::from_str("100.50").expect("decimal"),
            account_number: "0209999999".to_string(),
            network: NetworkCode::AirtelTigo,
            reference: "tx_2".to_string(),
        })
        .unwrap();
        assert_eq!(body["recipients"][0]["amount"], json!(10050));
        assert_eq!(body["recipients"][0]["network"], json!("ATM"));
        assert_eq!(body["reference"], json!("tx_2"));
    }

    #[test]
    fn oversized_collection_is_refused_before_sending() {
        let body = collection_body(&CollectionRequest {
            amount: BigDecimal::from_str("1e30").expect("decimal"),
            phone_number: "0244123456".to_string(),
            network: NetworkCode::Mtn,
            reference: "tx_3".to_string(),
        });
        assert!(body.is_err());
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        std::env::remove_var("OGATE_API_KEY");
        assert!(OgateConfig::from_env().is_err());
    }
}
