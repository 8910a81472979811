use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::ProviderName;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Timeout and retry budget of the HTTP-backed providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpRetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for HttpRetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
        }
    }
}

impl HttpRetryPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: std::env::var("PSP_HTTP_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: std::env::var("PSP_HTTP_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
        }
    }

    /// Longest one provider call can run: every attempt hits the timeout and
    /// each retry first sleeps its backoff.
    pub fn worst_case(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let backoff_secs = (0..self.max_retries)
            .map(backoff_secs)
            .fold(0u64, u64::saturating_add);
        self.timeout
            .saturating_mul(attempts)
            .saturating_add(Duration::from_secs(backoff_secs))
    }
}

fn backoff_secs(attempt: u32) -> u64 {
    1u64.checked_shl(attempt).unwrap_or(u64::MAX)
}

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: ProviderName,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(provider: ProviderName, policy: HttpRetryPolicy) -> PaymentResult<Self> {
        let HttpRetryPolicy {
            timeout,
            max_retries,
        } = policy;
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            provider,
            timeout,
            max_retries,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&JsonValue>,
        headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            for (k, v) in headers {
                request = request.header(*k, *v);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request
                .send()
                .await
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("{} request failed: {}", self.provider, e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            PaymentError::ProviderError {
                                provider: self.provider.to_string(),
                                message: format!("invalid provider JSON response: {}", e),
                                provider_code: None,
                                retryable: false,
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_secs(backoff_secs(attempt))).await;
                            continue;
                        }
                        return Err(PaymentError::RateLimitError {
                            message: format!("{} rate limit exceeded", self.provider),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            provider = %self.provider,
                            status = %status,
                            attempt = attempt + 1,
                            "provider server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(backoff_secs(attempt))).await;
                        continue;
                    }

                    if status.as_u16() == 402 || status.as_u16() == 422 {
                        return Err(PaymentError::PaymentDeclinedError {
                            message: text,
                            provider_code: Some(status.as_u16().to_string()),
                        });
                    }

                    return Err(PaymentError::ProviderError {
                        provider: self.provider.to_string(),
                        message: format!("HTTP {}: {}", status, text),
                        provider_code: Some(status.as_u16().to_string()),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(backoff_secs(attempt))).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(PaymentError::NetworkError {
            message: format!("{} request failed", self.provider),
        }))
    }
}

/// Unix-seconds suffix used by the stub providers for transaction ids.
pub fn unix_suffix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Converts a major-unit amount into integer minor units (pesewas, cents),
/// rounding sub-minor fractions half to even. Amounts that do not fit a
/// non-negative `i64` are refused rather than sent as something else.
pub fn to_minor_units(amount: &bigdecimal::BigDecimal) -> PaymentResult<i64> {
    use bigdecimal::ToPrimitive;

    (amount * bigdecimal::BigDecimal::from(100))
        .round(0)
        .to_i64()
        .filter(|minor| *minor >= 0)
        .ok_or_else(|| PaymentError::ValidationError {
            message: format!("amount {} cannot be expressed in minor units", amount),
            field: Some("amount".to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    #[test]
    fn worst_case_covers_every_attempt_and_backoff() {
        let policy = HttpRetryPolicy::default();
        assert_eq!(policy.worst_case(), Duration::from_secs(30 * 3 + 1 + 2));

        let single = HttpRetryPolicy {
            timeout: Duration::from_secs(10),
            max_retries: 0,
        };
        assert_eq!(single.worst_case(), Duration::from_secs(10));
    }

    #[test]
    fn minor_units_scale_by_one_hundred() {
        let minor = |v: &str| to_minor_units(&BigDecimal::from_str(v).expect("decimal")).unwrap();
        assert_eq!(minor("12.34"), 1234);
        assert_eq!(minor("5"), 500);
        assert_eq!(minor("0.40"), 40);
        assert_eq!(minor("112.50"), 11250);
        assert_eq!(minor("100.75"), 10075);
        assert_eq!(minor("0.005"), 0);
        assert_eq!(minor("0.015"), 2);
    }

    #[test]
    fn unrepresentable_amounts_are_refused() {
        let huge = BigDecimal::from_str("1e30").expect("decimal");
        assert!(matches!(
            to_minor_units(&huge),
            Err(PaymentError::ValidationError { .. })
        ));
        let negative = BigDecimal::from_str("-1").expect("decimal");
        assert!(to_minor_units(&negative).is_err());
    }

    #[test]
    fn client_builds_with_provider_label() {
        let client = PaymentHttpClient::new(
            ProviderName::Ogate,
            HttpRetryPolicy {
                timeout: Duration::from_secs(5),
                max_retries: 1,
            },
        );
        assert!(client.is_ok());
    }
}
