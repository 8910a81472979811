use crate::payments::error::PaymentError;
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Ogate,
    Mtn,
    Vodafone,
    Demo,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Ogate => "ogate",
            ProviderName::Mtn => "mtn",
            ProviderName::Vodafone => "vodafone",
            ProviderName::Demo => "demo",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "ogate" => Ok(ProviderName::Ogate),
            "mtn" | "mtn-momo" => Ok(ProviderName::Mtn),
            "vodafone" | "telecel" => Ok(ProviderName::Vodafone),
            "demo" => Ok(ProviderName::Demo),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// Mobile network operator a payer or recipient wallet lives on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetworkCode {
    Mtn,
    Vodafone,
    AirtelTigo,
    Other(String),
}

impl NetworkCode {
    pub fn parse(value: &str) -> Self {
        let normalized = value.trim().to_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "MTN" => NetworkCode::Mtn,
            "VODAFONE" | "TELECEL" | "VOD" => NetworkCode::Vodafone,
            "AIRTELTIGO" | "AIRTEL_TIGO" | "AIRTEL" | "TIGO" | "ATM" => NetworkCode::AirtelTigo,
            _ => NetworkCode::Other(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NetworkCode::Mtn => "MTN",
            NetworkCode::Vodafone => "VODAFONE",
            NetworkCode::AirtelTigo => "AIRTELTIGO",
            NetworkCode::Other(code) => code.as_str(),
        }
    }
}

impl std::fmt::Display for NetworkCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for NetworkCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NetworkCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(NetworkCode::parse(&raw))
    }
}

/// Collection status as reported by a PSP, normalised.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Pending,
    Collected,
    Failed,
}

impl CollectionStatus {
    /// Maps the loose status vocabulary providers use onto the three
    /// states the settlement engine understands. Unknown strings stay pending.
    pub fn from_provider_status(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "collected" | "completed" | "success" | "successful" => CollectionStatus::Collected,
            "failed" | "cancelled" | "canceled" | "error" | "rejected" => CollectionStatus::Failed,
            _ => CollectionStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionStatus::Pending => "pending",
            CollectionStatus::Collected => "collected",
            CollectionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRequest {
    pub amount: BigDecimal,
    pub phone_number: String,
    pub network: NetworkCode,
    pub reference: String,
}

impl CollectionRequest {
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.amount <= BigDecimal::zero() {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }
        // The provider is paid in whole minor units
        if self.amount < BigDecimal::new(1.into(), 2) {
            return Err(PaymentError::ValidationError {
                message: format!("amount {} is below one minor unit", self.amount),
                field: Some("amount".to_string()),
            });
        }
        if self.phone_number.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "phone number is required".to_string(),
                field: Some("phone_number".to_string()),
            });
        }
        if self.reference.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "reference is required".to_string(),
                field: Some("reference".to_string()),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionResponse {
    pub provider: ProviderName,
    pub provider_transaction_id: String,
    pub status: CollectionStatus,
    pub raw_response: JsonValue,
}

/// Payout to a mobile-money account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub amount: BigDecimal,
    pub account_number: String,
    pub network: NetworkCode,
    pub reference: String,
}
