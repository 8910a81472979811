//! Exchange Rate Service
//!
//! Fixed table of local-currency-per-USD rates used to annotate investment
//! records. Lookups never fail: an unknown currency yields a 1.0 rate marked
//! as such, so settlement is never blocked on a missing rate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

pub const SOURCE_TABLE: &str = "table";
pub const SOURCE_UNKNOWN: &str = "unknown_currency";

/// Rate captured at the moment an investment is recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub currency: String,
    /// Units of `currency` per USD
    pub rate_to_usd: f64,
    pub source: String,
    pub captured_at: DateTime<Utc>,
}

impl RateSnapshot {
    pub fn is_known(&self) -> bool {
        self.source == SOURCE_TABLE
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeRateService {
    rates: HashMap<String, f64>,
}

impl Default for ExchangeRateService {
    fn default() -> Self {
        Self::with_rates([("GHS", 12.5), ("KES", 150.0), ("ZMW", 25.0), ("USD", 1.0)])
    }
}

impl ExchangeRateService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rates<'a>(rates: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        Self {
            rates: rates
                .into_iter()
                .map(|(currency, rate)| (currency.to_uppercase(), rate))
                .collect(),
        }
    }

    pub fn supports(&self, currency: &str) -> bool {
        self.rates.contains_key(&currency.trim().to_uppercase())
    }

    pub fn snapshot(&self, currency: &str) -> RateSnapshot {
        let currency = currency.trim().to_uppercase();
        let (rate_to_usd, source) = match self.rates.get(&currency) {
            Some(rate) => (*rate, SOURCE_TABLE),
            None => {
                debug!(currency = %currency, "no rate on table, defaulting to 1.0");
                (1.0, SOURCE_UNKNOWN)
            }
        };
        RateSnapshot {
            currency,
            rate_to_usd,
            source: source.to_string(),
            captured_at: Utc::now(),
        }
    }
}
