//! Pure decisions shared by the inline poller, the status endpoints and the
//! reconciliation sweep.

use crate::payments::types::CollectionStatus;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// When a record still waiting on its collection should be given up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Keep waiting regardless of age
    Never,
    /// The retry budget is spent; give up now
    Immediate,
    /// Give up once strictly older than this
    OlderThan(chrono::Duration),
}

impl Expiry {
    pub fn is_due(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::Immediate => true,
            Expiry::OlderThan(limit) => now - created_at > *limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionDecision {
    Collect,
    Fail,
    Timeout,
    Leave,
}

/// `observed` is `None` when the status check itself failed; that counts as
/// no verdict, never as a failure.
pub fn decide_collection(observed: Option<CollectionStatus>, expired: bool) -> CollectionDecision {
    match observed {
        Some(CollectionStatus::Collected) => CollectionDecision::Collect,
        Some(CollectionStatus::Failed) => CollectionDecision::Fail,
        Some(CollectionStatus::Pending) | None if expired => CollectionDecision::Timeout,
        Some(CollectionStatus::Pending) | None => CollectionDecision::Leave,
    }
}

/// Linear schedule: attempt `n` waits `n * base`.
pub fn poll_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(attempt)
}
