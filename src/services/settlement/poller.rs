//! Inline collection poller, one detached task per mobile-money send.
//!
//! The poller holds no state between wakes; every attempt re-reads the
//! record. If the process dies mid-schedule the reconciliation sweep picks
//! the transaction up from storage.

use super::policy::{poll_delay, Expiry};
use super::SettlementEngine;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

impl SettlementEngine {
    pub fn spawn_poller(self: &Arc<Self>, id: Uuid) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.poll_collection(id).await })
    }

    /// Attempts `1..=poll_max_attempts`, sleeping `attempt * base` before
    /// each. The last attempt times the collection out if it is still pending.
    pub async fn poll_collection(&self, id: Uuid) {
        let attempts = self.config.poll_max_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(poll_delay(attempt, self.config.poll_base_delay)).await;

            let expiry = if attempt == attempts {
                Expiry::Immediate
            } else {
                Expiry::Never
            };
            match self.advance_transaction(id, expiry).await {
                Ok(advance) if advance.keeps_polling() => {
                    debug!(transaction_id = %id, attempt, "collection still pending")
                }
                Ok(advance) => {
                    info!(transaction_id = %id, attempt, outcome = ?advance, "poller finished");
                    return;
                }
                // counts against the budget like a pending answer
                Err(e) => warn!(transaction_id = %id, attempt, error = %e, "poll attempt failed"),
            }
        }
    }
}
