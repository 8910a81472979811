//! Reconciliation sweep
//!
//! Periodically re-derives settlement state from the providers for every
//! record still waiting on its collection, and re-claims distributions whose
//! lease lapsed. Works purely off persisted state, so it converges records
//! left behind by a dead inline poller or a restart.

use crate::database::error::DatabaseError;
use crate::database::store::ScanCursor;
use crate::services::settlement::{Advance, Expiry, SettlementEngine, SettlementError};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Custom error type
// ---------------------------------------------------------------------------

/// Errors that abort a whole cycle. Failures on a single record are logged
/// and counted instead.
#[derive(Debug, thiserror::Error)]
pub enum ReconciliationError {
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<ReconciliationError> for crate::error::AppError {
    fn from(err: ReconciliationError) -> Self {
        match err {
            ReconciliationError::Database(e) => e.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    /// Sleep between cycles
    pub interval: Duration,
    /// Collections older than this with no verdict are failed as timeouts
    pub collection_timeout: Duration,
    /// Records fetched per scan
    pub batch_size: i64,
    /// Records advanced at once within a scan
    pub concurrency: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            collection_timeout: Duration::from_secs(24 * 60 * 60),
            batch_size: 200,
            concurrency: 8,
        }
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.enabled = std::env::var("RECONCILIATION_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(cfg.enabled);
        cfg.interval = Duration::from_secs(
            std::env::var("RECONCILIATION_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.interval.as_secs()),
        );
        cfg.collection_timeout = std::env::var("RECONCILIATION_TIMEOUT_HOURS")
            .ok()
            .and_then(|v| timeout_from_hours(&v))
            .unwrap_or(cfg.collection_timeout);
        cfg.batch_size = std::env::var("RECONCILIATION_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg.concurrency = std::env::var("RECONCILIATION_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(cfg.concurrency);
        cfg
    }

    fn expiry(&self) -> Expiry {
        Expiry::OlderThan(
            chrono::Duration::from_std(self.collection_timeout)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
        )
    }
}

/// Parses an hour count into a timeout the expiry check can represent.
/// Out-of-range values are refused so the caller keeps its default.
fn timeout_from_hours(raw: &str) -> Option<Duration> {
    let secs = raw.trim().parse::<u64>().ok()?.checked_mul(60 * 60)?;
    let timeout = Duration::from_secs(secs);
    chrono::Duration::from_std(timeout).ok()?;
    Some(timeout)
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub transactions_checked: usize,
    pub transactions_advanced: usize,
    pub distributions_retried: usize,
    pub deposits_checked: usize,
    pub deposits_advanced: usize,
    pub errors: usize,
}

#[derive(Default)]
struct Tally {
    advanced: usize,
    errors: usize,
}

impl Tally {
    fn add<S>(mut self, result: Result<Advance<S>, SettlementError>, kind: &str, id: Uuid) -> Self {
        match result {
            Ok(Advance::Moved(_)) => self.advanced += 1,
            Ok(_) => {}
            Err(e) => {
                warn!(record = kind, id = %id, error = %e, "reconciliation of record failed");
                self.errors += 1;
            }
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ReconciliationWorker {
    engine: Arc<SettlementEngine>,
    config: ReconciliationConfig,
}

impl ReconciliationWorker {
    pub fn new(engine: Arc<SettlementEngine>, config: ReconciliationConfig) -> Self {
        Self { engine, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!("reconciliation worker disabled");
            return;
        }
        info!(
            interval_secs = self.config.interval.as_secs(),
            timeout_secs = self.config.collection_timeout.as_secs(),
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "reconciliation worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.run_cycle().await {
                        Ok(report) if report == CycleReport::default() => {
                            debug!("reconciliation cycle idle")
                        }
                        Ok(report) => info!(report = ?report, "reconciliation cycle finished"),
                        Err(e) => warn!(error = %e, "reconciliation cycle failed"),
                    }
                }
            }
        }

        info!("reconciliation worker stopped");
    }

    /// One full pass: collections, then stalled distributions, then deposits.
    pub async fn run_cycle(&self) -> Result<CycleReport, ReconciliationError> {
        let mut report = CycleReport::default();
        self.reconcile_collections(&mut report).await?;
        self.retry_distributions(&mut report).await?;
        self.reconcile_deposits(&mut report).await?;
        Ok(report)
    }

    /// Pages through every transaction awaiting its collection. A full page
    /// means there may be more behind it; a short one ends the scan.
    async fn reconcile_collections(
        &self,
        report: &mut CycleReport,
    ) -> Result<(), ReconciliationError> {
        let expiry = self.config.expiry();
        let mut cursor = None;
        loop {
            let page = self
                .engine
                .stores()
                .transactions
                .find_awaiting_collection(cursor, self.config.batch_size)
                .await?;
            let Some(last) = page.last() else { break };
            cursor = Some(ScanCursor::new(last.created_at, last.id));
            let more = page_is_full(page.len(), self.config.batch_size);
            report.transactions_checked += page.len();

            let tally = stream::iter(page.into_iter().map(|tx| tx.id))
                .map(|id| async move { (id, self.engine.advance_transaction(id, expiry).await) })
                .buffer_unordered(self.config.concurrency)
                .fold(Tally::default(), |tally, (id, result)| async move {
                    tally.add(result, "transaction", id)
                })
                .await;
            report.transactions_advanced += tally.advanced;
            report.errors += tally.errors;

            if !more {
                break;
            }
        }
        Ok(())
    }

    async fn retry_distributions(
        &self,
        report: &mut CycleReport,
    ) -> Result<(), ReconciliationError> {
        let stalled = self
            .engine
            .stores()
            .transactions
            .find_stalled_distributions(
                Utc::now(),
                self.engine.config().max_distribution_attempts,
                self.config.batch_size,
            )
            .await?;

        for tx in stalled {
            let claimed = match self.engine.claim_distribution(tx.id).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => continue,
                Err(e) => {
                    warn!(transaction_id = %tx.id, error = %e, "distribution claim failed");
                    report.errors += 1;
                    continue;
                }
            };
            report.distributions_retried += 1;
            if let Err(e) = self.engine.distribute(claimed).await {
                warn!(transaction_id = %tx.id, error = %e, "distribution retry failed");
                report.errors += 1;
            }
        }
        Ok(())
    }

    async fn reconcile_deposits(
        &self,
        report: &mut CycleReport,
    ) -> Result<(), ReconciliationError> {
        let expiry = self.config.expiry();
        let mut cursor = None;
        loop {
            let page = self
                .engine
                .stores()
                .deposits
                .find_awaiting_collection_deposits(cursor, self.config.batch_size)
                .await?;
            let Some(last) = page.last() else { break };
            cursor = Some(ScanCursor::new(last.created_at, last.id));
            let more = page_is_full(page.len(), self.config.batch_size);
            report.deposits_checked += page.len();

            let tally = stream::iter(page.into_iter().map(|deposit| deposit.id))
                .map(|id| async move { (id, self.engine.advance_deposit(id, expiry).await) })
                .buffer_unordered(self.config.concurrency)
                .fold(Tally::default(), |tally, (id, result)| async move {
                    tally.add(result, "deposit", id)
                })
                .await;
            report.deposits_advanced += tally.advanced;
            report.errors += tally.errors;

            if !more {
                break;
            }
        }
        Ok(())
    }
}

fn page_is_full(len: usize, batch_size: i64) -> bool {
    i64::try_from(len).map_or(false, |len| len >= batch_size)
}
