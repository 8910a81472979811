//! Shared fixtures: a scripted PSP and an engine over the in-memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use healthy_pay_settlement::database::memory::InMemoryStore;
use healthy_pay_settlement::database::payment_method_repository::PaymentMethodKind;
use healthy_pay_settlement::database::store::{LedgerStore, Stores};
use healthy_pay_settlement::database::transaction_repository::Transaction;
use healthy_pay_settlement::payments::error::{PaymentError, PaymentResult};
use healthy_pay_settlement::payments::factory::PspRegistry;
use healthy_pay_settlement::payments::provider::PspProvider;
use healthy_pay_settlement::payments::types::{
    CollectionRequest, CollectionResponse, CollectionStatus, DeliveryRequest, ProviderName,
};
use healthy_pay_settlement::services::exchange_rate::ExchangeRateService;
use healthy_pay_settlement::services::settlement::state::derive_status;
use healthy_pay_settlement::services::{PspService, SettlementConfig, SettlementEngine};
use healthy_pay_settlement::workers::reconciliation::{ReconciliationConfig, ReconciliationWorker};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Provider whose answers are set by the test. Status answers are served in
/// order; the last one repeats.
pub struct ScriptedProvider {
    name: ProviderName,
    statuses: Mutex<VecDeque<CollectionStatus>>,
    answers: Mutex<HashMap<String, CollectionStatus>>,
    fail_initiate: AtomicBool,
    failing_deliveries: AtomicUsize,
    delivery_delay: Mutex<Duration>,
    pub status_checks: AtomicUsize,
    pub collections: Mutex<Vec<CollectionRequest>>,
    pub deliveries: Mutex<Vec<DeliveryRequest>>,
}

impl ScriptedProvider {
    pub fn new(name: ProviderName) -> Self {
        Self {
            name,
            statuses: Mutex::new(VecDeque::from([CollectionStatus::Pending])),
            answers: Mutex::new(HashMap::new()),
            fail_initiate: AtomicBool::new(false),
            failing_deliveries: AtomicUsize::new(0),
            delivery_delay: Mutex::new(Duration::ZERO),
            status_checks: AtomicUsize::new(0),
            collections: Mutex::new(Vec::new()),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, statuses: &[CollectionStatus]) {
        *self.statuses.lock().unwrap() = statuses.iter().copied().collect();
    }

    /// Pins the answer for one provider reference, ahead of the script.
    pub fn answer(&self, provider_transaction_id: &str, status: CollectionStatus) {
        self.answers
            .lock()
            .unwrap()
            .insert(provider_transaction_id.to_string(), status);
    }

    pub fn fail_initiate(&self) {
        self.fail_initiate.store(true, Ordering::SeqCst);
    }

    /// The next `n` deliveries fail.
    pub fn fail_deliveries(&self, n: usize) {
        self.failing_deliveries.store(n, Ordering::SeqCst);
    }

    /// Every delivery call takes `delay` before answering.
    pub fn slow_deliveries(&self, delay: Duration) {
        *self.delivery_delay.lock().unwrap() = delay;
    }

    pub fn checks(&self) -> usize {
        self.status_checks.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<DeliveryRequest> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl PspProvider for ScriptedProvider {
    async fn initiate_collection(
        &self,
        request: CollectionRequest,
    ) -> PaymentResult<CollectionResponse> {
        if self.fail_initiate.load(Ordering::SeqCst) {
            return Err(PaymentError::PaymentDeclinedError {
                message: "payer wallet locked".to_string(),
                provider_code: Some("LOCKED".to_string()),
            });
        }
        let id = format!("{}_{}", self.name, request.reference);
        self.collections.lock().unwrap().push(request);
        Ok(CollectionResponse {
            provider: self.name.clone(),
            provider_transaction_id: id.clone(),
            status: CollectionStatus::Pending,
            raw_response: serde_json::json!({ "id": id, "status": "PENDING" }),
        })
    }

    async fn check_collection_status(
        &self,
        provider_transaction_id: &str,
    ) -> PaymentResult<CollectionStatus> {
        self.status_checks.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.answers.lock().unwrap().get(provider_transaction_id) {
            return Ok(*status);
        }
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().copied()
        };
        Ok(status.unwrap_or(CollectionStatus::Pending))
    }

    async fn initiate_delivery(&self, request: DeliveryRequest) -> PaymentResult<()> {
        let delay = *self.delivery_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self.failing_deliveries.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_deliveries.store(failing - 1, Ordering::SeqCst);
            return Err(PaymentError::NetworkError {
                message: "disbursement endpoint unreachable".to_string(),
            });
        }
        self.deliveries.lock().unwrap().push(request);
        Ok(())
    }

    fn name(&self) -> ProviderName {
        self.name.clone()
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<ScriptedProvider>,
    pub psp: Arc<PspService>,
    pub engine: Arc<SettlementEngine>,
}

/// Engine with no poll delay and the inline poller off unless asked for.
pub fn fast_config() -> SettlementConfig {
    SettlementConfig {
        poll_max_attempts: 10,
        poll_base_delay: Duration::ZERO,
        inline_poller_enabled: false,
        distribution_lease: Duration::from_secs(120),
        max_distribution_attempts: 5,
    }
}

pub fn harness() -> Harness {
    harness_with(fast_config())
}

pub fn harness_with(config: SettlementConfig) -> Harness {
    harness_on(ProviderName::Ogate, ProviderName::Ogate, config)
}

/// The scripted provider is registered as `provider`; `default` may name a
/// provider that is not registered at all.
pub fn harness_on(provider: ProviderName, default: ProviderName, config: SettlementConfig) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new(provider));
    let registry = PspRegistry::new(default).with_provider(provider.clone());
    let stores = Stores::in_memory(store.clone());
    let psp = Arc::new(PspService::new(
        Arc::new(registry),
        stores.audit.clone(),
        stores.ledger.clone(),
    ));
    let engine = Arc::new(SettlementEngine::new(
        stores,
        psp.clone(),
        ExchangeRateService::new(),
        config,
    ));
    Harness {
        store,
        provider,
        psp,
        engine,
    }
}

impl Harness {
    pub fn worker(&self) -> ReconciliationWorker {
        ReconciliationWorker::new(
            self.engine.clone(),
            ReconciliationConfig {
                interval: Duration::from_millis(10),
                ..ReconciliationConfig::default()
            },
        )
    }

    pub async fn fund_wallet(&self, user_id: Uuid, amount: &str) {
        self.store
            .credit_wallet(user_id, &dec(amount), "GHS")
            .await
            .unwrap();
    }

    pub async fn balance(&self, user_id: Uuid) -> BigDecimal {
        self.engine.ledger().wallet_balance(user_id).await.unwrap()
    }

    pub fn mobile_money_method(&self, user_id: Uuid) -> String {
        self.store
            .add_payment_method(
                user_id,
                PaymentMethodKind::MobileMoney,
                Some("0244123456"),
                Some("MTN"),
            )
            .id
            .to_string()
    }

    pub async fn transaction(&self, id: Uuid) -> Transaction {
        self.engine
            .stores()
            .transactions
            .find_transaction(id)
            .await
            .unwrap()
            .unwrap()
    }
}

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

/// The stored overall status must always be the one the stages imply.
pub fn assert_status_consistent(tx: &Transaction) {
    let stages = tx.stages();
    assert_eq!(
        tx.status(),
        derive_status(stages.collection, stages.investment, stages.delivery),
        "stored status {} disagrees with stages {:?}",
        tx.status,
        stages
    );
}
