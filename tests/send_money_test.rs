//! Send-money flows against the in-memory store and a scripted provider.

mod common;

use common::{assert_status_consistent, dec, fast_config, harness, harness_with};
use healthy_pay_settlement::payments::types::CollectionStatus;
use healthy_pay_settlement::services::settlement::state::TransactionStatus;
use healthy_pay_settlement::services::settlement::{Advance, Expiry, SendMoneyRequest};
use healthy_pay_settlement::services::SettlementError;
use healthy_pay_settlement::workers::reconciliation::CycleReport;
use std::time::Duration;
use uuid::Uuid;

fn send_request(payment_method_id: &str) -> SendMoneyRequest {
    SendMoneyRequest {
        amount: dec("100"),
        currency: Some("GHS".to_string()),
        recipient_name: "Ama Mensah".to_string(),
        recipient_account: "0201234567".to_string(),
        recipient_type: "mobile_money".to_string(),
        network: Some("MTN".to_string()),
        payment_method_id: payment_method_id.to_string(),
        investment_percentage: Some(dec("20")),
        donation_choice: Some("profit".to_string()),
    }
}

#[tokio::test]
async fn wallet_send_debits_total_and_distributes() {
    let h = harness();
    let user = Uuid::new_v4();
    h.fund_wallet(user, "150").await;

    let tx = h
        .engine
        .send_money(user, send_request("wallet_balance"))
        .await
        .unwrap();

    assert_eq!(tx.status(), TransactionStatus::Completed);
    assert_eq!(tx.total_amount, dec("120"));
    assert_eq!(tx.investment_amount, dec("20"));
    assert_eq!(h.balance(user).await, dec("30"));
    assert_status_consistent(&tx);

    let investments = h.store.investments();
    assert_eq!(investments.len(), 1);
    assert_eq!(investments[0].amount, dec("20"));
    assert_eq!(investments[0].source_id, tx.id);
    assert_eq!(investments[0].currency, "GHS");
    assert_eq!(investments[0].rate_to_usd, 12.5);

    let donations = h.store.donations();
    assert_eq!(donations.len(), 1);
    assert_eq!(donations[0].amount, dec("20"));

    let delivered = h.provider.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].amount, dec("100"));

    let recipients = h.store.recipients();
    assert_eq!(recipients.len(), 1);
    assert_eq!(recipients[0].account, "0201234567");
}

#[tokio::test]
async fn wallet_send_refuses_overdraft() {
    let h = harness();
    let user = Uuid::new_v4();
    h.fund_wallet(user, "119.99").await;

    let err = h
        .engine
        .send_money(user, send_request("wallet_balance"))
        .await
        .unwrap_err();

    assert!(matches!(err, SettlementError::InsufficientBalance { .. }));
    assert_eq!(h.balance(user).await, dec("119.99"));
    assert!(h.engine.list_transactions(user).await.unwrap().is_empty());
}

#[tokio::test]
async fn initiation_error_fails_without_ledger_effect() {
    let h = harness_with(fast_config());
    h.provider.fail_initiate();
    let user = Uuid::new_v4();
    let method = h.mobile_money_method(user);

    let err = h
        .engine
        .send_money(user, send_request(&method))
        .await
        .unwrap_err();

    let SettlementError::CollectionInitiation { reference, .. } = err else {
        panic!("expected a collection initiation error, got {err:?}");
    };
    let tx = h.transaction(reference).await;
    assert_eq!(tx.status(), TransactionStatus::Failed);
    assert_eq!(tx.collection_status, "failed");
    assert_status_consistent(&tx);

    assert_eq!(h.provider.checks(), 0);
    assert!(h.store.investments().is_empty());
    assert!(h.store.donations().is_empty());
    assert!(h.provider.delivered().is_empty());
    assert_eq!(h.balance(user).await, dec("0"));
}

#[tokio::test]
async fn mobile_money_send_collects_total_and_waits() {
    let h = harness();
    let user = Uuid::new_v4();
    let method = h.mobile_money_method(user);

    let tx = h.engine.send_money(user, send_request(&method)).await.unwrap();

    assert_eq!(tx.status(), TransactionStatus::CollectionPending);
    assert_eq!(tx.psp_name.as_deref(), Some("ogate"));
    assert_eq!(tx.psp_transaction_id, Some(format!("ogate_{}", tx.id)));
    let collections = h.provider.collections.lock().unwrap().clone();
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0].amount, dec("120"));
    assert_eq!(collections[0].reference, tx.id.to_string());
}

#[tokio::test]
async fn inline_poller_completes_after_pending_answers() {
    let h = harness();
    h.provider.script(&[
        CollectionStatus::Pending,
        CollectionStatus::Pending,
        CollectionStatus::Collected,
    ]);
    let user = Uuid::new_v4();
    let method = h.mobile_money_method(user);

    let tx = h.engine.send_money(user, send_request(&method)).await.unwrap();
    h.engine.poll_collection(tx.id).await;

    let tx = h.transaction(tx.id).await;
    assert_eq!(tx.status(), TransactionStatus::Completed);
    assert_status_consistent(&tx);
    assert_eq!(h.store.investments().len(), 1);
    assert_eq!(h.provider.delivered().len(), 1);
}

#[tokio::test]
async fn poller_times_out_when_budget_runs_out() {
    let mut config = fast_config();
    config.poll_max_attempts = 3;
    let h = harness_with(config);
    let user = Uuid::new_v4();
    let method = h.mobile_money_method(user);

    let tx = h.engine.send_money(user, send_request(&method)).await.unwrap();
    h.engine.poll_collection(tx.id).await;

    let tx = h.transaction(tx.id).await;
    assert_eq!(tx.status(), TransactionStatus::Failed);
    assert_eq!(tx.collection_status, "timeout");
    assert_eq!(tx.failure_reason.as_deref(), Some("collection_timeout"));
    assert_eq!(h.provider.checks(), 3);
    assert!(h.store.investments().is_empty());
}

#[tokio::test]
async fn provider_failure_marks_transaction_failed() {
    let h = harness();
    h.provider.script(&[CollectionStatus::Failed]);
    let user = Uuid::new_v4();
    let method = h.mobile_money_method(user);

    let tx = h.engine.send_money(user, send_request(&method)).await.unwrap();
    let advance = h.engine.advance_transaction(tx.id, Expiry::Never).await.unwrap();

    assert_eq!(advance, Advance::Moved(TransactionStatus::Failed));
    let tx = h.transaction(tx.id).await;
    assert_eq!(tx.failure_reason.as_deref(), Some("psp_reported_failure"));
    assert!(h.provider.delivered().is_empty());

    // terminal records are left alone
    let again = h.engine.advance_transaction(tx.id, Expiry::Immediate).await.unwrap();
    assert_eq!(again, Advance::Decided(TransactionStatus::Failed));
}

#[tokio::test]
async fn failed_delivery_stays_distributing_until_sweep_retries() {
    let h = harness();
    h.provider.fail_deliveries(1);
    h.provider.script(&[CollectionStatus::Collected]);
    let user = Uuid::new_v4();
    let method = h.mobile_money_method(user);

    let tx = h.engine.send_money(user, send_request(&method)).await.unwrap();
    let advance = h.engine.advance_transaction(tx.id, Expiry::Never).await.unwrap();
    assert_eq!(
        advance,
        Advance::Moved(TransactionStatus::ProcessingDistribution)
    );

    let stuck = h.transaction(tx.id).await;
    assert_eq!(stuck.investment_status, "allocated");
    assert_eq!(stuck.delivery_status, "failed");
    assert_eq!(stuck.failure_reason.as_deref(), Some("distribution_incomplete"));
    assert!(stuck.distribution_lease_until.is_none());
    assert_status_consistent(&stuck);

    let report = h.worker().run_cycle().await.unwrap();
    assert_eq!(report.distributions_retried, 1);

    let done = h.transaction(tx.id).await;
    assert_eq!(done.status(), TransactionStatus::Completed);
    assert_eq!(done.distribution_attempts, 2);
    assert!(done.failure_reason.is_none());
    assert_status_consistent(&done);
    // the retry only redid delivery
    assert_eq!(h.store.investments().len(), 1);
    assert_eq!(h.store.donations().len(), 1);
    assert_eq!(h.provider.delivered().len(), 1);

    let idle = h.worker().run_cycle().await.unwrap();
    assert_eq!(idle, CycleReport::default());
}

#[tokio::test]
async fn distribution_gives_up_after_attempt_budget() {
    let mut config = fast_config();
    config.max_distribution_attempts = 2;
    let h = harness_with(config);
    h.provider.fail_deliveries(10);
    h.provider.script(&[CollectionStatus::Collected]);
    let user = Uuid::new_v4();
    let method = h.mobile_money_method(user);

    let tx = h.engine.send_money(user, send_request(&method)).await.unwrap();
    h.engine.advance_transaction(tx.id, Expiry::Never).await.unwrap();
    h.worker().run_cycle().await.unwrap();
    let report = h.worker().run_cycle().await.unwrap();

    assert_eq!(report.distributions_retried, 0);
    let tx = h.transaction(tx.id).await;
    assert_eq!(tx.status(), TransactionStatus::ProcessingDistribution);
    assert_eq!(tx.distribution_attempts, 2);
}

#[tokio::test]
async fn concurrent_checks_distribute_once() {
    let h = harness();
    h.provider.script(&[CollectionStatus::Collected]);
    let user = Uuid::new_v4();
    let method = h.mobile_money_method(user);
    let tx = h.engine.send_money(user, send_request(&method)).await.unwrap();

    let racers: Vec<_> = (0..8)
        .map(|_| {
            let engine = h.engine.clone();
            let id = tx.id;
            tokio::spawn(async move { engine.advance_transaction(id, Expiry::Never).await })
        })
        .collect();
    let mut moved = 0;
    for racer in racers {
        if let Advance::Moved(_) = racer.await.unwrap().unwrap() {
            moved += 1;
        }
    }
    h.worker().run_cycle().await.unwrap();

    assert_eq!(moved, 1);
    let tx = h.transaction(tx.id).await;
    assert_eq!(tx.status(), TransactionStatus::Completed);
    assert_eq!(h.store.investments().len(), 1);
    assert_eq!(h.store.donations().len(), 1);
    assert_eq!(h.provider.delivered().len(), 1);
}

#[tokio::test]
async fn platform_wallet_delivery_credits_recipient() {
    let h = harness();
    let sender = Uuid::new_v4();
    let recipient = Uuid::new_v4();
    h.fund_wallet(sender, "50").await;

    let request = SendMoneyRequest {
        amount: dec("50"),
        recipient_account: recipient.to_string(),
        recipient_type: "siha_wallet".to_string(),
        network: None,
        investment_percentage: None,
        donation_choice: None,
        ..send_request("wallet_balance")
    };
    let tx = h.engine.send_money(sender, request).await.unwrap();

    assert_eq!(tx.status(), TransactionStatus::Completed);
    assert_eq!(tx.investment_status, "skipped");
    assert_eq!(h.balance(sender).await, dec("0"));
    assert_eq!(h.balance(recipient).await, dec("50"));
    assert!(h.store.investments().is_empty());
}

#[tokio::test]
async fn send_validation_rejects_bad_input() {
    let h = harness();
    let user = Uuid::new_v4();

    let cases = [
        SendMoneyRequest {
            amount: dec("0"),
            ..send_request("wallet_balance")
        },
        SendMoneyRequest {
            investment_percentage: Some(dec("101")),
            ..send_request("wallet_balance")
        },
        SendMoneyRequest {
            network: None,
            ..send_request("wallet_balance")
        },
        SendMoneyRequest {
            recipient_account: "not-a-phone".to_string(),
            ..send_request("wallet_balance")
        },
        SendMoneyRequest {
            donation_choice: Some("everything".to_string()),
            ..send_request("wallet_balance")
        },
        SendMoneyRequest {
            amount: dec("100.004"),
            ..send_request("wallet_balance")
        },
        SendMoneyRequest {
            amount: dec("0.004"),
            ..send_request("wallet_balance")
        },
        SendMoneyRequest {
            investment_percentage: Some(dec("33.333")),
            ..send_request("wallet_balance")
        },
    ];
    for request in cases {
        let err = h.engine.send_money(user, request).await.unwrap_err();
        assert!(matches!(err, SettlementError::Validation { .. }), "{err:?}");
    }

    let err = h
        .engine
        .send_money(
            user,
            SendMoneyRequest {
                currency: Some("EUR".to_string()),
                ..send_request("wallet_balance")
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::UnsupportedCurrency(_)));

    let err = h
        .engine
        .send_money(user, send_request(&Uuid::new_v4().to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::PaymentMethodNotFound(_)));
}

#[tokio::test]
async fn spawned_poller_finishes_in_background() {
    let mut config = fast_config();
    config.inline_poller_enabled = true;
    config.poll_base_delay = Duration::from_millis(1);
    let h = harness_with(config);
    h.provider.script(&[CollectionStatus::Pending, CollectionStatus::Collected]);
    let user = Uuid::new_v4();
    let method = h.mobile_money_method(user);

    let tx = h.engine.send_money(user, send_request(&method)).await.unwrap();

    let mut status = tx.status();
    for _ in 0..200 {
        status = h.transaction(tx.id).await.status();
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(status, TransactionStatus::Completed);
}

#[tokio::test]
async fn failed_donation_is_retried_by_the_sweep() {
    let h = harness();
    h.store.fail_donation_writes(1);
    h.provider.script(&[CollectionStatus::Collected]);
    let user = Uuid::new_v4();
    let method = h.mobile_money_method(user);

    let tx = h.engine.send_money(user, send_request(&method)).await.unwrap();
    h.engine.advance_transaction(tx.id, Expiry::Never).await.unwrap();

    let stuck = h.transaction(tx.id).await;
    assert_eq!(stuck.status(), TransactionStatus::ProcessingDistribution);
    assert_eq!(stuck.investment_status, "failed");
    assert_eq!(stuck.delivery_status, "delivered");
    assert!(h.store.donations().is_empty());
    assert_status_consistent(&stuck);

    let report = h.worker().run_cycle().await.unwrap();
    assert_eq!(report.distributions_retried, 1);

    let done = h.transaction(tx.id).await;
    assert_eq!(done.status(), TransactionStatus::Completed);
    assert_eq!(h.store.investments().len(), 1);
    assert_eq!(h.store.donations().len(), 1);
    assert_eq!(h.store.donations()[0].amount, dec("20"));
    // delivery already landed on the first pass
    assert_eq!(h.provider.delivered().len(), 1);
}

#[tokio::test]
async fn pass_that_lost_its_lease_does_not_persist() {
    let mut config = fast_config();
    config.distribution_lease = Duration::from_millis(40);
    let h = harness_with(config);
    h.provider.slow_deliveries(Duration::from_millis(150));
    h.provider.fail_deliveries(1);
    h.provider.script(&[CollectionStatus::Collected]);
    let user = Uuid::new_v4();
    let method = h.mobile_money_method(user);
    let tx = h.engine.send_money(user, send_request(&method)).await.unwrap();

    let first = {
        let engine = h.engine.clone();
        let id = tx.id;
        tokio::spawn(async move { engine.advance_transaction(id, Expiry::Never).await })
    };
    // let the first pass's lease lapse while its delivery is still running
    tokio::time::sleep(Duration::from_millis(80)).await;
    let second = {
        let worker = h.worker();
        tokio::spawn(async move { worker.run_cycle().await })
    };

    first.await.unwrap().unwrap();
    let mid = h.transaction(tx.id).await;
    assert_eq!(mid.status(), TransactionStatus::ProcessingDistribution);
    assert_eq!(mid.delivery_status, "pending");
    assert!(mid.failure_reason.is_none());
    assert!(mid.distribution_lease_until.is_some());

    let report = second.await.unwrap().unwrap();
    assert_eq!(report.distributions_retried, 1);
    let done = h.transaction(tx.id).await;
    assert_eq!(done.status(), TransactionStatus::Completed);
    assert_eq!(done.distribution_attempts, 2);
    assert!(done.distribution_lease_until.is_none());
    assert_status_consistent(&done);
}

#[tokio::test]
async fn fractional_surcharge_is_rounded_to_pesewas() {
    let h = harness();
    let user = Uuid::new_v4();
    let method = h.mobile_money_method(user);

    let tx = h
        .engine
        .send_money(
            user,
            SendMoneyRequest {
                amount: dec("10.01"),
                investment_percentage: Some(dec("33.33")),
                ..send_request(&method)
            },
        )
        .await
        .unwrap();

    assert_eq!(tx.investment_amount, dec("3.34"));
    assert_eq!(tx.total_amount, dec("13.35"));
    assert_eq!(tx.total_amount, &tx.amount + &tx.investment_amount);
    let collections = h.provider.collections.lock().unwrap().clone();
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0].amount, dec("13.35"));
}
