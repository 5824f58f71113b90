//! Architectural Contract Test: Auto-Renew Money Safety
//!
//! Constraints verified:
//! - A declined or action-requiring charge disables auto-renew, notifies the
//!   customer, and makes zero registry calls
//! - A successful charge followed by a failed renewal leaves exactly one
//!   reconciliation record and is never charged again
//! - A charge with unknown outcome leaves a reference-less record
//! - Only active, auto-renewing domains of the configured mode inside the
//!   lookahead window are charged
//! - Reconciliation records the store refuses are held and retried
//! - Domain writes refused after a charge are held, block re-charging, and
//!   are replayed once the store recovers
//! - Notification failures never undo a renewal
//!
//! If this test fails, customers can be charged without receiving the
//! renewal they paid for, or charged twice for one renewal.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use resell_core::auto_renew::{AutoRenewSettings, AutoRenewWorkflow, HeldUpdate, RenewalOutcome};
use resell_core::lock::DomainLocks;
use resell_core::model::{DomainStatus, RegistryMode, TransactionKind};
use resell_core::traits::notifier::templates;
use resell_core::traits::{ChargeOutcome, ResellStore};
use resell_core::workflow::FailureKind;
use rust_decimal_macros::dec;

struct Harness {
    store: FlakyStore,
    ledger: MockLedger,
    payments: ScriptedPayments,
    notifier: RecordingNotifier,
    workflow: AutoRenewWorkflow,
}

fn harness_with(settings: AutoRenewSettings) -> Harness {
    let store = FlakyStore::new();
    let ledger = MockLedger::new()
        .with_balance(RegistryMode::Test, dec!(1000.00))
        .with_balance(RegistryMode::Production, dec!(1000.00));
    let payments = ScriptedPayments::new();
    let notifier = RecordingNotifier::new();
    let workflow = AutoRenewWorkflow::new(
        Arc::new(store.clone()),
        Arc::new(payments.clone()),
        Arc::new(notifier.clone()),
        orchestrator(&ledger),
        DomainLocks::new(),
        settings,
    );
    Harness {
        store,
        ledger,
        payments,
        notifier,
        workflow,
    }
}

fn harness() -> Harness {
    harness_with(AutoRenewSettings {
        inter_domain_delay: Duration::ZERO,
        ..AutoRenewSettings::default()
    })
}

#[tokio::test]
async fn eligible_domain_is_charged_renewed_and_confirmed() {
    let h = harness();
    let domain = seed_renewable(&h.store, &h.ledger, "example.com", RegistryMode::Test, Some("pm_card"), 10).await;

    let report = h.workflow.run(fixture_time()).await.unwrap();

    assert_eq!(report.eligible, 1);
    assert_eq!(report.renewed, 1);

    let charges = h.payments.charges();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].amount, dec!(15.00), "customer pays renewal retail");
    assert_eq!(charges[0].payment_method_id, "pm_card");
    assert_eq!(h.ledger.call_count("renew"), 1);

    let stored = h.store.get_domain(&domain.key).await.unwrap().unwrap();
    let expected = h.ledger.domain(&domain.key).unwrap().expiration;
    assert_eq!(stored.expiration_date, expected, "expiration taken from the registry receipt");
    assert!(stored.expiration_date > domain.expiration_date);

    let renewals: Vec<_> = h
        .store
        .list_transactions()
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.kind == TransactionKind::Renewal)
        .collect();
    assert_eq!(renewals.len(), 1);
    assert_eq!(renewals[0].amount_charged, Some(dec!(15.00)));
    assert_eq!(renewals[0].registry_cost, dec!(10.00));
    assert_eq!(renewals[0].payment_reference.as_deref(), Some("pi_1"));

    let confirmations = h.notifier.sent_with(templates::RENEWAL_CONFIRMATION);
    assert_eq!(confirmations.len(), 1);
    assert_eq!(confirmations[0].recipient, "owner@example.com");
}

#[tokio::test]
async fn declined_charge_disables_auto_renew_without_registry_calls() {
    let h = harness();
    let domain = seed_renewable(&h.store, &h.ledger, "example.com", RegistryMode::Test, Some("pm_card"), 5).await;
    h.payments.then(ChargeOutcome::Declined {
        reason: "insufficient_funds".to_string(),
    });

    let report = h.workflow.run(fixture_time()).await.unwrap();

    assert_eq!(report.declined, 1);
    assert_eq!(report.results[0].outcome, RenewalOutcome::Declined);
    assert_eq!(report.results[0].workflow.failure_kind(), Some(FailureKind::PaymentDeclined));
    assert!(
        h.ledger.calls().is_empty(),
        "declined charge must not touch the registry: {:?}",
        h.ledger.calls()
    );

    let stored = h.store.get_domain(&domain.key).await.unwrap().unwrap();
    assert!(!stored.auto_renew, "auto-renew must be switched off");
    assert_eq!(h.notifier.sent_with(templates::RENEWAL_FAILED).len(), 1);
    assert!(h.store.list_reconciliations().await.unwrap().is_empty());

    // Nothing left to charge on the next run
    h.workflow.run(fixture_time()).await.unwrap();
    assert_eq!(h.payments.charge_count(), 1);
}

#[tokio::test]
async fn charge_requiring_action_is_treated_like_a_decline() {
    let h = harness();
    let domain = seed_renewable(&h.store, &h.ledger, "example.com", RegistryMode::Test, Some("pm_card"), 5).await;
    h.payments.then(ChargeOutcome::RequiresAction {
        reference: "pi_3ds".to_string(),
    });

    let report = h.workflow.run(fixture_time()).await.unwrap();

    assert_eq!(report.results[0].outcome, RenewalOutcome::RequiresAction);
    assert_eq!(h.ledger.call_count("renew"), 0);
    assert!(!h.store.get_domain(&domain.key).await.unwrap().unwrap().auto_renew);
    assert_eq!(h.notifier.sent_with(templates::RENEWAL_FAILED).len(), 1);
}

#[tokio::test]
async fn registry_failure_after_charge_leaves_one_record_and_no_second_charge() {
    let h = harness();
    let domain = seed_renewable(&h.store, &h.ledger, "example.com", RegistryMode::Test, Some("pm_card"), 5).await;
    h.ledger.behave(|b| b.fail_renew = true);

    let report = h.workflow.run(fixture_time()).await.unwrap();

    assert_eq!(report.reconciliation_required, 1);
    assert_eq!(
        report.results[0].workflow.failure_kind(),
        Some(FailureKind::RegistryActionFailed)
    );

    let records = h.store.list_reconciliations().await.unwrap();
    assert_eq!(records.len(), 1, "exactly one reconciliation record expected");
    let record = &records[0];
    assert_eq!(record.domain, domain.key);
    assert_eq!(record.payment_reference.as_deref(), Some("pi_1"));
    assert_eq!(record.amount_charged, dec!(15.00));
    assert!(record.requires_manual_resolution);
    assert!(record.is_open());

    let stored = h.store.get_domain(&domain.key).await.unwrap().unwrap();
    assert_eq!(stored.expiration_date, domain.expiration_date, "expiration must not move");
    assert!(stored.auto_renew);

    // A later run must not charge the customer again
    h.workflow.run(fixture_time()).await.unwrap();
    assert_eq!(h.payments.charge_count(), 1, "open record must block re-charging");
    assert_eq!(h.store.list_reconciliations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_charge_outcome_records_reconciliation_without_reference() {
    let h = harness();
    let domain = seed_renewable(&h.store, &h.ledger, "example.com", RegistryMode::Test, Some("pm_card"), 5).await;
    h.payments.then_transport_error("connection reset by peer");

    let report = h.workflow.run(fixture_time()).await.unwrap();

    assert_eq!(report.results[0].outcome, RenewalOutcome::ReconciliationRequired);
    assert_eq!(report.results[0].workflow.failure_kind(), Some(FailureKind::PaymentFailed));
    assert!(h.ledger.calls().is_empty(), "registry must not be called");

    let records = h.store.list_reconciliations().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payment_reference, None);
    assert!(h.store.get_domain(&domain.key).await.unwrap().unwrap().auto_renew);
}

#[tokio::test]
async fn ineligible_domains_are_not_charged() {
    let h = harness();
    // Other mode
    seed_renewable(&h.store, &h.ledger, "prod.com", RegistryMode::Production, Some("pm_a"), 5).await;
    // Outside the 30 day window
    seed_renewable(&h.store, &h.ledger, "later.com", RegistryMode::Test, Some("pm_b"), 45).await;
    // Suspended
    let suspended = seed_renewable(&h.store, &h.ledger, "held.com", RegistryMode::Test, Some("pm_c"), 5).await;
    h.store
        .save_domain(&suspended.with_status(DomainStatus::Suspended))
        .await
        .unwrap();
    // Auto-renew off
    let manual = seed_renewable(&h.store, &h.ledger, "manual.com", RegistryMode::Test, Some("pm_d"), 5).await;
    h.store.save_domain(&manual.with_auto_renew(false)).await.unwrap();

    let report = h.workflow.run(fixture_time()).await.unwrap();

    assert_eq!(report.eligible, 0);
    assert_eq!(h.payments.charge_count(), 0);
    assert!(h.ledger.calls().is_empty());
}

#[tokio::test]
async fn missing_payment_method_sends_notice_instead_of_charging() {
    let h = harness();
    seed_renewable(&h.store, &h.ledger, "example.com", RegistryMode::Test, None, 5).await;

    let report = h.workflow.run(fixture_time()).await.unwrap();

    assert_eq!(report.eligible, 0);
    assert_eq!(report.missing_payment_notified, 1);
    assert_eq!(h.payments.charge_count(), 0);
    let notices = h.notifier.sent_with(templates::ADD_PAYMENT_METHOD);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].data["domain"], "example.com");
}

#[tokio::test]
async fn missing_pricing_fails_before_charging() {
    let h = harness();
    let domain = seed_renewable(&h.store, &h.ledger, "example.net", RegistryMode::Test, Some("pm_card"), 5).await;

    let report = h.workflow.run(fixture_time()).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.results[0].domain, domain.key);
    assert_eq!(
        report.results[0].workflow.failure_kind(),
        Some(FailureKind::PricingUnavailable)
    );
    assert_eq!(h.payments.charge_count(), 0);
}

#[tokio::test]
async fn refused_reconciliation_write_is_held_and_retried() {
    let h = harness();
    let domain = seed_renewable(&h.store, &h.ledger, "example.com", RegistryMode::Test, Some("pm_card"), 5).await;
    h.ledger.behave(|b| b.fail_renew = true);
    h.store.fail_reconciliation_writes(true);

    let first = h.workflow.run(fixture_time()).await;
    assert!(first.is_err(), "unpersisted record must fail the run");
    assert_eq!(h.workflow.pending_reconciliations().await.len(), 1);
    assert!(h.store.list_reconciliations().await.unwrap().is_empty());

    // Still failing: held record keeps blocking the domain
    let second = h.workflow.run(fixture_time()).await;
    assert!(second.is_err());
    assert_eq!(h.payments.charge_count(), 1, "held record must block re-charging");

    h.store.fail_reconciliation_writes(false);
    let third = h.workflow.run(fixture_time()).await.unwrap();
    assert_eq!(third.eligible, 0);
    assert!(h.workflow.pending_reconciliations().await.is_empty());

    let records = h.store.list_reconciliations().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].domain, domain.key);
    assert_eq!(h.payments.charge_count(), 1);
}

#[tokio::test]
async fn unsaved_expiration_after_renewal_blocks_second_charge() {
    let h = harness();
    let domain = seed_renewable(&h.store, &h.ledger, "example.com", RegistryMode::Test, Some("pm_card"), 5).await;
    h.store.fail_domain_writes(true);

    let first = h.workflow.run(fixture_time()).await;
    assert!(first.is_err(), "unsaved expiration must fail the run");
    assert_eq!(h.payments.charge_count(), 1);
    assert_eq!(h.ledger.call_count("renew"), 1);
    let renewed_to = h.ledger.domain(&domain.key).unwrap().expiration.unwrap();
    assert_eq!(
        h.workflow.held_updates().await.get(&domain.key),
        Some(&HeldUpdate::Expiration(renewed_to))
    );

    // Store still down a day later: the held domain is not charged again
    let next_day = fixture_time() + chrono::Duration::days(1);
    assert!(h.workflow.run(next_day).await.is_err());
    assert_eq!(h.payments.charge_count(), 1, "customer charged twice for one renewal");

    h.store.fail_domain_writes(false);
    let recovered = h.workflow.run(next_day).await.unwrap();
    assert_eq!(recovered.eligible, 0, "replayed expiration takes the domain out of the window");
    assert!(h.workflow.held_updates().await.is_empty());

    let stored = h.store.get_domain(&domain.key).await.unwrap().unwrap();
    assert_eq!(stored.expiration_date, Some(renewed_to));
    assert_eq!(h.payments.charge_count(), 1);
    assert_eq!(h.ledger.call_count("renew"), 1);
}

#[tokio::test]
async fn unsaved_auto_renew_switch_off_blocks_recharging_declined_card() {
    let h = harness();
    let domain = seed_renewable(&h.store, &h.ledger, "example.com", RegistryMode::Test, Some("pm_card"), 5).await;
    h.payments.then(ChargeOutcome::Declined {
        reason: "card_declined".to_string(),
    });
    h.store.fail_domain_writes(true);

    assert!(h.workflow.run(fixture_time()).await.is_err());
    assert_eq!(
        h.workflow.held_updates().await.get(&domain.key),
        Some(&HeldUpdate::DisableAutoRenew)
    );
    assert_eq!(h.notifier.sent_with(templates::RENEWAL_FAILED).len(), 1);

    assert!(h.workflow.run(fixture_time()).await.is_err());
    assert_eq!(h.payments.charge_count(), 1, "declined card must not be charged again");

    h.store.fail_domain_writes(false);
    let recovered = h.workflow.run(fixture_time()).await.unwrap();
    assert_eq!(recovered.eligible, 0);
    assert!(!h.store.get_domain(&domain.key).await.unwrap().unwrap().auto_renew);
    assert_eq!(h.payments.charge_count(), 1);
    assert!(h.ledger.calls().is_empty());
}

#[tokio::test]
async fn failed_confirmation_does_not_undo_renewal() {
    let h = harness();
    let domain = seed_renewable(&h.store, &h.ledger, "example.com", RegistryMode::Test, Some("pm_card"), 5).await;
    h.notifier.fail_sends(true);

    let report = h.workflow.run(fixture_time()).await.unwrap();

    assert_eq!(report.renewed, 1);
    assert_eq!(report.results[0].outcome, RenewalOutcome::Renewed);
    let stored = h.store.get_domain(&domain.key).await.unwrap().unwrap();
    assert_eq!(stored.expiration_date, h.ledger.domain(&domain.key).unwrap().expiration);
    assert!(stored.expiration_date > domain.expiration_date);
    let renewals = h
        .store
        .list_transactions()
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.kind == TransactionKind::Renewal)
        .count();
    assert_eq!(renewals, 1, "audit row still written");
    assert!(h.store.list_reconciliations().await.unwrap().is_empty());
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn failed_missing_payment_notice_is_not_counted() {
    let h = harness();
    seed_renewable(&h.store, &h.ledger, "example.com", RegistryMode::Test, None, 5).await;
    h.notifier.fail_sends(true);

    let report = h.workflow.run(fixture_time()).await.unwrap();

    assert_eq!(report.missing_payment_notified, 0);
    assert_eq!(h.payments.charge_count(), 0);
}

#[tokio::test]
async fn expiration_falls_back_to_registry_then_local_extension() {
    let h = harness();
    h.ledger.behave(|b| b.receipt_has_expiration = false);
    let from_registry =
        seed_renewable(&h.store, &h.ledger, "example.com", RegistryMode::Test, Some("pm_a"), 5).await;

    h.workflow.run(fixture_time()).await.unwrap();

    let stored = h.store.get_domain(&from_registry.key).await.unwrap().unwrap();
    assert_eq!(stored.expiration_date, h.ledger.domain(&from_registry.key).unwrap().expiration);

    let h = harness();
    h.ledger.behave(|b| {
        b.receipt_has_expiration = false;
        b.fail_domain_info = true;
    });
    let local = seed_renewable(&h.store, &h.ledger, "example.com", RegistryMode::Test, Some("pm_a"), 5).await;

    h.workflow.run(fixture_time()).await.unwrap();

    let stored = h.store.get_domain(&local.key).await.unwrap().unwrap();
    let previous = local.expiration_date.unwrap();
    assert_eq!(
        stored.expiration_date,
        previous.checked_add_months(chrono::Months::new(12)),
        "falls back to previous expiration plus one year"
    );
}

#[tokio::test]
async fn renewal_refill_is_recorded() {
    let h = harness();
    h.ledger.behave(|b| b.action_cost = dec!(10.00));
    h.ledger.set_balance(RegistryMode::Test, dec!(2.00));
    seed_renewable(&h.store, &h.ledger, "example.com", RegistryMode::Test, Some("pm_card"), 5).await;

    let report = h.workflow.run(fixture_time()).await.unwrap();
    assert_eq!(report.renewed, 1);

    let refills: Vec<_> = h
        .store
        .list_transactions()
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.kind == TransactionKind::Refill)
        .collect();
    assert_eq!(refills.len(), 1);
    assert_eq!(refills[0].registry_cost, dec!(25.00), "minimum refill applies");
}

#[tokio::test(start_paused = true)]
async fn domains_are_processed_sequentially_with_a_delay() {
    let h = harness_with(AutoRenewSettings {
        inter_domain_delay: Duration::from_millis(2000),
        ..AutoRenewSettings::default()
    });
    for name in ["a.com", "b.com", "c.com"] {
        seed_renewable(&h.store, &h.ledger, name, RegistryMode::Test, Some("pm_card"), 5).await;
    }

    let started = tokio::time::Instant::now();
    let report = h.workflow.run(fixture_time()).await.unwrap();

    assert_eq!(report.renewed, 3);
    assert!(
        started.elapsed() >= Duration::from_millis(4000),
        "two pauses expected between three domains, elapsed {:?}",
        started.elapsed()
    );
}
