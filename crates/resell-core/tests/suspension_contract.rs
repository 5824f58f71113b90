//! Architectural Contract Test: Suspension Round-Trip
//!
//! Constraints verified:
//! - Suspend followed by unsuspend restores the exact nameserver list
//! - A snapshot, once taken, is never overwritten by a later suspend
//! - Registry push failures never block the status change and never lose
//!   the snapshot
//! - A snapshot too short to be valid is not pushed
//!
//! If this test fails, a customer's DNS can be lost across a suspension.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use resell_core::lock::DomainLocks;
use resell_core::model::{Domain, DomainKey, DomainStatus, RegistryMode};
use resell_core::state::MemoryStore;
use resell_core::suspension::{NameserverAction, SuspensionController};
use resell_core::traits::ResellStore;
use resell_core::Error;

const QUARANTINE: [&str; 2] = ["ns1.quarantine.test", "ns2.quarantine.test"];
const ORIGINAL: [&str; 3] = ["ns1.customer.test", "ns2.customer.test", "ns3.customer.test"];

struct Harness {
    store: MemoryStore,
    ledger: MockLedger,
    controller: SuspensionController,
}

fn harness() -> Harness {
    let store = MemoryStore::new();
    let ledger = MockLedger::new();
    let controller = SuspensionController::new(
        Arc::new(store.clone()),
        Arc::new(ledger.clone()),
        DomainLocks::new(),
        QUARANTINE.iter().map(|s| s.to_string()).collect(),
        Duration::from_secs(5),
    )
    .unwrap();
    Harness {
        store,
        ledger,
        controller,
    }
}

async fn seed(h: &Harness, name: &str, mode: RegistryMode) -> DomainKey {
    let domain = Domain::new(key(name), "cus_1", mode).with_nameservers(ORIGINAL);
    h.store.save_domain(&domain).await.unwrap();
    h.ledger.seed_domain(&domain.key, None, &ORIGINAL);
    domain.key
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn suspend_then_unsuspend_restores_exact_nameservers() {
    let h = harness();
    let domain = seed(&h, "example.com", RegistryMode::Test).await;

    let suspended = h.controller.suspend(&domain).await.unwrap();
    assert_eq!(suspended.nameserver_action, NameserverAction::Quarantined);
    assert_eq!(suspended.from, DomainStatus::Active);

    let row = h.store.get_domain(&domain).await.unwrap().unwrap();
    assert_eq!(row.status, DomainStatus::Suspended);
    assert_eq!(row.nameservers, strings(&QUARANTINE));
    assert_eq!(row.suspended_original_nameservers, Some(strings(&ORIGINAL)));
    assert_eq!(h.ledger.domain(&domain).unwrap().nameservers, strings(&QUARANTINE));

    let restored = h.controller.unsuspend(&domain).await.unwrap();
    assert_eq!(restored.nameserver_action, NameserverAction::Restored);

    let row = h.store.get_domain(&domain).await.unwrap().unwrap();
    assert_eq!(row.status, DomainStatus::Active);
    assert_eq!(row.nameservers, strings(&ORIGINAL), "order and content must survive");
    assert_eq!(row.suspended_original_nameservers, None, "snapshot cleared after restore");
    assert_eq!(h.ledger.domain(&domain).unwrap().nameservers, strings(&ORIGINAL));
}

#[tokio::test]
async fn repeated_suspend_is_a_no_op() {
    let h = harness();
    let domain = seed(&h, "example.com", RegistryMode::Test).await;

    h.controller.suspend(&domain).await.unwrap();
    let again = h.controller.suspend(&domain).await.unwrap();

    assert_eq!(again.nameserver_action, NameserverAction::None);
    assert_eq!(h.ledger.call_count("set_nameservers"), 1);
    let row = h.store.get_domain(&domain).await.unwrap().unwrap();
    assert_eq!(
        row.suspended_original_nameservers,
        Some(strings(&ORIGINAL)),
        "snapshot must not be replaced by the quarantine set"
    );
}

#[tokio::test]
async fn existing_snapshot_is_never_overwritten() {
    let h = harness();
    let domain = seed(&h, "example.com", RegistryMode::Test).await;
    // A stale snapshot from an earlier failed restore
    let mut row = h.store.get_domain(&domain).await.unwrap().unwrap();
    row.suspended_original_nameservers = Some(strings(&["ns1.older.test", "ns2.older.test"]));
    row.nameservers = strings(&["ns1.temp.test", "ns2.temp.test"]);
    h.store.save_domain(&row).await.unwrap();

    h.controller.suspend(&domain).await.unwrap();

    let row = h.store.get_domain(&domain).await.unwrap().unwrap();
    assert_eq!(
        row.suspended_original_nameservers,
        Some(strings(&["ns1.older.test", "ns2.older.test"]))
    );
}

#[tokio::test]
async fn failed_quarantine_push_still_suspends_and_keeps_snapshot() {
    let h = harness();
    let domain = seed(&h, "example.com", RegistryMode::Test).await;
    h.ledger.behave(|b| b.fail_set_nameservers = true);

    let change = h.controller.suspend(&domain).await.unwrap();

    assert_eq!(change.nameserver_action, NameserverAction::QuarantineFailed);
    let row = h.store.get_domain(&domain).await.unwrap().unwrap();
    assert_eq!(row.status, DomainStatus::Suspended, "status change goes through");
    assert_eq!(row.nameservers, strings(&ORIGINAL), "local nameservers untouched");
    assert_eq!(row.suspended_original_nameservers, Some(strings(&ORIGINAL)));
}

#[tokio::test]
async fn failed_restore_push_keeps_snapshot_for_retry() {
    let h = harness();
    let domain = seed(&h, "example.com", RegistryMode::Test).await;
    h.controller.suspend(&domain).await.unwrap();
    h.ledger.behave(|b| b.fail_set_nameservers = true);

    let change = h.controller.unsuspend(&domain).await.unwrap();

    assert_eq!(change.nameserver_action, NameserverAction::RestoreFailed);
    let row = h.store.get_domain(&domain).await.unwrap().unwrap();
    assert_eq!(row.status, DomainStatus::Active);
    assert_eq!(row.suspended_original_nameservers, Some(strings(&ORIGINAL)));
}

#[tokio::test]
async fn invalid_snapshot_is_not_pushed() {
    let h = harness();
    let domain = seed(&h, "example.com", RegistryMode::Test).await;
    let mut row = h.store.get_domain(&domain).await.unwrap().unwrap();
    row.status = DomainStatus::Suspended;
    row.suspended_original_nameservers = Some(strings(&["ns1.only.test"]));
    h.store.save_domain(&row).await.unwrap();

    let change = h.controller.unsuspend(&domain).await.unwrap();

    assert_eq!(change.nameserver_action, NameserverAction::RestoreSkippedInvalidSnapshot);
    assert_eq!(h.ledger.call_count("set_nameservers"), 0);
    let row = h.store.get_domain(&domain).await.unwrap().unwrap();
    assert_eq!(row.status, DomainStatus::Active);
    assert_eq!(row.suspended_original_nameservers, Some(strings(&["ns1.only.test"])));
}

#[tokio::test]
async fn registry_calls_use_the_domains_mode() {
    let h = harness();
    let domain = seed(&h, "example.com", RegistryMode::Production).await;

    h.controller.suspend(&domain).await.unwrap();
    h.controller.unsuspend(&domain).await.unwrap();

    assert!(h.ledger.calls().iter().all(|c| c.mode == RegistryMode::Production));
}

#[tokio::test]
async fn non_suspension_transitions_touch_no_nameservers() {
    let h = harness();
    let domain = seed(&h, "example.com", RegistryMode::Test).await;

    let change = h.controller.set_status(&domain, DomainStatus::Expired).await.unwrap();

    assert_eq!(change.nameserver_action, NameserverAction::None);
    assert_eq!(h.ledger.call_count("set_nameservers"), 0);
    let row = h.store.get_domain(&domain).await.unwrap().unwrap();
    assert_eq!(row.status, DomainStatus::Expired);
}

#[tokio::test]
async fn unknown_domain_is_not_found() {
    let h = harness();
    let err = h.controller.suspend(&key("missing.com")).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {:?}", err);
}

#[test]
fn quarantine_set_needs_two_nameservers() {
    let result = SuspensionController::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MockLedger::new()),
        DomainLocks::new(),
        vec!["ns1.quarantine.test".to_string()],
        Duration::from_secs(5),
    );
    assert!(matches!(result, Err(Error::Config(_))));
}
