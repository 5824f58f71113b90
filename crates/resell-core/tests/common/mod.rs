//! Test doubles and common utilities for contract tests
//!
//! The doubles are small and observable: the ledger records every call
//! with the registry mode it used, payments follow a script, the notifier
//! records what it was asked to send, and the store can be told to refuse
//! reconciliation writes.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Months, TimeZone, Utc};
use resell_core::error::{Error, Result};
use resell_core::model::{
    BalanceTransaction, Cart, Customer, Domain, DomainKey, PushRequest, ReconciliationRecord,
    RegistryMode, TldPricing, TransferRecord, TransferState,
};
use resell_core::orchestrator::SmartActionOrchestrator;
use resell_core::refill::RefillPolicy;
use resell_core::state::MemoryStore;
use resell_core::traits::{
    ActionReceipt, ChargeOutcome, NotificationSender, PaymentCollector, PrivacyStatus,
    RefillReceipt, RegistryDomainInfo, RegistryLedger, ResellStore,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fixed "now" used across tests
pub fn fixture_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 3, 1, 12, 0, 0).unwrap()
}

pub fn key(name: &str) -> DomainKey {
    DomainKey::parse(name).unwrap()
}

pub fn com_pricing() -> TldPricing {
    TldPricing {
        tld: "com".to_string(),
        registration_cost: dec!(9.00),
        registration_retail: dec!(12.00),
        renewal_cost: dec!(10.00),
        renewal_retail: dec!(15.00),
        transfer_cost: dec!(9.50),
        transfer_retail: dec!(14.00),
        privacy_cost: dec!(3.00),
    }
}

pub fn orchestrator(ledger: &MockLedger) -> Arc<SmartActionOrchestrator> {
    Arc::new(SmartActionOrchestrator::new(
        Arc::new(ledger.clone()),
        RefillPolicy::default(),
        Duration::from_secs(5),
    ))
}

// ---------------------------------------------------------------------------
// Registry ledger
// ---------------------------------------------------------------------------

/// Switches controlling how the mock ledger answers
#[derive(Debug, Clone)]
pub struct LedgerBehavior {
    /// Balance queries beyond this many succeed no more
    pub fail_balance_after: Option<usize>,
    pub fail_refill: bool,
    /// Refills increase the balance by the net-of-fee amount
    pub refill_credits: bool,
    pub refill_fee: Decimal,
    pub fail_register: bool,
    pub fail_renew: bool,
    /// A failing renew still extends the expiration
    pub renew_applies_despite_error: bool,
    pub receipt_has_expiration: bool,
    pub fail_domain_info: bool,
    pub fail_transfer: bool,
    pub fail_set_nameservers: bool,
    pub fail_purchase_privacy: bool,
    pub fail_set_privacy: bool,
    pub privacy_auto_enables: bool,
    /// Debited from the balance by every successful paid action
    pub action_cost: Decimal,
}

impl Default for LedgerBehavior {
    fn default() -> Self {
        Self {
            fail_balance_after: None,
            fail_refill: false,
            refill_credits: true,
            refill_fee: dec!(0.05),
            fail_register: false,
            fail_renew: false,
            renew_applies_despite_error: false,
            receipt_has_expiration: true,
            fail_domain_info: false,
            fail_transfer: false,
            fail_set_nameservers: false,
            fail_purchase_privacy: false,
            fail_set_privacy: false,
            privacy_auto_enables: false,
            action_cost: Decimal::ZERO,
        }
    }
}

/// One recorded ledger call
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerCall {
    pub op: &'static str,
    pub mode: RegistryMode,
    pub domain: Option<DomainKey>,
    pub amount: Option<Decimal>,
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<RegistryMode, Decimal>,
    domains: HashMap<DomainKey, RegistryDomainInfo>,
    privacy: HashMap<DomainKey, PrivacyStatus>,
    transfers: HashMap<DomainKey, TransferState>,
    calls: Vec<LedgerCall>,
    behavior: LedgerBehavior,
}

/// A mock RegistryLedger that tracks calls; clones share state
#[derive(Clone, Default)]
pub struct MockLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, mode: RegistryMode, balance: Decimal) -> Self {
        self.state.lock().unwrap().balances.insert(mode, balance);
        self
    }

    pub fn set_balance(&self, mode: RegistryMode, balance: Decimal) {
        self.state.lock().unwrap().balances.insert(mode, balance);
    }

    pub fn behave(&self, f: impl FnOnce(&mut LedgerBehavior)) {
        f(&mut self.state.lock().unwrap().behavior);
    }

    pub fn seed_domain(&self, key: &DomainKey, expiration: Option<DateTime<Utc>>, nameservers: &[&str]) {
        self.state.lock().unwrap().domains.insert(
            key.clone(),
            RegistryDomainInfo {
                expiration,
                nameservers: nameservers.iter().map(|s| s.to_string()).collect(),
                privacy_enabled: false,
            },
        );
    }

    pub fn seed_privacy(&self, key: &DomainKey, purchased: bool, enabled: bool) {
        self.state
            .lock()
            .unwrap()
            .privacy
            .insert(key.clone(), PrivacyStatus { purchased, enabled });
    }

    pub fn seed_transfer(&self, key: &DomainKey, state: TransferState) {
        self.state.lock().unwrap().transfers.insert(key.clone(), state);
    }

    pub fn balance_of(&self, mode: RegistryMode) -> Decimal {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(&mode)
            .copied()
            .unwrap_or_default()
    }

    pub fn domain(&self, key: &DomainKey) -> Option<RegistryDomainInfo> {
        self.state.lock().unwrap().domains.get(key).cloned()
    }

    pub fn privacy(&self, key: &DomainKey) -> PrivacyStatus {
        self.state
            .lock()
            .unwrap()
            .privacy
            .get(key)
            .copied()
            .unwrap_or(PrivacyStatus {
                purchased: false,
                enabled: false,
            })
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .count()
    }

    /// Calls other than balance/status reads
    pub fn mutating_call_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| !matches!(c.op, "balance" | "domain_info" | "privacy_status" | "transfer_status"))
            .count()
    }

    fn record(
        &self,
        op: &'static str,
        mode: RegistryMode,
        domain: Option<&DomainKey>,
        amount: Option<Decimal>,
    ) -> LedgerBehavior {
        let mut state = self.state.lock().unwrap();
        state.calls.push(LedgerCall {
            op,
            mode,
            domain: domain.cloned(),
            amount,
        });
        state.behavior.clone()
    }

    fn debit(&self, mode: RegistryMode, cost: Decimal) {
        let mut state = self.state.lock().unwrap();
        *state.balances.entry(mode).or_default() -= cost;
    }
}

fn mock_error(msg: &str) -> Error {
    Error::registry("mock", msg)
}

#[async_trait]
impl RegistryLedger for MockLedger {
    async fn balance(&self, mode: RegistryMode) -> Result<Decimal> {
        let behavior = self.record("balance", mode, None, None);
        if let Some(limit) = behavior.fail_balance_after
            && self.call_count("balance") > limit
        {
            return Err(mock_error("balance unavailable"));
        }
        Ok(self.balance_of(mode))
    }

    async fn refill(&self, mode: RegistryMode, amount: Decimal) -> Result<RefillReceipt> {
        let behavior = self.record("refill", mode, None, Some(amount));
        if behavior.fail_refill {
            return Err(mock_error("card declined for refill"));
        }
        if behavior.refill_credits {
            let net = amount - amount * behavior.refill_fee;
            let mut state = self.state.lock().unwrap();
            *state.balances.entry(mode).or_default() += net;
        }
        Ok(RefillReceipt {
            transaction_id: format!("refill-{}", self.call_count("refill")),
        })
    }

    async fn register(
        &self,
        mode: RegistryMode,
        domain: &DomainKey,
        years: u32,
        nameservers: &[String],
    ) -> Result<ActionReceipt> {
        let behavior = self.record("register", mode, Some(domain), None);
        if behavior.fail_register {
            return Err(mock_error("register failed"));
        }
        let expiration = fixture_time().checked_add_months(Months::new(12 * years));
        self.state.lock().unwrap().domains.insert(
            domain.clone(),
            RegistryDomainInfo {
                expiration,
                nameservers: nameservers.to_vec(),
                privacy_enabled: false,
            },
        );
        self.debit(mode, behavior.action_cost);
        Ok(ActionReceipt {
            order_id: Some("order-register".to_string()),
            expiration: expiration.filter(|_| behavior.receipt_has_expiration),
        })
    }

    async fn renew(&self, mode: RegistryMode, domain: &DomainKey, years: u32) -> Result<ActionReceipt> {
        let behavior = self.record("renew", mode, Some(domain), None);
        let extend = || {
            let mut state = self.state.lock().unwrap();
            let info = state.domains.entry(domain.clone()).or_insert(RegistryDomainInfo {
                expiration: None,
                nameservers: Vec::new(),
                privacy_enabled: false,
            });
            let base = info.expiration.unwrap_or_else(fixture_time);
            info.expiration = base.checked_add_months(Months::new(12 * years));
            info.expiration
        };

        if behavior.fail_renew {
            if behavior.renew_applies_despite_error {
                extend();
            }
            return Err(mock_error("renew failed"));
        }

        let expiration = extend();
        self.debit(mode, behavior.action_cost);
        Ok(ActionReceipt {
            order_id: Some("order-renew".to_string()),
            expiration: expiration.filter(|_| behavior.receipt_has_expiration),
        })
    }

    async fn transfer(&self, mode: RegistryMode, domain: &DomainKey, _auth_code: &str) -> Result<ActionReceipt> {
        let behavior = self.record("transfer", mode, Some(domain), None);
        if behavior.fail_transfer {
            return Err(mock_error("transfer failed"));
        }
        self.seed_transfer(domain, TransferState::Pending);
        self.debit(mode, behavior.action_cost);
        Ok(ActionReceipt {
            order_id: Some("order-transfer".to_string()),
            expiration: None,
        })
    }

    async fn domain_info(&self, mode: RegistryMode, domain: &DomainKey) -> Result<RegistryDomainInfo> {
        let behavior = self.record("domain_info", mode, Some(domain), None);
        if behavior.fail_domain_info {
            return Err(mock_error("domain info unavailable"));
        }
        self.domain(domain)
            .ok_or_else(|| Error::not_found(format!("{} not in reseller account", domain)))
    }

    async fn transfer_status(&self, mode: RegistryMode, domain: &DomainKey) -> Result<TransferState> {
        self.record("transfer_status", mode, Some(domain), None);
        self.state
            .lock()
            .unwrap()
            .transfers
            .get(domain)
            .copied()
            .ok_or_else(|| Error::not_found(format!("no transfer for {}", domain)))
    }

    async fn set_nameservers(&self, mode: RegistryMode, domain: &DomainKey, nameservers: &[String]) -> Result<()> {
        let behavior = self.record("set_nameservers", mode, Some(domain), None);
        if behavior.fail_set_nameservers {
            return Err(mock_error("nameserver update rejected"));
        }
        let mut state = self.state.lock().unwrap();
        if let Some(info) = state.domains.get_mut(domain) {
            info.nameservers = nameservers.to_vec();
        }
        Ok(())
    }

    async fn privacy_status(&self, mode: RegistryMode, domain: &DomainKey) -> Result<PrivacyStatus> {
        self.record("privacy_status", mode, Some(domain), None);
        Ok(self.privacy(domain))
    }

    async fn purchase_privacy(&self, mode: RegistryMode, domain: &DomainKey, _years: u32) -> Result<()> {
        let behavior = self.record("purchase_privacy", mode, Some(domain), None);
        if behavior.fail_purchase_privacy {
            return Err(mock_error("privacy purchase failed"));
        }
        self.seed_privacy(domain, true, behavior.privacy_auto_enables);
        self.debit(mode, behavior.action_cost);
        Ok(())
    }

    async fn set_privacy(&self, mode: RegistryMode, domain: &DomainKey, enabled: bool) -> Result<()> {
        let behavior = self.record("set_privacy", mode, Some(domain), None);
        if behavior.fail_set_privacy {
            return Err(mock_error("privacy toggle failed"));
        }
        let current = self.privacy(domain);
        if !current.purchased && enabled {
            return Err(mock_error("privacy not purchased"));
        }
        self.seed_privacy(domain, current.purchased, enabled);
        Ok(())
    }

    fn ledger_name(&self) -> &'static str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Charge {
    pub customer_id: String,
    pub amount: Decimal,
    pub payment_method_id: String,
}

/// Payment collector answering from a script; succeeds once the script runs out
#[derive(Clone, Default)]
pub struct ScriptedPayments {
    script: Arc<Mutex<VecDeque<std::result::Result<ChargeOutcome, String>>>>,
    charges: Arc<Mutex<Vec<Charge>>>,
}

impl ScriptedPayments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(&self, outcome: ChargeOutcome) -> &Self {
        self.script.lock().unwrap().push_back(Ok(outcome));
        self
    }

    pub fn then_transport_error(&self, message: &str) -> &Self {
        self.script.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn charges(&self) -> Vec<Charge> {
        self.charges.lock().unwrap().clone()
    }

    pub fn charge_count(&self) -> usize {
        self.charges.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentCollector for ScriptedPayments {
    async fn charge(&self, customer_id: &str, amount: Decimal, payment_method_id: &str) -> Result<ChargeOutcome> {
        let n = {
            let mut charges = self.charges.lock().unwrap();
            charges.push(Charge {
                customer_id: customer_id.to_string(),
                amount,
                payment_method_id: payment_method_id.to_string(),
            });
            charges.len()
        };
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(Error::payment(message)),
            None => Ok(ChargeOutcome::Succeeded {
                reference: format!("pi_{}", n),
            }),
        }
    }

    fn processor_name(&self) -> &'static str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub template: String,
    pub recipient: String,
    pub data: serde_json::Value,
}

/// Notifier that records every send; can be told to fail
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notice>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notice> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_with(&self, template: &str) -> Vec<Notice> {
        self.sent()
            .into_iter()
            .filter(|n| n.template == template)
            .collect()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(&self, template: &str, recipient: &str, data: serde_json::Value) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::notification("smtp unavailable"));
        }
        self.sent.lock().unwrap().push(Notice {
            template: template.to_string(),
            recipient: recipient.to_string(),
            data,
        });
        Ok(())
    }

    fn sender_name(&self) -> &'static str {
        "recording"
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// MemoryStore wrapper that can refuse reconciliation and domain writes
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_reconciliation: Arc<AtomicBool>,
    reconciliation_attempts: Arc<AtomicUsize>,
    fail_domain_writes: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reconciliation_writes(&self, fail: bool) {
        self.fail_reconciliation.store(fail, Ordering::SeqCst);
    }

    pub fn reconciliation_attempts(&self) -> usize {
        self.reconciliation_attempts.load(Ordering::SeqCst)
    }

    pub fn fail_domain_writes(&self, fail: bool) {
        self.fail_domain_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResellStore for FlakyStore {
    async fn get_domain(&self, key: &DomainKey) -> Result<Option<Domain>> {
        self.inner.get_domain(key).await
    }

    async fn save_domain(&self, domain: &Domain) -> Result<()> {
        if self.fail_domain_writes.load(Ordering::SeqCst) {
            return Err(Error::store("database unavailable"));
        }
        self.inner.save_domain(domain).await
    }

    async fn list_domains(&self) -> Result<Vec<Domain>> {
        self.inner.list_domains().await
    }

    async fn get_customer(&self, id: &str) -> Result<Option<Customer>> {
        self.inner.get_customer(id).await
    }

    async fn save_customer(&self, customer: &Customer) -> Result<()> {
        self.inner.save_customer(customer).await
    }

    async fn get_pricing(&self, tld: &str) -> Result<Option<TldPricing>> {
        self.inner.get_pricing(tld).await
    }

    async fn save_pricing(&self, pricing: &TldPricing) -> Result<()> {
        self.inner.save_pricing(pricing).await
    }

    async fn insert_reconciliation(&self, record: &ReconciliationRecord) -> Result<()> {
        self.reconciliation_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_reconciliation.load(Ordering::SeqCst) {
            return Err(Error::store("database unavailable"));
        }
        self.inner.insert_reconciliation(record).await
    }

    async fn list_reconciliations(&self) -> Result<Vec<ReconciliationRecord>> {
        self.inner.list_reconciliations().await
    }

    async fn insert_transaction(&self, transaction: &BalanceTransaction) -> Result<()> {
        self.inner.insert_transaction(transaction).await
    }

    async fn list_transactions(&self) -> Result<Vec<BalanceTransaction>> {
        self.inner.list_transactions().await
    }

    async fn save_transfer(&self, transfer: &TransferRecord) -> Result<()> {
        self.inner.save_transfer(transfer).await
    }

    async fn list_transfers(&self) -> Result<Vec<TransferRecord>> {
        self.inner.list_transfers().await
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        self.inner.save_cart(cart).await
    }

    async fn purge_carts(&self, older_than: DateTime<Utc>) -> Result<usize> {
        self.inner.purge_carts(older_than).await
    }

    async fn save_push_request(&self, request: &PushRequest) -> Result<()> {
        self.inner.save_push_request(request).await
    }

    async fn list_push_requests(&self) -> Result<Vec<PushRequest>> {
        self.inner.list_push_requests().await
    }

    async fn expire_push_requests(&self, now: DateTime<Utc>) -> Result<usize> {
        self.inner.expire_push_requests(now).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

/// Seed a customer, `.com` pricing and an active auto-renewing domain
///
/// The domain expires `expires_in_days` after [`fixture_time`] and is also
/// known to the ledger with the same expiration.
pub async fn seed_renewable(
    store: &dyn ResellStore,
    ledger: &MockLedger,
    name: &str,
    mode: RegistryMode,
    payment_method: Option<&str>,
    expires_in_days: i64,
) -> Domain {
    let customer_id = format!("cus_{}", name.replace('.', "_"));
    store
        .save_customer(&Customer {
            id: customer_id.clone(),
            email: format!("owner@{}", name),
            payment_method_id: payment_method.map(str::to_string),
        })
        .await
        .unwrap();
    store.save_pricing(&com_pricing()).await.unwrap();

    let expiration = fixture_time() + chrono::Duration::days(expires_in_days);
    let domain = Domain::new(key(name), customer_id, mode)
        .with_expiration(expiration)
        .with_auto_renew(true)
        .with_nameservers(["ns1.customer.test", "ns2.customer.test"]);
    store.save_domain(&domain).await.unwrap();
    ledger.seed_domain(&domain.key, Some(expiration), &["ns1.customer.test", "ns2.customer.test"]);
    domain
}
