//! Unattended renewal of domains nearing expiration
//!
//! ## Per-domain state machine
//!
//! ```text
//! ChargeCustomer ──declined/requires action──► auto-renew off, notify, stop
//!       │ └─────────transport error──────────► reconciliation record, stop
//!       ▼
//! RenewAtRegistry ──failed──► reconciliation record, stop (never re-charged)
//!       │
//!       ▼
//! PersistAndNotify ─► expiration updated, audit row, confirmation
//! ```
//!
//! Domains are processed one at a time, each under its advisory lock, with a
//! fixed delay between them. A domain with an open reconciliation record is
//! never charged again until someone resolves the record.
//!
//! Row writes that follow a charge (new expiration, auto-renew switched off)
//! are held in memory when the store refuses them. A held domain is not
//! charged, and the write is replayed at the start of every run until it
//! lands.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::lock::DomainLocks;
use crate::model::{
    BalanceTransaction, Customer, Domain, DomainKey, DomainStatus, ReconciliationRecord,
    RegistryMode, TransactionKind,
};
use crate::orchestrator::{ActionOptions, SmartActionOrchestrator, refill_transaction};
use crate::timeout::bounded;
use crate::traits::notifier::templates;
use crate::traits::{ChargeOutcome, NotificationSender, PaymentCollector, ResellStore};
use crate::workflow::{FailureKind, Step, WorkflowResult};

/// Knobs for one auto-renew workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoRenewSettings {
    /// Mode this process renews in; domains of the other mode are left alone
    pub mode: RegistryMode,
    /// How far ahead of expiration a domain becomes eligible
    pub lookahead: chrono::Duration,
    /// Pause between two domains
    pub inter_domain_delay: Duration,
    pub renewal_years: u32,
    pub allow_auto_refill: bool,
}

impl Default for AutoRenewSettings {
    fn default() -> Self {
        Self {
            mode: RegistryMode::Test,
            lookahead: chrono::Duration::days(30),
            inter_domain_delay: Duration::from_millis(2000),
            renewal_years: 1,
            allow_auto_refill: true,
        }
    }
}

/// What happened to one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalOutcome {
    Renewed,
    Declined,
    RequiresAction,
    ReconciliationRequired,
    Failed,
    /// No longer eligible once re-read under the lock
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainRenewal {
    pub domain: DomainKey,
    pub outcome: RenewalOutcome,
    pub workflow: WorkflowResult,
}

/// Summary of one auto-renew run
#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoRenewReport {
    pub eligible: usize,
    pub renewed: usize,
    /// Declined or requiring customer action
    pub declined: usize,
    pub reconciliation_required: usize,
    pub failed: usize,
    pub missing_payment_notified: usize,
    pub results: Vec<DomainRenewal>,
}

impl AutoRenewReport {
    fn record(&mut self, renewal: DomainRenewal) {
        match renewal.outcome {
            RenewalOutcome::Renewed => self.renewed += 1,
            RenewalOutcome::Declined | RenewalOutcome::RequiresAction => self.declined += 1,
            RenewalOutcome::ReconciliationRequired => self.reconciliation_required += 1,
            RenewalOutcome::Failed => self.failed += 1,
            RenewalOutcome::Skipped => {}
        }
        self.results.push(renewal);
    }
}

/// Domain row change the store refused after a charge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeldUpdate {
    /// Renewed at the registry; the new expiration was not saved
    Expiration(DateTime<Utc>),
    /// Charge failed; auto-renew could not be switched off
    DisableAutoRenew,
}

impl HeldUpdate {
    fn apply(self, domain: &mut Domain) {
        match self {
            HeldUpdate::Expiration(expiration) => {
                if domain.expiration_date.is_none_or(|current| current < expiration) {
                    domain.expiration_date = Some(expiration);
                }
            }
            HeldUpdate::DisableAutoRenew => domain.auto_renew = false,
        }
    }
}

/// Charges customers and renews their domains at the registry
pub struct AutoRenewWorkflow {
    store: Arc<dyn ResellStore>,
    payments: Arc<dyn PaymentCollector>,
    notifier: Arc<dyn NotificationSender>,
    orchestrator: Arc<SmartActionOrchestrator>,
    locks: DomainLocks,
    settings: AutoRenewSettings,
    /// Reconciliation records the store refused; retried at the next run
    pending: Mutex<Vec<ReconciliationRecord>>,
    /// Domain writes the store refused; replayed at the next run
    held_updates: Mutex<HashMap<DomainKey, HeldUpdate>>,
}

impl AutoRenewWorkflow {
    pub fn new(
        store: Arc<dyn ResellStore>,
        payments: Arc<dyn PaymentCollector>,
        notifier: Arc<dyn NotificationSender>,
        orchestrator: Arc<SmartActionOrchestrator>,
        locks: DomainLocks,
        settings: AutoRenewSettings,
    ) -> Self {
        Self {
            store,
            payments,
            notifier,
            orchestrator,
            locks,
            settings,
            pending: Mutex::new(Vec::new()),
            held_updates: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &AutoRenewSettings {
        &self.settings
    }

    /// Reconciliation records waiting to be persisted
    pub async fn pending_reconciliations(&self) -> Vec<ReconciliationRecord> {
        self.pending.lock().await.clone()
    }

    /// Domain writes waiting to be persisted
    pub async fn held_updates(&self) -> HashMap<DomainKey, HeldUpdate> {
        self.held_updates.lock().await.clone()
    }

    /// Renew every eligible domain
    ///
    /// Per-domain failures end up in the report. The run itself fails only
    /// when a reconciliation record or a post-charge domain write could not
    /// be persisted; those are kept in memory and retried first thing next
    /// run.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<AutoRenewReport> {
        self.flush_pending().await;
        self.flush_held_updates().await;

        let limit = self.orchestrator.call_timeout();
        let domains = bounded("store.list_domains", limit, self.store.list_domains()).await?;
        let mut blocked: HashSet<DomainKey> =
            bounded("store.list_reconciliations", limit, self.store.list_reconciliations())
                .await?
                .into_iter()
                .filter(ReconciliationRecord::is_open)
                .map(|r| r.domain)
                .collect();
        blocked.extend(self.pending.lock().await.iter().map(|r| r.domain.clone()));
        blocked.extend(self.held_updates.lock().await.keys().cloned());

        let mut eligible = Vec::new();
        let mut missing_payment = Vec::new();
        for domain in domains {
            if !self.is_candidate(&domain, now) {
                continue;
            }
            if blocked.contains(&domain.key) {
                warn!(domain = %domain.key, "open reconciliation record or unsaved update, not charging again");
                continue;
            }
            let customer = bounded(
                "store.get_customer",
                limit,
                self.store.get_customer(&domain.customer_id),
            )
            .await?;
            match customer {
                Some(customer) => match customer.payment_method_id.clone() {
                    Some(method) => eligible.push((domain, customer, method)),
                    None => missing_payment.push((domain, customer)),
                },
                None => {
                    warn!(domain = %domain.key, customer = %domain.customer_id, "customer record missing, skipping");
                }
            }
        }

        info!(
            eligible = eligible.len(),
            missing_payment = missing_payment.len(),
            mode = %self.settings.mode,
            "auto-renew run starting"
        );

        let mut report = AutoRenewReport {
            eligible: eligible.len(),
            ..AutoRenewReport::default()
        };

        for (index, (domain, customer, method)) in eligible.into_iter().enumerate() {
            if index > 0 && !self.settings.inter_domain_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_domain_delay).await;
            }
            let renewal = {
                let _guard = self.locks.acquire(&domain.key).await;
                self.renew_domain(&domain.key, &customer, &method, now).await
            };
            report.record(renewal);
        }

        for (domain, customer) in &missing_payment {
            let data = json!({
                "domain": domain.key.to_string(),
                "expiration": domain.expiration_date,
            });
            if self.notify(templates::ADD_PAYMENT_METHOD, &customer.email, data).await {
                report.missing_payment_notified += 1;
            }
        }

        info!(
            renewed = report.renewed,
            declined = report.declined,
            reconciliation_required = report.reconciliation_required,
            failed = report.failed,
            "auto-renew run finished"
        );

        let unsaved = self.pending.lock().await.len();
        let held = self.held_updates.lock().await.len();
        if unsaved > 0 || held > 0 {
            return Err(Error::store(format!(
                "{} reconciliation record(s) and {} domain update(s) could not be persisted and are held for retry",
                unsaved, held
            )));
        }

        Ok(report)
    }

    fn is_candidate(&self, domain: &Domain, now: DateTime<Utc>) -> bool {
        domain.status == DomainStatus::Active
            && domain.auto_renew
            && domain.registry_mode == self.settings.mode
            && domain
                .expiration_date
                .is_some_and(|expiration| expiration <= now + self.settings.lookahead)
    }

    async fn renew_domain(
        &self,
        key: &DomainKey,
        customer: &Customer,
        payment_method: &str,
        now: DateTime<Utc>,
    ) -> DomainRenewal {
        let mut result = WorkflowResult::new(false);
        let limit = self.orchestrator.call_timeout();
        let years = self.settings.renewal_years;

        let finish = |outcome, workflow| DomainRenewal {
            domain: key.clone(),
            outcome,
            workflow,
        };

        // Re-read under the lock; another workflow may have changed the row
        let mut domain = match bounded("store.get_domain", limit, self.store.get_domain(key)).await {
            Ok(Some(domain)) if self.is_candidate(&domain, now) => domain,
            Ok(_) => {
                debug!(domain = %key, "no longer eligible for auto-renew");
                return finish(RenewalOutcome::Skipped, result);
            }
            Err(e) => {
                warn!(domain = %key, error = %e, "could not reload domain");
                return finish(RenewalOutcome::Failed, result.fail(FailureKind::StoreFailed, e.to_string()));
            }
        };

        let pricing = match bounded("store.get_pricing", limit, self.store.get_pricing(&key.tld)).await {
            Ok(Some(pricing)) => pricing,
            Ok(None) => {
                warn!(domain = %key, tld = %key.tld, "no pricing for TLD");
                return finish(
                    RenewalOutcome::Failed,
                    result.fail(FailureKind::PricingUnavailable, format!("No pricing for .{}", key.tld)),
                );
            }
            Err(e) => {
                warn!(domain = %key, error = %e, "pricing lookup failed");
                return finish(RenewalOutcome::Failed, result.fail(FailureKind::PricingUnavailable, e.to_string()));
            }
        };
        let retail = pricing.renewal_retail * Decimal::from(years);
        let cost = pricing.renewal_cost * Decimal::from(years);

        result.start(Step::ChargeCustomer);
        let charge = bounded(
            "payments.charge",
            limit,
            self.payments.charge(&customer.id, retail, payment_method),
        )
        .await;
        let reference = match charge {
            Ok(ChargeOutcome::Succeeded { reference }) => reference,
            Ok(ChargeOutcome::Declined { reason }) => {
                info!(domain = %key, %reason, "renewal charge declined, disabling auto-renew");
                self.disable_after_failed_charge(&mut domain, &customer.email, &reason).await;
                return finish(
                    RenewalOutcome::Declined,
                    result.fail(FailureKind::PaymentDeclined, Error::PaymentDeclined(reason).to_string()),
                );
            }
            Ok(ChargeOutcome::RequiresAction { reference }) => {
                info!(domain = %key, %reference, "renewal charge requires customer action, disabling auto-renew");
                self.disable_after_failed_charge(&mut domain, &customer.email, "payment requires authentication")
                    .await;
                return finish(
                    RenewalOutcome::RequiresAction,
                    result.fail(
                        FailureKind::PaymentRequiresAction,
                        Error::PaymentRequiresAction(reference).to_string(),
                    ),
                );
            }
            Err(e) => {
                error!(domain = %key, amount = %retail, error = %e, "renewal charge outcome unknown");
                let record = ReconciliationRecord::new(
                    &domain,
                    None,
                    retail,
                    format!("charge outcome unknown: {}", e),
                    now,
                );
                self.persist_reconciliation(record).await;
                return finish(
                    RenewalOutcome::ReconciliationRequired,
                    result.fail(FailureKind::PaymentFailed, e.to_string()),
                );
            }
        };
        result.complete(Step::ChargeCustomer);

        result.start(Step::RenewAtRegistry);
        let previous_expiration = domain.expiration_date;
        let options = ActionOptions {
            allow_auto_refill: self.settings.allow_auto_refill,
            dry_run: false,
        };
        let inner = self
            .orchestrator
            .renew(domain.registry_mode, key, years, previous_expiration, cost, options)
            .await;
        result.absorb(&inner);
        self.record_refill(&inner, domain.registry_mode, now).await;

        if !inner.success {
            let failure = inner
                .error
                .as_ref()
                .map(|f| f.message.clone())
                .unwrap_or_else(|| "registry renewal failed".to_string());
            error!(
                domain = %key,
                payment_reference = %reference,
                amount = %retail,
                %failure,
                "customer charged but registry renewal failed; manual reconciliation required"
            );
            let record = ReconciliationRecord::new(&domain, Some(reference), retail, failure.clone(), now);
            self.persist_reconciliation(record).await;
            let kind = inner.failure_kind().unwrap_or(FailureKind::RegistryActionFailed);
            return finish(RenewalOutcome::ReconciliationRequired, result.fail(kind, failure));
        }
        result.complete(Step::RenewAtRegistry);

        result.start(Step::PersistAndNotify);
        let expiration = self
            .resolve_expiration(&domain, inner.receipt.as_ref().and_then(|r| r.expiration), years, now)
            .await;
        domain.expiration_date = Some(expiration);
        if let Err(e) = bounded("store.save_domain", limit, self.store.save_domain(&domain)).await {
            error!(domain = %key, %expiration, error = %e, "renewed at registry but failed to save new expiration, holding for retry");
            self.hold_update(key, HeldUpdate::Expiration(expiration)).await;
        }

        let transaction = BalanceTransaction::new(TransactionKind::Renewal, cost, domain.registry_mode, now)
            .for_domain(&domain)
            .with_charge(retail, reference);
        if let Err(e) = bounded("store.insert_transaction", limit, self.store.insert_transaction(&transaction)).await {
            error!(domain = %key, error = %e, "failed to write renewal audit row");
        }

        let data = json!({
            "domain": key.to_string(),
            "expiration": expiration,
            "amount": retail.to_string(),
            "years": years,
        });
        self.notify(templates::RENEWAL_CONFIRMATION, &customer.email, data).await;
        result.complete(Step::PersistAndNotify);

        info!(domain = %key, %expiration, amount = %retail, "domain renewed");
        finish(RenewalOutcome::Renewed, result.succeed())
    }

    async fn disable_after_failed_charge(&self, domain: &mut Domain, email: &str, reason: &str) {
        domain.auto_renew = false;
        let limit = self.orchestrator.call_timeout();
        if let Err(e) = bounded("store.save_domain", limit, self.store.save_domain(domain)).await {
            error!(domain = %domain.key, error = %e, "failed to disable auto-renew, holding for retry");
            self.hold_update(&domain.key, HeldUpdate::DisableAutoRenew).await;
        }
        let data = json!({
            "domain": domain.key.to_string(),
            "expiration": domain.expiration_date,
            "reason": reason,
        });
        self.notify(templates::RENEWAL_FAILED, email, data).await;
    }

    /// Receipt first, then the registry's view, then previous + years
    async fn resolve_expiration(
        &self,
        domain: &Domain,
        from_receipt: Option<DateTime<Utc>>,
        years: u32,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        if let Some(expiration) = from_receipt {
            return expiration;
        }

        let info = bounded(
            "registry.domain_info",
            self.orchestrator.call_timeout(),
            self.orchestrator.ledger().domain_info(domain.registry_mode, &domain.key),
        )
        .await;
        if let Ok(info) = info
            && let Some(expiration) = info.expiration
        {
            return expiration;
        }

        warn!(domain = %domain.key, "registry did not report new expiration, extending locally");
        let base = domain.expiration_date.unwrap_or(now);
        base.checked_add_months(Months::new(12 * years)).unwrap_or(base)
    }

    async fn record_refill(&self, inner: &WorkflowResult, mode: RegistryMode, now: DateTime<Utc>) {
        if let Some(transaction) = refill_transaction(inner, mode, now)
            && let Err(e) = bounded(
                "store.insert_transaction",
                self.orchestrator.call_timeout(),
                self.store.insert_transaction(&transaction),
            )
            .await
        {
            error!(error = %e, "failed to write refill audit row");
        }
    }

    async fn persist_reconciliation(&self, record: ReconciliationRecord) {
        let limit = self.orchestrator.call_timeout();
        if let Err(e) = bounded(
            "store.insert_reconciliation",
            limit,
            self.store.insert_reconciliation(&record),
        )
        .await
        {
            error!(domain = %record.domain, id = %record.id, error = %e, "failed to persist reconciliation record, holding for retry");
            self.pending.lock().await.push(record);
        }
    }

    async fn flush_pending(&self) {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return;
        }
        let limit = self.orchestrator.call_timeout();
        let mut still_pending = Vec::new();
        for record in pending.drain(..) {
            match bounded(
                "store.insert_reconciliation",
                limit,
                self.store.insert_reconciliation(&record),
            )
            .await
            {
                Ok(()) => info!(domain = %record.domain, id = %record.id, "held reconciliation record persisted"),
                Err(e) => {
                    error!(domain = %record.domain, id = %record.id, error = %e, "reconciliation record still cannot be persisted");
                    still_pending.push(record);
                }
            }
        }
        *pending = still_pending;
    }

    async fn hold_update(&self, key: &DomainKey, update: HeldUpdate) {
        self.held_updates.lock().await.insert(key.clone(), update);
    }

    /// Replay held domain writes onto the current rows
    async fn flush_held_updates(&self) {
        let held: Vec<_> = self.held_updates.lock().await.drain().collect();
        if held.is_empty() {
            return;
        }
        let limit = self.orchestrator.call_timeout();
        let mut still_held = Vec::new();
        for (key, update) in held {
            let _guard = self.locks.acquire(&key).await;
            let saved = match bounded("store.get_domain", limit, self.store.get_domain(&key)).await {
                Ok(Some(mut domain)) => {
                    update.apply(&mut domain);
                    bounded("store.save_domain", limit, self.store.save_domain(&domain)).await
                }
                Ok(None) => {
                    warn!(domain = %key, ?update, "domain row gone, dropping held update");
                    Ok(())
                }
                Err(e) => Err(e),
            };
            match saved {
                Ok(()) => info!(domain = %key, ?update, "held domain update persisted"),
                Err(e) => {
                    error!(domain = %key, ?update, error = %e, "held domain update still cannot be persisted");
                    still_held.push((key, update));
                }
            }
        }
        let mut held = self.held_updates.lock().await;
        for (key, update) in still_held {
            held.entry(key).or_insert(update);
        }
    }

    async fn notify(&self, template: &str, recipient: &str, data: serde_json::Value) -> bool {
        let sent = bounded(
            "notifier.send",
            self.orchestrator.call_timeout(),
            self.notifier.send(template, recipient, data),
        )
        .await;
        match sent {
            Ok(()) => true,
            Err(e) => {
                warn!(template, recipient, sender = self.notifier.sender_name(), error = %e, "notification failed");
                false
            }
        }
    }
}
