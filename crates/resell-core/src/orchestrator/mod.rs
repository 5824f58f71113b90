//! Balance-aware execution of paid registry actions
//!
//! The SmartActionOrchestrator is responsible for:
//! - Checking the reseller balance before a paid action
//! - Topping the balance up (and verifying the top-up landed) when allowed
//! - Performing the action against the registry ledger
//! - Re-observing registry state when the action call itself errors
//! - Recording a final balance snapshot
//!
//! ## Flow
//!
//! ```text
//! CheckBalance ─► ComputeRefill ─┬─► (dry run) ─► DryRun ─► done
//!                                │
//!                                ├─► (refill, not allowed) ─► insufficient_balance
//!                                │
//!                                └─► RefillBalance ─► VerifyRefill ─► PerformAction
//!                                                                        │
//!                                            (call errored) VerifyAction ◄┤
//!                                                                        ▼
//!                                                                  FinalBalance
//! ```
//!
//! Any failing step ends the workflow; nothing is retried here. The caller
//! owns retries and reconciliation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::model::{BalanceTransaction, DomainKey, RegistryMode, TransactionKind, TransferState};
use crate::refill::RefillPolicy;
use crate::timeout::bounded;
use crate::traits::{ActionReceipt, RegistryLedger};
use crate::workflow::{FailureKind, Step, WorkflowResult};

/// The paid registry action to run once the balance is covered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaidAction {
    Register {
        key: DomainKey,
        years: u32,
        nameservers: Vec<String>,
    },
    Renew {
        key: DomainKey,
        years: u32,
        /// Expiration known before the attempt; used to confirm a renewal
        /// whose call reported an error
        current_expiration: Option<DateTime<Utc>>,
    },
    Transfer {
        key: DomainKey,
        auth_code: String,
    },
    PurchasePrivacy {
        key: DomainKey,
        years: u32,
    },
}

impl PaidAction {
    pub fn domain(&self) -> &DomainKey {
        match self {
            PaidAction::Register { key, .. }
            | PaidAction::Renew { key, .. }
            | PaidAction::Transfer { key, .. }
            | PaidAction::PurchasePrivacy { key, .. } => key,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PaidAction::Register { .. } => "register",
            PaidAction::Renew { .. } => "renew",
            PaidAction::Transfer { .. } => "transfer",
            PaidAction::PurchasePrivacy { .. } => "purchase_privacy",
        }
    }
}

/// Per-invocation switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionOptions {
    /// Top the balance up by card when it does not cover the cost
    pub allow_auto_refill: bool,
    /// Stop after the refill computation without side effects
    pub dry_run: bool,
}

impl Default for ActionOptions {
    fn default() -> Self {
        Self {
            allow_auto_refill: true,
            dry_run: false,
        }
    }
}

impl ActionOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }
}

/// Runs paid actions against a registry ledger
pub struct SmartActionOrchestrator {
    ledger: Arc<dyn RegistryLedger>,
    policy: RefillPolicy,
    call_timeout: Duration,
}

impl SmartActionOrchestrator {
    pub fn new(ledger: Arc<dyn RegistryLedger>, policy: RefillPolicy, call_timeout: Duration) -> Self {
        Self {
            ledger,
            policy,
            call_timeout,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn RegistryLedger> {
        &self.ledger
    }

    pub fn policy(&self) -> &RefillPolicy {
        &self.policy
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Register a new domain, debiting `cost` from the reseller balance
    pub async fn purchase(
        &self,
        mode: RegistryMode,
        key: &DomainKey,
        years: u32,
        nameservers: &[String],
        cost: Decimal,
        options: ActionOptions,
    ) -> WorkflowResult {
        let action = PaidAction::Register {
            key: key.clone(),
            years,
            nameservers: nameservers.to_vec(),
        };
        self.execute(mode, cost, &action, options).await
    }

    /// Renew a domain, debiting `cost` from the reseller balance
    pub async fn renew(
        &self,
        mode: RegistryMode,
        key: &DomainKey,
        years: u32,
        current_expiration: Option<DateTime<Utc>>,
        cost: Decimal,
        options: ActionOptions,
    ) -> WorkflowResult {
        let action = PaidAction::Renew {
            key: key.clone(),
            years,
            current_expiration,
        };
        self.execute(mode, cost, &action, options).await
    }

    /// Start an inbound transfer, debiting `cost` from the reseller balance
    pub async fn transfer(
        &self,
        mode: RegistryMode,
        key: &DomainKey,
        auth_code: &str,
        cost: Decimal,
        options: ActionOptions,
    ) -> WorkflowResult {
        let action = PaidAction::Transfer {
            key: key.clone(),
            auth_code: auth_code.to_string(),
        };
        self.execute(mode, cost, &action, options).await
    }

    /// Buy WHOIS privacy, debiting `cost` from the reseller balance
    pub async fn purchase_privacy(
        &self,
        mode: RegistryMode,
        key: &DomainKey,
        years: u32,
        cost: Decimal,
        options: ActionOptions,
    ) -> WorkflowResult {
        let action = PaidAction::PurchasePrivacy {
            key: key.clone(),
            years,
        };
        self.execute(mode, cost, &action, options).await
    }

    /// Run `action` under the balance check / refill / verify sequence
    pub async fn execute(
        &self,
        mode: RegistryMode,
        cost: Decimal,
        action: &PaidAction,
        options: ActionOptions,
    ) -> WorkflowResult {
        let domain = action.domain();
        let mut result = WorkflowResult::new(options.dry_run);

        result.start(Step::CheckBalance);
        let balance = match self.balance(mode).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(%domain, %mode, error = %e, "balance query failed");
                return result.fail(FailureKind::BalanceQueryFailed, e.to_string());
            }
        };
        result.balance_before = Some(balance);
        result.complete(Step::CheckBalance);

        result.start(Step::ComputeRefill);
        let decision = self.policy.compute(cost, balance);
        result.refill = Some(decision.clone());
        result.complete(Step::ComputeRefill);
        debug!(%domain, %cost, %balance, needs_refill = decision.needs_refill, reason = %decision.reason, "refill decision");

        if decision.needs_refill && !options.allow_auto_refill {
            let e = Error::InsufficientBalance {
                required: cost,
                available: balance,
            };
            info!(%domain, %mode, %cost, %balance, "auto-refill disabled, not attempting {}", action.name());
            return result.fail(FailureKind::InsufficientBalance, e.to_string());
        }

        if options.dry_run {
            result.start(Step::DryRun);
            result.complete(Step::DryRun);
            result.message = Some("dry run completed".to_string());
            info!(%domain, %mode, action = action.name(), "dry run completed");
            return result.succeed();
        }

        if decision.needs_refill {
            result.start(Step::RefillBalance);
            let refill = bounded(
                "registry.refill",
                self.call_timeout,
                self.ledger.refill(mode, decision.refill_amount),
            )
            .await;
            match refill {
                Ok(receipt) => {
                    info!(%domain, %mode, amount = %decision.refill_amount, transaction = %receipt.transaction_id, "reseller balance refilled");
                }
                Err(e) => {
                    error!(%domain, %mode, amount = %decision.refill_amount, error = %e, "balance refill failed");
                    return result.fail(FailureKind::RefillFailed, e.to_string());
                }
            }
            result.complete(Step::RefillBalance);

            result.start(Step::VerifyRefill);
            let refreshed = match self.balance(mode).await {
                Ok(refreshed) => refreshed,
                Err(e) => {
                    warn!(%domain, %mode, error = %e, "balance query after refill failed");
                    return result.fail(FailureKind::BalanceQueryFailed, e.to_string());
                }
            };
            if refreshed < cost {
                error!(%domain, %mode, %cost, balance = %refreshed, "balance still insufficient after refill");
                return result.fail(
                    FailureKind::RefillFailed,
                    format!(
                        "Balance {} still below cost {} after refill of {}",
                        refreshed, cost, decision.refill_amount
                    ),
                );
            }
            result.complete(Step::VerifyRefill);
        }

        result.start(Step::PerformAction);
        match self.perform(mode, action).await {
            Ok(receipt) => {
                info!(%domain, %mode, action = action.name(), %cost, "registry action completed");
                result.receipt = Some(receipt);
                result.complete(Step::PerformAction);
            }
            Err(e) => {
                warn!(%domain, %mode, action = action.name(), error = %e, "registry action reported an error, verifying");
                result.start(Step::VerifyAction);
                match self.verify(mode, action).await {
                    Some(receipt) => {
                        warn!(%domain, %mode, action = action.name(), "registry shows the action took effect despite the error");
                        result.receipt = Some(receipt);
                        result.complete(Step::VerifyAction);
                    }
                    None => {
                        error!(%domain, %mode, action = action.name(), error = %e, "registry action failed");
                        return result.fail(FailureKind::RegistryActionFailed, e.to_string());
                    }
                }
            }
        }

        result.start(Step::FinalBalance);
        match self.balance(mode).await {
            Ok(after) => {
                result.balance_after = Some(after);
                result.complete(Step::FinalBalance);
            }
            Err(e) => {
                warn!(%domain, %mode, error = %e, "final balance query failed; action already succeeded");
            }
        }

        result.succeed()
    }

    async fn balance(&self, mode: RegistryMode) -> Result<Decimal> {
        bounded("registry.balance", self.call_timeout, self.ledger.balance(mode)).await
    }

    async fn perform(&self, mode: RegistryMode, action: &PaidAction) -> Result<ActionReceipt> {
        let limit = self.call_timeout;
        match action {
            PaidAction::Register {
                key,
                years,
                nameservers,
            } => {
                bounded(
                    "registry.register",
                    limit,
                    self.ledger.register(mode, key, *years, nameservers),
                )
                .await
            }
            PaidAction::Renew { key, years, .. } => {
                bounded("registry.renew", limit, self.ledger.renew(mode, key, *years)).await
            }
            PaidAction::Transfer { key, auth_code } => {
                bounded(
                    "registry.transfer",
                    limit,
                    self.ledger.transfer(mode, key, auth_code),
                )
                .await
            }
            PaidAction::PurchasePrivacy { key, years } => {
                bounded(
                    "registry.purchase_privacy",
                    limit,
                    self.ledger.purchase_privacy(mode, key, *years),
                )
                .await?;
                Ok(ActionReceipt {
                    order_id: None,
                    expiration: None,
                })
            }
        }
    }

    /// Ask the registry whether an errored action took effect anyway
    ///
    /// Returns a receipt built from the observed state when it did. A failed
    /// verification query counts as "did not take effect".
    async fn verify(&self, mode: RegistryMode, action: &PaidAction) -> Option<ActionReceipt> {
        let limit = self.call_timeout;
        match action {
            PaidAction::Register { key, .. } => {
                let info = bounded("registry.domain_info", limit, self.ledger.domain_info(mode, key))
                    .await
                    .ok()?;
                Some(ActionReceipt {
                    order_id: None,
                    expiration: info.expiration,
                })
            }
            PaidAction::Renew {
                key,
                current_expiration,
                ..
            } => {
                let info = bounded("registry.domain_info", limit, self.ledger.domain_info(mode, key))
                    .await
                    .ok()?;
                match (info.expiration, current_expiration) {
                    (Some(observed), Some(before)) if observed > *before => Some(ActionReceipt {
                        order_id: None,
                        expiration: Some(observed),
                    }),
                    _ => None,
                }
            }
            PaidAction::Transfer { key, .. } => {
                let state = bounded(
                    "registry.transfer_status",
                    limit,
                    self.ledger.transfer_status(mode, key),
                )
                .await
                .ok()?;
                match state {
                    TransferState::Pending | TransferState::Completed => Some(ActionReceipt {
                        order_id: None,
                        expiration: None,
                    }),
                    TransferState::Failed => None,
                }
            }
            PaidAction::PurchasePrivacy { key, .. } => {
                let status = bounded(
                    "registry.privacy_status",
                    limit,
                    self.ledger.privacy_status(mode, key),
                )
                .await
                .ok()?;
                status.purchased.then_some(ActionReceipt {
                    order_id: None,
                    expiration: None,
                })
            }
        }
    }
}

/// Audit row for the balance top-up a workflow performed, if any
pub fn refill_transaction(
    result: &WorkflowResult,
    mode: RegistryMode,
    now: DateTime<Utc>,
) -> Option<BalanceTransaction> {
    if !result.completed(Step::RefillBalance) {
        return None;
    }
    let decision = result.refill.as_ref()?;
    Some(BalanceTransaction::new(
        TransactionKind::Refill,
        decision.refill_amount,
        mode,
        now,
    ))
}
