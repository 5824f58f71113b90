//! WHOIS privacy purchase and toggling
//!
//! Purchase is billable, toggling is free. Registry state is re-observed
//! before every decision so repeated enables never buy privacy twice.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::lock::DomainLocks;
use crate::model::{BalanceTransaction, Domain, DomainKey, TransactionKind};
use crate::orchestrator::{ActionOptions, SmartActionOrchestrator, refill_transaction};
use crate::timeout::bounded;
use crate::traits::{PrivacyStatus, ResellStore};
use crate::workflow::WorkflowResult;

/// Outcome of an enable/disable request
#[derive(Debug, Clone, Serialize)]
pub struct PrivacyChange {
    pub domain: DomainKey,
    /// Registry-side state after the operation
    pub enabled: bool,
    pub purchased: bool,
    /// Privacy was bought during this call
    pub cost_incurred: bool,
    /// Set when a purchase went through the orchestrator
    pub workflow: Option<WorkflowResult>,
}

/// Buys and toggles WHOIS privacy for domains
pub struct PrivacyProvisioner {
    store: Arc<dyn ResellStore>,
    orchestrator: Arc<SmartActionOrchestrator>,
    locks: DomainLocks,
    purchase_years: u32,
    allow_auto_refill: bool,
}

impl PrivacyProvisioner {
    pub fn new(
        store: Arc<dyn ResellStore>,
        orchestrator: Arc<SmartActionOrchestrator>,
        locks: DomainLocks,
        allow_auto_refill: bool,
    ) -> Self {
        Self {
            store,
            orchestrator,
            locks,
            purchase_years: 1,
            allow_auto_refill,
        }
    }

    /// Years of privacy bought per purchase (default 1)
    pub fn with_purchase_years(mut self, years: u32) -> Self {
        self.purchase_years = years;
        self
    }

    pub async fn enable(&self, key: &DomainKey, now: DateTime<Utc>) -> Result<PrivacyChange> {
        self.set_privacy(key, true, now).await
    }

    pub async fn disable(&self, key: &DomainKey, now: DateTime<Utc>) -> Result<PrivacyChange> {
        self.set_privacy(key, false, now).await
    }

    /// Bring registry privacy to `enabled`, buying it first when needed
    pub async fn set_privacy(
        &self,
        key: &DomainKey,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<PrivacyChange> {
        let _guard = self.locks.acquire(key).await;
        let limit = self.orchestrator.call_timeout();

        let mut domain = bounded("store.get_domain", limit, self.store.get_domain(key))
            .await?
            .ok_or_else(|| Error::not_found(format!("domain {}", key)))?;
        let mode = domain.registry_mode;
        let ledger = self.orchestrator.ledger();

        if !enabled {
            bounded("registry.set_privacy", limit, ledger.set_privacy(mode, key, false)).await?;
            let status = self.observe(&domain).await.unwrap_or(PrivacyStatus {
                purchased: true,
                enabled: false,
            });
            self.store_flag(&mut domain, status.enabled).await?;
            info!(domain = %key, "privacy disabled");
            return Ok(PrivacyChange {
                domain: key.clone(),
                enabled: status.enabled,
                purchased: status.purchased,
                cost_incurred: false,
                workflow: None,
            });
        }

        let status = bounded("registry.privacy_status", limit, ledger.privacy_status(mode, key)).await?;

        if status.purchased && status.enabled {
            debug!(domain = %key, "privacy already purchased and enabled");
            self.store_flag(&mut domain, true).await?;
            return Ok(PrivacyChange {
                domain: key.clone(),
                enabled: true,
                purchased: true,
                cost_incurred: false,
                workflow: None,
            });
        }

        if status.purchased {
            bounded("registry.set_privacy", limit, ledger.set_privacy(mode, key, true)).await?;
            let observed = self.observe(&domain).await.unwrap_or(PrivacyStatus {
                purchased: true,
                enabled: true,
            });
            self.store_flag(&mut domain, observed.enabled).await?;
            info!(domain = %key, "privacy enabled at no cost");
            return Ok(PrivacyChange {
                domain: key.clone(),
                enabled: observed.enabled,
                purchased: true,
                cost_incurred: false,
                workflow: None,
            });
        }

        let pricing = bounded("store.get_pricing", limit, self.store.get_pricing(&key.tld))
            .await?
            .ok_or_else(|| Error::not_found(format!("pricing for .{}", key.tld)))?;
        let cost = pricing.privacy_cost * rust_decimal::Decimal::from(self.purchase_years);

        let options = ActionOptions {
            allow_auto_refill: self.allow_auto_refill,
            dry_run: false,
        };
        let workflow = self
            .orchestrator
            .purchase_privacy(mode, key, self.purchase_years, cost, options)
            .await;

        if let Some(transaction) = refill_transaction(&workflow, mode, now) {
            self.audit(&transaction).await;
        }

        if !workflow.success {
            let message = workflow
                .error
                .as_ref()
                .map(|f| f.message.clone())
                .unwrap_or_else(|| "privacy purchase failed".to_string());
            warn!(domain = %key, %message, "privacy purchase failed");
            return Err(Error::registry_action(message));
        }

        let transaction = BalanceTransaction::new(TransactionKind::PrivacyPurchase, cost, mode, now)
            .for_domain(&domain);
        self.audit(&transaction).await;
        info!(domain = %key, %cost, "privacy purchased");

        // Some registries enable privacy as part of the purchase
        let mut observed = self.observe(&domain).await.unwrap_or(PrivacyStatus {
            purchased: true,
            enabled: false,
        });
        if !observed.enabled {
            match bounded("registry.set_privacy", limit, ledger.set_privacy(mode, key, true)).await {
                Ok(()) => {
                    observed = self.observe(&domain).await.unwrap_or(PrivacyStatus {
                        purchased: true,
                        enabled: true,
                    });
                }
                Err(e) => {
                    warn!(domain = %key, error = %e, "privacy purchased but enabling failed; enable again later at no cost");
                }
            }
        }

        self.store_flag(&mut domain, observed.enabled).await?;
        Ok(PrivacyChange {
            domain: key.clone(),
            enabled: observed.enabled,
            purchased: true,
            cost_incurred: true,
            workflow: Some(workflow),
        })
    }

    async fn observe(&self, domain: &Domain) -> Option<PrivacyStatus> {
        let ledger = self.orchestrator.ledger();
        match bounded(
            "registry.privacy_status",
            self.orchestrator.call_timeout(),
            ledger.privacy_status(domain.registry_mode, &domain.key),
        )
        .await
        {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(domain = %domain.key, error = %e, "could not re-read privacy status");
                None
            }
        }
    }

    async fn store_flag(&self, domain: &mut Domain, enabled: bool) -> Result<()> {
        if domain.privacy_enabled == enabled {
            return Ok(());
        }
        domain.privacy_enabled = enabled;
        bounded(
            "store.save_domain",
            self.orchestrator.call_timeout(),
            self.store.save_domain(domain),
        )
        .await
    }

    async fn audit(&self, transaction: &BalanceTransaction) {
        if let Err(e) = bounded(
            "store.insert_transaction",
            self.orchestrator.call_timeout(),
            self.store.insert_transaction(transaction),
        )
        .await
        {
            warn!(kind = ?transaction.kind, error = %e, "failed to write audit row");
        }
    }
}
