//! The recurring jobs the daemon schedules
//!
//! | Job                   | Does                                              |
//! |-----------------------|---------------------------------------------------|
//! | `domain_sync`         | pulls expiration/nameservers/privacy from registry |
//! | `auto_renew`          | runs [`AutoRenewWorkflow`]                         |
//! | `cart_cleanup`        | purges abandoned carts                             |
//! | `transfer_poll`       | advances pending inbound transfers                 |
//! | `push_request_expiry` | expires stale push requests                        |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::auto_renew::AutoRenewWorkflow;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::lock::DomainLocks;
use crate::model::{DomainStatus, TransferState};
use crate::scheduler::{JobHandler, JobScheduler};
use crate::timeout::bounded;
use crate::traits::{RegistryLedger, ResellStore};

pub const DOMAIN_SYNC: &str = "domain_sync";
pub const AUTO_RENEW: &str = "auto_renew";
pub const CART_CLEANUP: &str = "cart_cleanup";
pub const TRANSFER_POLL: &str = "transfer_poll";
pub const PUSH_REQUEST_EXPIRY: &str = "push_request_expiry";

/// Every job registered by [`register_default_jobs`]
pub const ALL: [&str; 5] = [DOMAIN_SYNC, AUTO_RENEW, CART_CLEANUP, TRANSFER_POLL, PUSH_REQUEST_EXPIRY];

/// Refresh local domain rows from the registry's authoritative view
pub struct DomainSyncJob {
    store: Arc<dyn ResellStore>,
    ledger: Arc<dyn RegistryLedger>,
    locks: DomainLocks,
    call_timeout: Duration,
}

impl DomainSyncJob {
    pub fn new(
        store: Arc<dyn ResellStore>,
        ledger: Arc<dyn RegistryLedger>,
        locks: DomainLocks,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            locks,
            call_timeout,
        }
    }
}

#[async_trait]
impl JobHandler for DomainSyncJob {
    async fn run(&self, _now: DateTime<Utc>) -> Result<()> {
        let keys: Vec<_> = bounded("store.list_domains", self.call_timeout, self.store.list_domains())
            .await?
            .into_iter()
            .filter(|d| d.status != DomainStatus::Expired)
            .map(|d| d.key)
            .collect();

        let mut updated = 0usize;
        let mut failed = 0usize;
        for key in &keys {
            let _guard = self.locks.acquire(key).await;
            // Re-read under the lock
            let Some(mut domain) =
                bounded("store.get_domain", self.call_timeout, self.store.get_domain(key)).await?
            else {
                continue;
            };

            let info = match bounded(
                "registry.domain_info",
                self.call_timeout,
                self.ledger.domain_info(domain.registry_mode, key),
            )
            .await
            {
                Ok(info) => info,
                Err(e) => {
                    warn!(domain = %key, error = %e, "domain sync failed");
                    failed += 1;
                    continue;
                }
            };

            let mut changed = false;
            if info.expiration.is_some() && info.expiration != domain.expiration_date {
                domain.expiration_date = info.expiration;
                changed = true;
            }
            if !info.nameservers.is_empty() && info.nameservers != domain.nameservers {
                domain.nameservers = info.nameservers;
                changed = true;
            }
            if info.privacy_enabled != domain.privacy_enabled {
                domain.privacy_enabled = info.privacy_enabled;
                changed = true;
            }

            if changed {
                bounded("store.save_domain", self.call_timeout, self.store.save_domain(&domain)).await?;
                debug!(domain = %key, "domain updated from registry");
                updated += 1;
            }
        }

        info!(domains = keys.len(), updated, failed, "domain sync finished");
        if failed > 0 {
            return Err(Error::registry(
                self.ledger.ledger_name(),
                format!("{} of {} domains could not be synced", failed, keys.len()),
            ));
        }
        Ok(())
    }
}

/// Scheduled wrapper around [`AutoRenewWorkflow::run`]
pub struct AutoRenewJob {
    workflow: Arc<AutoRenewWorkflow>,
}

impl AutoRenewJob {
    pub fn new(workflow: Arc<AutoRenewWorkflow>) -> Self {
        Self { workflow }
    }
}

#[async_trait]
impl JobHandler for AutoRenewJob {
    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        let report = self.workflow.run(now).await?;
        if report.reconciliation_required > 0 {
            warn!(
                count = report.reconciliation_required,
                "auto-renew left domains awaiting manual reconciliation"
            );
        }
        Ok(())
    }
}

/// Delete carts untouched for longer than `max_age`
pub struct CartCleanupJob {
    store: Arc<dyn ResellStore>,
    max_age: chrono::Duration,
    call_timeout: Duration,
}

impl CartCleanupJob {
    pub fn new(store: Arc<dyn ResellStore>, max_age: chrono::Duration, call_timeout: Duration) -> Self {
        Self {
            store,
            max_age,
            call_timeout,
        }
    }
}

#[async_trait]
impl JobHandler for CartCleanupJob {
    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        let purged = bounded(
            "store.purge_carts",
            self.call_timeout,
            self.store.purge_carts(now - self.max_age),
        )
        .await?;
        info!(purged, "abandoned carts purged");
        Ok(())
    }
}

/// Poll the registry for pending inbound transfers
pub struct TransferPollJob {
    store: Arc<dyn ResellStore>,
    ledger: Arc<dyn RegistryLedger>,
    locks: DomainLocks,
    call_timeout: Duration,
}

impl TransferPollJob {
    pub fn new(
        store: Arc<dyn ResellStore>,
        ledger: Arc<dyn RegistryLedger>,
        locks: DomainLocks,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            locks,
            call_timeout,
        }
    }
}

#[async_trait]
impl JobHandler for TransferPollJob {
    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        let pending = bounded("store.pending_transfers", self.call_timeout, self.store.pending_transfers()).await?;
        let mut failed = 0usize;

        for mut transfer in pending {
            let state = match bounded(
                "registry.transfer_status",
                self.call_timeout,
                self.ledger.transfer_status(transfer.registry_mode, &transfer.domain),
            )
            .await
            {
                Ok(state) => state,
                Err(e) => {
                    warn!(domain = %transfer.domain, error = %e, "transfer status check failed");
                    failed += 1;
                    continue;
                }
            };

            transfer.state = state;
            transfer.last_checked_at = Some(now);
            bounded("store.save_transfer", self.call_timeout, self.store.save_transfer(&transfer)).await?;

            match state {
                TransferState::Completed => {
                    let _guard = self.locks.acquire(&transfer.domain).await;
                    if let Some(mut domain) =
                        bounded("store.get_domain", self.call_timeout, self.store.get_domain(&transfer.domain)).await?
                        && domain.status == DomainStatus::Pending
                    {
                        domain.status = DomainStatus::Active;
                        bounded("store.save_domain", self.call_timeout, self.store.save_domain(&domain)).await?;
                    }
                    info!(domain = %transfer.domain, "transfer completed");
                }
                TransferState::Failed => warn!(domain = %transfer.domain, "transfer failed at registry"),
                TransferState::Pending => debug!(domain = %transfer.domain, "transfer still pending"),
            }
        }

        if failed > 0 {
            return Err(Error::registry(
                self.ledger.ledger_name(),
                format!("{} transfer status check(s) failed", failed),
            ));
        }
        Ok(())
    }
}

/// Mark open push requests past their deadline as expired
pub struct PushRequestExpiryJob {
    store: Arc<dyn ResellStore>,
    call_timeout: Duration,
}

impl PushRequestExpiryJob {
    pub fn new(store: Arc<dyn ResellStore>, call_timeout: Duration) -> Self {
        Self { store, call_timeout }
    }
}

#[async_trait]
impl JobHandler for PushRequestExpiryJob {
    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        let expired = bounded(
            "store.expire_push_requests",
            self.call_timeout,
            self.store.expire_push_requests(now),
        )
        .await?;
        info!(expired, "push requests expired");
        Ok(())
    }
}

/// Everything the default jobs need
pub struct JobDependencies {
    pub store: Arc<dyn ResellStore>,
    pub ledger: Arc<dyn RegistryLedger>,
    pub auto_renew: Arc<AutoRenewWorkflow>,
    pub locks: DomainLocks,
    pub call_timeout: Duration,
}

/// Register the five standard jobs with their configured recurrences
pub async fn register_default_jobs(
    scheduler: &JobScheduler,
    config: &SchedulerConfig,
    deps: JobDependencies,
) -> Result<()> {
    let JobDependencies {
        store,
        ledger,
        auto_renew,
        locks,
        call_timeout,
    } = deps;

    scheduler
        .schedule(
            DOMAIN_SYNC,
            &config.domain_sync,
            DomainSyncJob::new(store.clone(), ledger.clone(), locks.clone(), call_timeout),
        )
        .await?;
    scheduler
        .schedule(AUTO_RENEW, &config.auto_renew, AutoRenewJob::new(auto_renew))
        .await?;
    scheduler
        .schedule(
            CART_CLEANUP,
            &config.cart_cleanup,
            CartCleanupJob::new(
                store.clone(),
                chrono::Duration::hours(i64::from(config.cart_max_age_hours)),
                call_timeout,
            ),
        )
        .await?;
    scheduler
        .schedule(
            TRANSFER_POLL,
            &config.transfer_poll,
            TransferPollJob::new(store.clone(), ledger, locks, call_timeout),
        )
        .await?;
    scheduler
        .schedule(
            PUSH_REQUEST_EXPIRY,
            &config.push_request_expiry,
            PushRequestExpiryJob::new(store, call_timeout),
        )
        .await?;
    Ok(())
}
