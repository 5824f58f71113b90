//! Suspension: nameserver quarantine and restore
//!
//! Suspending a domain snapshots its nameservers and points it at the
//! quarantine set. Unsuspending pushes the snapshot back. Status changes
//! always go through even when the registry push fails; the snapshot stays
//! on the row so nothing is lost.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::lock::DomainLocks;
use crate::model::{Domain, DomainKey, DomainStatus};
use crate::timeout::bounded;
use crate::traits::{RegistryLedger, ResellStore};

/// What happened to the nameservers during a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NameserverAction {
    Quarantined,
    QuarantineFailed,
    Restored,
    RestoreFailed,
    RestoreSkippedInvalidSnapshot,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub from: DomainStatus,
    pub to: DomainStatus,
    pub nameserver_action: NameserverAction,
}

/// Applies status transitions and the nameserver swap that goes with them
pub struct SuspensionController {
    store: Arc<dyn ResellStore>,
    ledger: Arc<dyn RegistryLedger>,
    locks: DomainLocks,
    quarantine: Vec<String>,
    call_timeout: Duration,
}

impl SuspensionController {
    /// The quarantine set needs at least two nameservers
    pub fn new(
        store: Arc<dyn ResellStore>,
        ledger: Arc<dyn RegistryLedger>,
        locks: DomainLocks,
        quarantine: Vec<String>,
        call_timeout: Duration,
    ) -> Result<Self> {
        if quarantine.len() < 2 {
            return Err(Error::config(format!(
                "Quarantine nameserver set needs at least 2 entries, got {}",
                quarantine.len()
            )));
        }
        Ok(Self {
            store,
            ledger,
            locks,
            quarantine,
            call_timeout,
        })
    }

    pub fn quarantine_nameservers(&self) -> &[String] {
        &self.quarantine
    }

    pub async fn suspend(&self, key: &DomainKey) -> Result<StatusChange> {
        self.set_status(key, DomainStatus::Suspended).await
    }

    pub async fn unsuspend(&self, key: &DomainKey) -> Result<StatusChange> {
        self.set_status(key, DomainStatus::Active).await
    }

    /// Move `key` to status `to`, swapping nameservers on suspend edges
    pub async fn set_status(&self, key: &DomainKey, to: DomainStatus) -> Result<StatusChange> {
        let _guard = self.locks.acquire(key).await;

        let mut domain = bounded("store.get_domain", self.call_timeout, self.store.get_domain(key))
            .await?
            .ok_or_else(|| Error::not_found(format!("domain {}", key)))?;
        let from = domain.status;

        let nameserver_action = match (from, to) {
            (from, to) if from == to => NameserverAction::None,
            (_, DomainStatus::Suspended) => self.quarantine(&mut domain).await?,
            (DomainStatus::Suspended, to) => self.restore(&mut domain, to).await?,
            (_, to) => {
                domain.status = to;
                self.save(&domain).await?;
                NameserverAction::None
            }
        };

        info!(domain = %key, ?from, ?to, ?nameserver_action, "status changed");
        Ok(StatusChange {
            from,
            to,
            nameserver_action,
        })
    }

    async fn quarantine(&self, domain: &mut Domain) -> Result<NameserverAction> {
        match &domain.suspended_original_nameservers {
            Some(existing) => {
                warn!(domain = %domain.key, snapshot = ?existing, "snapshot already present, keeping it");
            }
            None => {
                domain.suspended_original_nameservers = Some(domain.nameservers.clone());
            }
        }
        domain.status = DomainStatus::Suspended;
        self.save(domain).await?;

        let pushed = bounded(
            "registry.set_nameservers",
            self.call_timeout,
            self.ledger
                .set_nameservers(domain.registry_mode, &domain.key, &self.quarantine),
        )
        .await;

        match pushed {
            Ok(()) => {
                domain.nameservers = self.quarantine.clone();
                self.save(domain).await?;
                Ok(NameserverAction::Quarantined)
            }
            Err(e) => {
                warn!(domain = %domain.key, error = %e, "failed to push quarantine nameservers; snapshot retained");
                Ok(NameserverAction::QuarantineFailed)
            }
        }
    }

    async fn restore(&self, domain: &mut Domain, to: DomainStatus) -> Result<NameserverAction> {
        domain.status = to;

        let action = match domain.suspended_original_nameservers.clone() {
            None => NameserverAction::None,
            Some(snapshot) if snapshot.len() < 2 => {
                warn!(domain = %domain.key, ?snapshot, "snapshot has fewer than two nameservers, restore skipped");
                NameserverAction::RestoreSkippedInvalidSnapshot
            }
            Some(snapshot) => {
                let pushed = bounded(
                    "registry.set_nameservers",
                    self.call_timeout,
                    self.ledger
                        .set_nameservers(domain.registry_mode, &domain.key, &snapshot),
                )
                .await;
                match pushed {
                    Ok(()) => {
                        domain.nameservers = snapshot;
                        domain.suspended_original_nameservers = None;
                        NameserverAction::Restored
                    }
                    Err(e) => {
                        warn!(domain = %domain.key, error = %e, "failed to restore nameservers; snapshot retained");
                        NameserverAction::RestoreFailed
                    }
                }
            }
        };

        self.save(domain).await?;
        Ok(action)
    }

    async fn save(&self, domain: &Domain) -> Result<()> {
        bounded("store.save_domain", self.call_timeout, self.store.save_domain(domain)).await
    }
}
