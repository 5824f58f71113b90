//! Wiring of backends, workflows and the scheduler
//!
//! [`Services::build`] turns a validated [`ResellConfig`] plus a
//! [`BackendRegistry`] into the running object graph. All workflows share
//! one [`DomainLocks`] table and one orchestrator.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::auto_renew::AutoRenewWorkflow;
use crate::config::ResellConfig;
use crate::error::Result;
use crate::jobs::{JobDependencies, register_default_jobs};
use crate::lock::DomainLocks;
use crate::orchestrator::SmartActionOrchestrator;
use crate::privacy::PrivacyProvisioner;
use crate::registry::BackendRegistry;
use crate::scheduler::{Clock, JobScheduler, SchedulerEvent};
use crate::suspension::SuspensionController;
use crate::traits::{NotificationSender, PaymentCollector, RegistryLedger, ResellStore};

pub struct Services {
    pub store: Arc<dyn ResellStore>,
    pub ledger: Arc<dyn RegistryLedger>,
    pub payments: Arc<dyn PaymentCollector>,
    pub notifier: Arc<dyn NotificationSender>,
    pub orchestrator: Arc<SmartActionOrchestrator>,
    pub auto_renew: Arc<AutoRenewWorkflow>,
    pub suspension: Arc<SuspensionController>,
    pub privacy: Arc<PrivacyProvisioner>,
    pub scheduler: Arc<JobScheduler>,
    pub locks: DomainLocks,
}

impl Services {
    /// Build everything and register the default jobs (not started)
    pub async fn build(
        config: &ResellConfig,
        registry: &BackendRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, mpsc::Receiver<SchedulerEvent>)> {
        config.validate()?;

        let store = registry.create_store(&config.store).await?;
        let ledger = registry.create_ledger(&config.ledger)?;
        let payments = registry.create_payments(&config.payments)?;
        let notifier = registry.create_notifier(&config.notifier)?;
        info!(
            ledger = ledger.ledger_name(),
            payments = payments.processor_name(),
            notifier = notifier.sender_name(),
            store = config.store.type_name(),
            mode = %config.mode,
            "backends created"
        );

        let call_timeout = config.timeouts.call_timeout();
        let locks = DomainLocks::new();
        let orchestrator = Arc::new(SmartActionOrchestrator::new(
            ledger.clone(),
            config.refill.policy()?,
            call_timeout,
        ));
        let auto_renew = Arc::new(AutoRenewWorkflow::new(
            store.clone(),
            payments.clone(),
            notifier.clone(),
            orchestrator.clone(),
            locks.clone(),
            config.auto_renew_settings(),
        ));
        let suspension = Arc::new(SuspensionController::new(
            store.clone(),
            ledger.clone(),
            locks.clone(),
            config.suspension.quarantine_nameservers.clone(),
            call_timeout,
        )?);
        let privacy = Arc::new(PrivacyProvisioner::new(
            store.clone(),
            orchestrator.clone(),
            locks.clone(),
            config.refill.allow_auto_refill,
        ));

        let (scheduler, events) = JobScheduler::new(clock, config.scheduler.event_channel_capacity);
        register_default_jobs(
            &scheduler,
            &config.scheduler,
            JobDependencies {
                store: store.clone(),
                ledger: ledger.clone(),
                auto_renew: auto_renew.clone(),
                locks: locks.clone(),
                call_timeout,
            },
        )
        .await?;

        let services = Self {
            store,
            ledger,
            payments,
            notifier,
            orchestrator,
            auto_renew,
            suspension,
            privacy,
            scheduler: Arc::new(scheduler),
            locks,
        };
        Ok((services, events))
    }
}
