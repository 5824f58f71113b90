//! Collaborator traits for the resale core
//!
//! This module defines the abstract interfaces to the systems the core
//! coordinates but does not own.
//!
//! - [`RegistryLedger`]: reseller balance and paid registry actions
//! - [`PaymentCollector`]: customer charges
//! - [`ResellStore`]: persistence of domains and bookkeeping rows
//! - [`NotificationSender`]: customer notices

pub mod notifier;
pub mod payment_collector;
pub mod registry_ledger;
pub mod store;

pub use notifier::{LogNotifier, LogNotifierFactory, NotificationSender, NotificationSenderFactory};
pub use payment_collector::{ChargeOutcome, PaymentCollector, PaymentCollectorFactory};
pub use registry_ledger::{
    ActionReceipt, PrivacyStatus, RefillReceipt, RegistryDomainInfo, RegistryLedger,
    RegistryLedgerFactory,
};
pub use store::{ResellStore, ResellStoreFactory};
