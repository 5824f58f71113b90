//! Plugin-based backend registry
//!
//! The registry maps backend type names to factories, so the daemon builds
//! ledgers, payment collectors, notifiers and stores from configuration
//! without hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use resell_core::registry::BackendRegistry;
//!
//! let registry = BackendRegistry::with_builtins();
//! resell_notify_webhook::register(&registry);
//!
//! let store = registry.create_store(&config.store).await?;
//! let notifier = registry.create_notifier(&config.notifier)?;
//! ```
//!
//! ## Registration
//!
//! Plugin crates expose a `register` function:
//!
//! ```rust,ignore
//! pub fn register(registry: &BackendRegistry) {
//!     registry.register_notifier("webhook", Box::new(WebhookNotifierFactory));
//! }
//! ```

use crate::config::{BackendConfig, NotifierConfig, StoreConfig};
use crate::error::{Error, Result};
use crate::state::{FileStoreFactory, MemoryStoreFactory};
use crate::traits::{
    LogNotifierFactory, NotificationSender, NotificationSenderFactory, PaymentCollector,
    PaymentCollectorFactory, RegistryLedger, RegistryLedgerFactory, ResellStore,
    ResellStoreFactory,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Backend registry for plugin-based construction
///
/// ## Thread Safety
///
/// Interior mutability with RwLock: concurrent lookups, exclusive
/// registration. Store factories are async, so they are held in `Arc`s and
/// the lock is released before `create` is awaited.
#[derive(Default)]
pub struct BackendRegistry {
    ledgers: RwLock<HashMap<String, Box<dyn RegistryLedgerFactory>>>,
    payments: RwLock<HashMap<String, Box<dyn PaymentCollectorFactory>>>,
    notifiers: RwLock<HashMap<String, Box<dyn NotificationSenderFactory>>>,
    stores: RwLock<HashMap<String, Arc<dyn ResellStoreFactory>>>,
}

impl BackendRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `memory`/`file` stores and `log` notifier
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_store("memory", Box::new(MemoryStoreFactory));
        registry.register_store("file", Box::new(FileStoreFactory));
        registry.register_notifier("log", Box::new(LogNotifierFactory));
        registry
    }

    pub fn register_ledger(&self, name: impl Into<String>, factory: Box<dyn RegistryLedgerFactory>) {
        self.ledgers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), factory);
    }

    pub fn register_payments(
        &self,
        name: impl Into<String>,
        factory: Box<dyn PaymentCollectorFactory>,
    ) {
        self.payments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), factory);
    }

    pub fn register_notifier(
        &self,
        name: impl Into<String>,
        factory: Box<dyn NotificationSenderFactory>,
    ) {
        self.notifiers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), factory);
    }

    pub fn register_store(&self, name: impl Into<String>, factory: Box<dyn ResellStoreFactory>) {
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::from(factory));
    }

    /// Create the registry ledger named by `config.factory`
    pub fn create_ledger(&self, config: &BackendConfig) -> Result<Arc<dyn RegistryLedger>> {
        let ledgers = self.ledgers.read().unwrap_or_else(PoisonError::into_inner);
        let factory = ledgers
            .get(&config.factory)
            .ok_or_else(|| Error::config(format!("Unknown ledger type: {}", config.factory)))?;
        factory.create(&config.config)
    }

    /// Create the payment collector named by `config.factory`
    pub fn create_payments(&self, config: &BackendConfig) -> Result<Arc<dyn PaymentCollector>> {
        let payments = self.payments.read().unwrap_or_else(PoisonError::into_inner);
        let factory = payments.get(&config.factory).ok_or_else(|| {
            Error::config(format!("Unknown payment collector type: {}", config.factory))
        })?;
        factory.create(&config.config)
    }

    pub fn create_notifier(&self, config: &NotifierConfig) -> Result<Arc<dyn NotificationSender>> {
        let notifier_type = config.type_name();
        let notifiers = self.notifiers.read().unwrap_or_else(PoisonError::into_inner);
        let factory = notifiers
            .get(notifier_type)
            .ok_or_else(|| Error::config(format!("Unknown notifier type: {}", notifier_type)))?;
        factory.create(&config.factory_config())
    }

    pub async fn create_store(&self, config: &StoreConfig) -> Result<Arc<dyn ResellStore>> {
        let store_type = config.type_name();
        let factory = self
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(store_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown store type: {}", store_type)))?;

        factory.create(&config.factory_config()).await
    }

    pub fn list_ledgers(&self) -> Vec<String> {
        sorted_keys(&self.ledgers)
    }

    pub fn list_payments(&self) -> Vec<String> {
        sorted_keys(&self.payments)
    }

    pub fn list_notifiers(&self) -> Vec<String> {
        sorted_keys(&self.notifiers)
    }

    pub fn list_stores(&self) -> Vec<String> {
        sorted_keys(&self.stores)
    }

    pub fn has_ledger(&self, name: &str) -> bool {
        self.ledgers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn has_notifier(&self, name: &str) -> bool {
        self.notifiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

fn sorted_keys<V>(map: &RwLock<HashMap<String, V>>) -> Vec<String> {
    let mut keys: Vec<String> = map
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect();
    keys.sort();
    keys
}
