// # Memory Store
//
// In-memory implementation of ResellStore.
//
// ## Purpose
//
// Provides a simple, fast store that doesn't persist across restarts.
// Useful for testing and for dry runs against a test registry.
//
// ## Crash Behavior
//
// - All rows are lost on restart/crash, reconciliation records included
// - Never use it for production-mode money movement

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{Tables, tld_key};
use crate::Error;
use crate::model::{
    BalanceTransaction, Cart, Customer, Domain, DomainKey, PushRequest, ReconciliationRecord,
    TldPricing, TransferRecord,
};
use crate::traits::store::{ResellStore, ResellStoreFactory};

/// In-memory store implementation
///
/// All tables live behind one RwLock. Clones share the same tables, which
/// lets tests keep a handle while the workflows own another.
///
/// # Example
///
/// ```rust,no_run
/// use resell_core::state::MemoryStore;
/// use resell_core::traits::ResellStore;
/// use resell_core::model::{Domain, DomainKey, RegistryMode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStore::new();
///     let key = DomainKey::parse("example.com")?;
///     store.save_domain(&Domain::new(key.clone(), "cus_1", RegistryMode::Test)).await?;
///     assert!(store.get_domain(&key).await?.is_some());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of domains in the store
    pub async fn domain_count(&self) -> usize {
        self.inner.read().await.domains.len()
    }

    /// Clear all tables
    pub async fn clear(&self) {
        *self.inner.write().await = Tables::default();
    }
}

#[async_trait]
impl ResellStore for MemoryStore {
    async fn get_domain(&self, key: &DomainKey) -> Result<Option<Domain>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.domains.get(&key.to_string()).cloned())
    }

    async fn save_domain(&self, domain: &Domain) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.domains.insert(domain.key.to_string(), domain.clone());
        Ok(())
    }

    async fn list_domains(&self) -> Result<Vec<Domain>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.domains.values().cloned().collect())
    }

    async fn get_customer(&self, id: &str) -> Result<Option<Customer>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.customers.get(id).cloned())
    }

    async fn save_customer(&self, customer: &Customer) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.customers.insert(customer.id.clone(), customer.clone());
        Ok(())
    }

    async fn get_pricing(&self, tld: &str) -> Result<Option<TldPricing>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.pricing.get(&tld_key(tld)).cloned())
    }

    async fn save_pricing(&self, pricing: &TldPricing) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.pricing.insert(tld_key(&pricing.tld), pricing.clone());
        Ok(())
    }

    async fn insert_reconciliation(&self, record: &ReconciliationRecord) -> Result<(), Error> {
        self.inner.write().await.upsert_reconciliation(record);
        Ok(())
    }

    async fn list_reconciliations(&self) -> Result<Vec<ReconciliationRecord>, Error> {
        Ok(self.inner.read().await.reconciliations.clone())
    }

    async fn insert_transaction(&self, transaction: &BalanceTransaction) -> Result<(), Error> {
        self.inner.write().await.upsert_transaction(transaction);
        Ok(())
    }

    async fn list_transactions(&self) -> Result<Vec<BalanceTransaction>, Error> {
        Ok(self.inner.read().await.transactions.clone())
    }

    async fn save_transfer(&self, transfer: &TransferRecord) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard
            .transfers
            .insert(transfer.domain.to_string(), transfer.clone());
        Ok(())
    }

    async fn list_transfers(&self) -> Result<Vec<TransferRecord>, Error> {
        Ok(self.inner.read().await.transfers.values().cloned().collect())
    }

    async fn save_cart(&self, cart: &Cart) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.carts.insert(cart.id.clone(), cart.clone());
        Ok(())
    }

    async fn purge_carts(&self, older_than: DateTime<Utc>) -> Result<usize, Error> {
        Ok(self.inner.write().await.purge_carts(older_than))
    }

    async fn save_push_request(&self, request: &PushRequest) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.push_requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn list_push_requests(&self) -> Result<Vec<PushRequest>, Error> {
        Ok(self.inner.read().await.push_requests.values().cloned().collect())
    }

    async fn expire_push_requests(&self, now: DateTime<Utc>) -> Result<usize, Error> {
        Ok(self.inner.write().await.expire_push_requests(now))
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing buffered
        Ok(())
    }
}

/// Factory for [`MemoryStore`]
pub struct MemoryStoreFactory;

#[async_trait]
impl ResellStoreFactory for MemoryStoreFactory {
    async fn create(&self, _config: &serde_json::Value) -> Result<Arc<dyn ResellStore>, Error> {
        Ok(Arc::new(MemoryStore::new()))
    }
}
