// # Resell Store Trait
//
// Defines the persistence interface for the rows the core reads and writes.
//
// ## Purpose
//
// The relational schema lives outside this crate. The core only needs a
// key-value-by-id view with per-row atomicity:
// - Domains (keyed by `sld.tld`)
// - Customers and TLD pricing (read-mostly)
// - Reconciliation records and balance transactions (append)
// - Transfers, carts and push requests (maintenance jobs)
//
// ## Implementations
//
// - In-memory: `MemoryStore`
// - JSON file: `FileStore`
// - Database adapters: registered through `BackendRegistry`

use crate::model::{
    BalanceTransaction, Cart, Customer, Domain, DomainKey, PushRequest, ReconciliationRecord,
    TldPricing, TransferRecord, TransferState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Trait for store implementations
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage (files, databases, etc.)
/// - ✅ Implement locking/concurrency control for thread safety
///
/// ## Forbidden Capabilities
/// - ❌ Call the registry or the payment processor
/// - ❌ Decide workflow transitions (owned by the workflows)
/// - ❌ Spawn background tasks
///
/// All methods must be safe to call concurrently. A successful write must be
/// durable before the method returns: callers rely on a persisted
/// reconciliation record surviving a crash.
#[async_trait]
pub trait ResellStore: Send + Sync {
    /// Load a domain by key
    async fn get_domain(&self, key: &DomainKey) -> Result<Option<Domain>, crate::Error>;

    /// Create or replace a domain row
    async fn save_domain(&self, domain: &Domain) -> Result<(), crate::Error>;

    /// All domains, in key order
    async fn list_domains(&self) -> Result<Vec<Domain>, crate::Error>;

    /// Load a customer by id
    async fn get_customer(&self, id: &str) -> Result<Option<Customer>, crate::Error>;

    /// Create or replace a customer row
    async fn save_customer(&self, customer: &Customer) -> Result<(), crate::Error>;

    /// Pricing row for a TLD
    async fn get_pricing(&self, tld: &str) -> Result<Option<TldPricing>, crate::Error>;

    /// Create or replace a pricing row
    async fn save_pricing(&self, pricing: &TldPricing) -> Result<(), crate::Error>;

    /// Append a reconciliation record
    async fn insert_reconciliation(
        &self,
        record: &ReconciliationRecord,
    ) -> Result<(), crate::Error>;

    /// All reconciliation records, oldest first
    async fn list_reconciliations(&self) -> Result<Vec<ReconciliationRecord>, crate::Error>;

    /// Append a balance transaction audit row
    async fn insert_transaction(
        &self,
        transaction: &BalanceTransaction,
    ) -> Result<(), crate::Error>;

    /// All balance transactions, oldest first
    async fn list_transactions(&self) -> Result<Vec<BalanceTransaction>, crate::Error>;

    /// Create or replace a transfer row
    async fn save_transfer(&self, transfer: &TransferRecord) -> Result<(), crate::Error>;

    /// All transfer rows
    async fn list_transfers(&self) -> Result<Vec<TransferRecord>, crate::Error>;

    /// Create or replace a cart row
    async fn save_cart(&self, cart: &Cart) -> Result<(), crate::Error>;

    /// Delete carts not touched since `older_than`; returns how many went
    async fn purge_carts(&self, older_than: DateTime<Utc>) -> Result<usize, crate::Error>;

    /// Create or replace a push request
    async fn save_push_request(&self, request: &PushRequest) -> Result<(), crate::Error>;

    /// All push requests
    async fn list_push_requests(&self) -> Result<Vec<PushRequest>, crate::Error>;

    /// Mark open push requests past their expiry as expired; returns how many
    async fn expire_push_requests(&self, now: DateTime<Utc>) -> Result<usize, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;

    /// Unresolved reconciliation record for a domain, if any
    async fn open_reconciliation_for(
        &self,
        key: &DomainKey,
    ) -> Result<Option<ReconciliationRecord>, crate::Error> {
        Ok(self
            .list_reconciliations()
            .await?
            .into_iter()
            .find(|record| record.domain == *key && record.is_open()))
    }

    /// Transfers still waiting on the registry
    async fn pending_transfers(&self) -> Result<Vec<TransferRecord>, crate::Error> {
        Ok(self
            .list_transfers()
            .await?
            .into_iter()
            .filter(|transfer| transfer.state == TransferState::Pending)
            .collect())
    }
}

/// Helper trait for constructing stores from configuration
#[async_trait]
pub trait ResellStoreFactory: Send + Sync {
    /// Create a store from the serialized `StoreConfig`
    async fn create(
        &self,
        config: &serde_json::Value,
    ) -> Result<std::sync::Arc<dyn ResellStore>, crate::Error>;
}
