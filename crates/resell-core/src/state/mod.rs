// # Store Implementations
//
// This module provides implementations of the ResellStore trait for
// different persistence strategies. Both share the same table set so the
// in-memory store behaves exactly like the file store minus durability.

pub mod file;
pub mod memory;

pub use file::{FileStore, FileStoreFactory};
pub use memory::{MemoryStore, MemoryStoreFactory};

use crate::model::{
    BalanceTransaction, Cart, Customer, Domain, PushRequest, PushRequestState,
    ReconciliationRecord, TldPricing, TransferRecord,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every table the store keeps, keyed the way lookups happen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    /// Keyed by `sld.tld`
    #[serde(default)]
    pub domains: BTreeMap<String, Domain>,
    #[serde(default)]
    pub customers: BTreeMap<String, Customer>,
    /// Keyed by lowercase TLD
    #[serde(default)]
    pub pricing: BTreeMap<String, TldPricing>,
    #[serde(default)]
    pub reconciliations: Vec<ReconciliationRecord>,
    #[serde(default)]
    pub transactions: Vec<BalanceTransaction>,
    /// Keyed by `sld.tld`
    #[serde(default)]
    pub transfers: BTreeMap<String, TransferRecord>,
    #[serde(default)]
    pub carts: BTreeMap<String, Cart>,
    #[serde(default)]
    pub push_requests: BTreeMap<String, PushRequest>,
}

impl Tables {
    /// Insert or replace by id, keeping insertion order for new records
    pub fn upsert_reconciliation(&mut self, record: &ReconciliationRecord) {
        match self.reconciliations.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => self.reconciliations.push(record.clone()),
        }
    }

    pub fn upsert_transaction(&mut self, transaction: &BalanceTransaction) {
        match self.transactions.iter_mut().find(|t| t.id == transaction.id) {
            Some(existing) => *existing = transaction.clone(),
            None => self.transactions.push(transaction.clone()),
        }
    }

    pub fn purge_carts(&mut self, older_than: DateTime<Utc>) -> usize {
        let before = self.carts.len();
        self.carts.retain(|_, cart| cart.updated_at >= older_than);
        before - self.carts.len()
    }

    pub fn expire_push_requests(&mut self, now: DateTime<Utc>) -> usize {
        let mut expired = 0;
        for request in self.push_requests.values_mut() {
            if request.state == PushRequestState::Open && request.expires_at <= now {
                request.state = PushRequestState::Expired;
                expired += 1;
            }
        }
        expired
    }
}

/// Normalized pricing key
pub(crate) fn tld_key(tld: &str) -> String {
    tld.trim().trim_start_matches('.').to_ascii_lowercase()
}
