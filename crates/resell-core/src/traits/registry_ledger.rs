// # Registry Ledger Trait
//
// Defines the interface to the registrar's reseller API: the pre-paid
// reseller balance and the paid/free domain actions debited against it.
//
// ## Registry Mode
//
// Every method takes an explicit `RegistryMode`. Test and production
// registries are disjoint, and a domain must always be operated on with the
// mode it was created under. Implementations hold both credential sets and
// pick one per call; there is no ambient "current mode".
//
// ## Usage
//
// ```rust,ignore
// use resell_core::RegistryLedger;
//
// let balance = ledger.balance(domain.registry_mode).await?;
// let receipt = ledger.renew(domain.registry_mode, &domain.key, 1).await?;
// ```

use crate::model::{DomainKey, RegistryMode, TransferState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Result of a balance top-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefillReceipt {
    /// Registry-side transaction identifier
    pub transaction_id: String,
}

/// Result of a paid domain action (register, renew, transfer)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReceipt {
    /// Registry order identifier, if the registry returns one
    pub order_id: Option<String>,
    /// Expiration after the action, if the registry reports it
    pub expiration: Option<DateTime<Utc>>,
}

/// Authoritative view of a domain at the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryDomainInfo {
    pub expiration: Option<DateTime<Utc>>,
    pub nameservers: Vec<String>,
    pub privacy_enabled: bool,
}

/// WHOIS privacy facts at the registry
///
/// `purchased` is the billable fact; `enabled` is free to toggle once
/// purchased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivacyStatus {
    pub purchased: bool,
    pub enabled: bool,
}

/// Trait for registry ledger implementations
///
/// # Trust Level: Untrusted
///
/// Ledgers are single-shot adapters over a remote API:
///
/// - One remote call per method invocation
/// - No retries, no backoff, no caching (owned by the orchestrator and jobs)
/// - No access to the store
/// - Return `Err` on any failure; callers decide what happens next
///
/// Callers wrap every invocation in a bounded timeout, so implementations do
/// not need their own deadline handling beyond transport defaults.
#[async_trait]
pub trait RegistryLedger: Send + Sync {
    /// Current pre-paid reseller balance
    async fn balance(&self, mode: RegistryMode) -> Result<Decimal, crate::Error>;

    /// Top up the reseller balance by charging the stored card
    ///
    /// `amount` is the gross card charge; the balance grows by the amount
    /// net of the processor fee.
    async fn refill(&self, mode: RegistryMode, amount: Decimal)
    -> Result<RefillReceipt, crate::Error>;

    /// Register a new domain
    async fn register(
        &self,
        mode: RegistryMode,
        domain: &DomainKey,
        years: u32,
        nameservers: &[String],
    ) -> Result<ActionReceipt, crate::Error>;

    /// Renew an existing domain
    async fn renew(
        &self,
        mode: RegistryMode,
        domain: &DomainKey,
        years: u32,
    ) -> Result<ActionReceipt, crate::Error>;

    /// Start an inbound transfer
    async fn transfer(
        &self,
        mode: RegistryMode,
        domain: &DomainKey,
        auth_code: &str,
    ) -> Result<ActionReceipt, crate::Error>;

    /// Authoritative registry state for a domain in this reseller account
    async fn domain_info(
        &self,
        mode: RegistryMode,
        domain: &DomainKey,
    ) -> Result<RegistryDomainInfo, crate::Error>;

    /// Current state of an inbound transfer
    async fn transfer_status(
        &self,
        mode: RegistryMode,
        domain: &DomainKey,
    ) -> Result<TransferState, crate::Error>;

    /// Replace the nameserver set
    async fn set_nameservers(
        &self,
        mode: RegistryMode,
        domain: &DomainKey,
        nameservers: &[String],
    ) -> Result<(), crate::Error>;

    /// WHOIS privacy purchase/enable state
    async fn privacy_status(
        &self,
        mode: RegistryMode,
        domain: &DomainKey,
    ) -> Result<PrivacyStatus, crate::Error>;

    /// Buy WHOIS privacy (billable)
    async fn purchase_privacy(
        &self,
        mode: RegistryMode,
        domain: &DomainKey,
        years: u32,
    ) -> Result<(), crate::Error>;

    /// Toggle already-purchased WHOIS privacy (free)
    async fn set_privacy(
        &self,
        mode: RegistryMode,
        domain: &DomainKey,
        enabled: bool,
    ) -> Result<(), crate::Error>;

    /// Ledger name (for logging/debugging)
    fn ledger_name(&self) -> &'static str;
}

/// Helper trait for constructing ledgers from configuration
pub trait RegistryLedgerFactory: Send + Sync {
    /// Create a ledger from its factory-specific configuration
    fn create(
        &self,
        config: &serde_json::Value,
    ) -> Result<std::sync::Arc<dyn RegistryLedger>, crate::Error>;
}
