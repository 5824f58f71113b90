//! Data model for resold domains and their bookkeeping rows
//!
//! Rows here are owned by the store; workflows load, mutate and save them.
//! Money is always [`Decimal`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Credential set a domain was created under
///
/// Test and production registries are disjoint namespaces, so every
/// registry call for a domain must use the mode recorded on that domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryMode {
    Test,
    Production,
}

impl RegistryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryMode::Test => "test",
            RegistryMode::Production => "production",
        }
    }
}

impl fmt::Display for RegistryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RegistryMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" | "sandbox" => Ok(RegistryMode::Test),
            "production" | "prod" | "live" => Ok(RegistryMode::Production),
            other => Err(crate::Error::config(format!(
                "Unknown registry mode '{}'. Valid modes: test, production",
                other
            ))),
        }
    }
}

/// Domain identity: second-level label plus TLD
///
/// Both parts are stored lowercase so keys compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainKey {
    pub sld: String,
    pub tld: String,
}

impl DomainKey {
    pub fn new(sld: impl AsRef<str>, tld: impl AsRef<str>) -> Self {
        Self {
            sld: sld.as_ref().trim().to_ascii_lowercase(),
            tld: tld.as_ref().trim().trim_start_matches('.').to_ascii_lowercase(),
        }
    }

    /// Parse `sld.tld`; the split happens at the first dot so multi-label
    /// TLDs such as `co.uk` stay intact.
    pub fn parse(name: &str) -> crate::Result<Self> {
        let name = name.trim().trim_end_matches('.');
        match name.split_once('.') {
            Some((sld, tld)) if !sld.is_empty() && !tld.is_empty() => Ok(Self::new(sld, tld)),
            _ => Err(crate::Error::invalid_input(format!(
                "'{}' is not a registrable domain name",
                name
            ))),
        }
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sld, self.tld)
    }
}

/// Lifecycle status of a domain in this system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    Active,
    Pending,
    Suspended,
    Expired,
}

/// A domain resold to a customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub key: DomainKey,
    pub customer_id: String,
    pub status: DomainStatus,
    pub expiration_date: Option<DateTime<Utc>>,
    /// Local renewal intent; unrelated to the registry's own auto-renew flag
    pub auto_renew: bool,
    pub privacy_enabled: bool,
    pub nameservers: Vec<String>,
    /// Nameservers in effect before suspension, restored on unsuspend
    #[serde(default)]
    pub suspended_original_nameservers: Option<Vec<String>>,
    pub registry_mode: RegistryMode,
}

impl Domain {
    /// Create an active domain with no expiration known yet
    pub fn new(key: DomainKey, customer_id: impl Into<String>, registry_mode: RegistryMode) -> Self {
        Self {
            key,
            customer_id: customer_id.into(),
            status: DomainStatus::Active,
            expiration_date: None,
            auto_renew: false,
            privacy_enabled: false,
            nameservers: Vec::new(),
            suspended_original_nameservers: None,
            registry_mode,
        }
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration_date = Some(expiration);
        self
    }

    pub fn with_auto_renew(mut self, auto_renew: bool) -> Self {
        self.auto_renew = auto_renew;
        self
    }

    pub fn with_nameservers<I, S>(mut self, nameservers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nameservers = nameservers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: DomainStatus) -> Self {
        self.status = status;
        self
    }
}

/// Customer record (read-only here)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: String,
    /// Stored payment instrument, if any
    #[serde(default)]
    pub payment_method_id: Option<String>,
}

/// Per-year prices for a TLD
///
/// `*_cost` is what the registry debits from the reseller balance,
/// `*_retail` is what the customer is charged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TldPricing {
    pub tld: String,
    pub registration_cost: Decimal,
    pub registration_retail: Decimal,
    pub renewal_cost: Decimal,
    pub renewal_retail: Decimal,
    pub transfer_cost: Decimal,
    pub transfer_retail: Decimal,
    pub privacy_cost: Decimal,
}

/// Durable marker for a customer charge whose registry action did not happen
///
/// Created when a charge succeeded (or its outcome is unknown) and the
/// registry renewal failed. Only a human resolves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub id: Uuid,
    pub domain: DomainKey,
    pub customer_id: String,
    pub registry_mode: RegistryMode,
    /// Processor reference; `None` when the charge outcome is unknown
    pub payment_reference: Option<String>,
    pub amount_charged: Decimal,
    pub failure: String,
    pub requires_manual_resolution: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ReconciliationRecord {
    pub fn new(
        domain: &Domain,
        payment_reference: Option<String>,
        amount_charged: Decimal,
        failure: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            domain: domain.key.clone(),
            customer_id: domain.customer_id.clone(),
            registry_mode: domain.registry_mode,
            payment_reference,
            amount_charged,
            failure: failure.into(),
            requires_manual_resolution: true,
            created_at: now,
            resolved_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Kind of balance-affecting event recorded for audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Registration,
    Renewal,
    Transfer,
    PrivacyPurchase,
    Refill,
}

/// Audit row for money moving through the reseller balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceTransaction {
    pub id: Uuid,
    pub domain: Option<DomainKey>,
    pub customer_id: Option<String>,
    pub kind: TransactionKind,
    /// What the customer paid, when a customer charge was involved
    pub amount_charged: Option<Decimal>,
    /// What the registry debited (or, for refills, the gross top-up)
    pub registry_cost: Decimal,
    pub payment_reference: Option<String>,
    pub registry_mode: RegistryMode,
    pub created_at: DateTime<Utc>,
}

impl BalanceTransaction {
    pub fn new(
        kind: TransactionKind,
        registry_cost: Decimal,
        registry_mode: RegistryMode,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            domain: None,
            customer_id: None,
            kind,
            amount_charged: None,
            registry_cost,
            payment_reference: None,
            registry_mode,
            created_at: now,
        }
    }

    pub fn for_domain(mut self, domain: &Domain) -> Self {
        self.domain = Some(domain.key.clone());
        self.customer_id = Some(domain.customer_id.clone());
        self
    }

    pub fn with_charge(mut self, amount: Decimal, reference: impl Into<String>) -> Self {
        self.amount_charged = Some(amount);
        self.payment_reference = Some(reference.into());
        self
    }
}

/// State of an inbound transfer at the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Pending,
    Completed,
    Failed,
}

/// Inbound transfer awaiting completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub domain: DomainKey,
    pub customer_id: String,
    pub registry_mode: RegistryMode,
    pub state: TransferState,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Shopping cart; only its age matters here
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: String,
    pub customer_id: String,
    pub updated_at: DateTime<Utc>,
}

/// State of a domain push between customer accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushRequestState {
    Open,
    Accepted,
    Expired,
}

/// Request to push a domain to another customer account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub id: String,
    pub domain: DomainKey,
    pub expires_at: DateTime<Utc>,
    pub state: PushRequestState,
}
