//! Configuration types for the resale system
//!
//! Every section has serde defaults, so a minimal config only names the
//! ledger and payment backends and the quarantine nameservers.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::auto_renew::AutoRenewSettings;
use crate::model::RegistryMode;
use crate::refill::RefillPolicy;
use crate::scheduler::Recurrence;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResellConfig {
    /// Mode new work runs in; existing domains keep their own mode
    #[serde(default = "default_mode")]
    pub mode: RegistryMode,

    #[serde(default)]
    pub refill: RefillConfig,

    #[serde(default)]
    pub auto_renew: AutoRenewConfig,

    #[serde(default)]
    pub suspension: SuspensionConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Registry ledger backend
    #[serde(default)]
    pub ledger: BackendConfig,

    /// Payment collector backend
    #[serde(default)]
    pub payments: BackendConfig,
}

impl ResellConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            mode: default_mode(),
            refill: RefillConfig::default(),
            auto_renew: AutoRenewConfig::default(),
            suspension: SuspensionConfig::default(),
            scheduler: SchedulerConfig::default(),
            timeouts: TimeoutConfig::default(),
            store: StoreConfig::default(),
            notifier: NotifierConfig::default(),
            ledger: BackendConfig::default(),
            payments: BackendConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.refill.policy()?;
        self.auto_renew.validate()?;
        self.suspension.validate()?;
        self.scheduler.validate()?;
        self.timeouts.validate()?;
        self.store.validate()?;
        self.notifier.validate()?;
        self.ledger.validate("ledger")?;
        self.payments.validate("payments")?;
        Ok(())
    }

    /// Auto-renew knobs for the configured mode
    pub fn auto_renew_settings(&self) -> AutoRenewSettings {
        AutoRenewSettings {
            mode: self.mode,
            lookahead: chrono::Duration::days(i64::from(self.auto_renew.lookahead_days)),
            inter_domain_delay: Duration::from_millis(self.auto_renew.inter_domain_delay_ms),
            renewal_years: self.auto_renew.renewal_years,
            allow_auto_refill: self.refill.allow_auto_refill,
        }
    }
}

impl Default for ResellConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_mode() -> RegistryMode {
    RegistryMode::Test
}

/// Reseller balance top-up settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefillConfig {
    /// Processor fee as a fraction (0.05 = 5%)
    #[serde(default = "default_fee_percent")]
    pub fee_percent: Decimal,

    #[serde(default = "default_min_refill")]
    pub min_refill: Decimal,

    /// Top up automatically instead of failing with insufficient balance
    #[serde(default = "default_true")]
    pub allow_auto_refill: bool,
}

impl RefillConfig {
    /// Build the validated refill policy
    pub fn policy(&self) -> Result<RefillPolicy, crate::Error> {
        RefillPolicy::new(self.fee_percent, self.min_refill)
    }
}

impl Default for RefillConfig {
    fn default() -> Self {
        Self {
            fee_percent: default_fee_percent(),
            min_refill: default_min_refill(),
            allow_auto_refill: true,
        }
    }
}

fn default_fee_percent() -> Decimal {
    RefillPolicy::default().fee_percent
}

fn default_min_refill() -> Decimal {
    RefillPolicy::default().min_refill
}

fn default_true() -> bool {
    true
}

/// Auto-renew settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRenewConfig {
    /// Domains expiring within this many days are renewed
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: u32,

    /// Pause between two domains (in milliseconds)
    #[serde(default = "default_inter_domain_delay_ms")]
    pub inter_domain_delay_ms: u64,

    #[serde(default = "default_renewal_years")]
    pub renewal_years: u32,
}

impl AutoRenewConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.renewal_years == 0 || self.renewal_years > 10 {
            return Err(crate::Error::config(format!(
                "Renewal years must be between 1 and 10, got {}",
                self.renewal_years
            )));
        }
        if self.lookahead_days == 0 {
            return Err(crate::Error::config("Auto-renew lookahead must be at least 1 day"));
        }
        Ok(())
    }
}

impl Default for AutoRenewConfig {
    fn default() -> Self {
        Self {
            lookahead_days: default_lookahead_days(),
            inter_domain_delay_ms: default_inter_domain_delay_ms(),
            renewal_years: default_renewal_years(),
        }
    }
}

fn default_lookahead_days() -> u32 {
    30
}

fn default_inter_domain_delay_ms() -> u64 {
    2000
}

fn default_renewal_years() -> u32 {
    1
}

/// Suspension settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuspensionConfig {
    /// Nameservers applied while a domain is suspended (at least 2)
    #[serde(default)]
    pub quarantine_nameservers: Vec<String>,
}

impl SuspensionConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.quarantine_nameservers.len() < 2 {
            return Err(crate::Error::config(format!(
                "At least 2 quarantine nameservers are required, got {}",
                self.quarantine_nameservers.len()
            )));
        }
        if self.quarantine_nameservers.iter().any(|ns| ns.trim().is_empty()) {
            return Err(crate::Error::config("Quarantine nameservers cannot be empty"));
        }
        Ok(())
    }
}

/// Job recurrences and scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_domain_sync")]
    pub domain_sync: String,

    #[serde(default = "default_auto_renew")]
    pub auto_renew: String,

    #[serde(default = "default_hourly")]
    pub cart_cleanup: String,

    #[serde(default = "default_transfer_poll")]
    pub transfer_poll: String,

    #[serde(default = "default_hourly")]
    pub push_request_expiry: String,

    /// Carts untouched for longer than this are purged
    #[serde(default = "default_cart_max_age_hours")]
    pub cart_max_age_hours: u32,

    /// Capacity of the scheduler event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        for (job, expression) in [
            ("domain_sync", &self.domain_sync),
            ("auto_renew", &self.auto_renew),
            ("cart_cleanup", &self.cart_cleanup),
            ("transfer_poll", &self.transfer_poll),
            ("push_request_expiry", &self.push_request_expiry),
        ] {
            expression.parse::<Recurrence>().map_err(|e| {
                crate::Error::config(format!("Schedule for job '{}': {}", job, e))
            })?;
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            domain_sync: default_domain_sync(),
            auto_renew: default_auto_renew(),
            cart_cleanup: default_hourly(),
            transfer_poll: default_transfer_poll(),
            push_request_expiry: default_hourly(),
            cart_max_age_hours: default_cart_max_age_hours(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_domain_sync() -> String {
    "@every 6h".to_string()
}

fn default_auto_renew() -> String {
    "daily 02:00".to_string()
}

fn default_hourly() -> String {
    "@hourly".to_string()
}

fn default_transfer_poll() -> String {
    "@every 30m".to_string()
}

fn default_cart_max_age_hours() -> u32 {
    72
}

fn default_event_channel_capacity() -> usize {
    256
}

/// Time budgets for external calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl TimeoutConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.call_timeout_secs == 0 {
            return Err(crate::Error::config("Call timeout must be > 0 seconds"));
        }
        Ok(())
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_call_timeout_secs() -> u64 {
    30
}

/// Store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// JSON file store
    File {
        /// Path to the store file
        path: String,
    },

    /// Custom store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::Memory => Ok(()),
            StoreConfig::File { path } => {
                if path.trim().is_empty() {
                    return Err(crate::Error::config("File store path cannot be empty"));
                }
                Ok(())
            }
            StoreConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom store factory cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Registered factory name for this store
    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::File { .. } => "file",
            StoreConfig::Custom { factory, .. } => factory,
        }
    }

    /// Configuration handed to the factory
    pub fn factory_config(&self) -> serde_json::Value {
        match self {
            StoreConfig::Memory => serde_json::Value::Null,
            StoreConfig::File { path } => serde_json::json!({ "path": path }),
            StoreConfig::Custom { config, .. } => config.clone(),
        }
    }
}

/// Notification transport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierConfig {
    /// Write notifications to the log
    #[default]
    Log,

    /// Custom notifier
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl NotifierConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            NotifierConfig::Log => Ok(()),
            NotifierConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom notifier factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom notifier config cannot be null"));
                }
                Ok(())
            }
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            NotifierConfig::Log => "log",
            NotifierConfig::Custom { factory, .. } => factory,
        }
    }

    pub fn factory_config(&self) -> serde_json::Value {
        match self {
            NotifierConfig::Log => serde_json::Value::Null,
            NotifierConfig::Custom { config, .. } => config.clone(),
        }
    }
}

/// A backend chosen by factory name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Registered factory name
    #[serde(default)]
    pub factory: String,

    /// Factory-specific configuration
    #[serde(default)]
    pub config: serde_json::Value,
}

impl BackendConfig {
    pub fn new(factory: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            factory: factory.into(),
            config,
        }
    }

    pub fn validate(&self, section: &str) -> Result<(), crate::Error> {
        if self.factory.trim().is_empty() {
            return Err(crate::Error::config(format!(
                "No {} backend configured (factory name is empty)",
                section
            )));
        }
        Ok(())
    }
}
