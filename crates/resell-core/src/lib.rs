// # resell-core
//
// Core library for balance-aware domain resale.
//
// ## Architecture Overview
//
// - **RefillCalculator** (`refill`): pure top-up computation over cost,
//   balance, processor fee and minimum refill
// - **SmartActionOrchestrator** (`orchestrator`): balance check, top-up and
//   verify, paid registry action, final balance
// - **AutoRenewWorkflow** (`auto_renew`): charge customer, renew at the
//   registry, persist and notify; reconciliation records on split outcomes
// - **SuspensionController** (`suspension`): nameserver quarantine/restore
// - **PrivacyProvisioner** (`privacy`): purchase-then-enable WHOIS privacy
// - **JobScheduler** (`scheduler`): recurring jobs with a pluggable clock
// - **BackendRegistry** (`registry`): plugin factories for ledgers,
//   payment collectors, notifiers and stores
//
// ## Design Principles
//
// 1. **Explicit registry mode**: every ledger call names the mode of the
//    domain it touches; there is no process-wide mode switch
// 2. **Re-observe before acting**: balance, privacy and domain state are
//    read back from the registry before the next decision
// 3. **Never lose money silently**: a charge without a matching registry
//    action always leaves a reconciliation record
// 4. **Library-first**: the daemon only wires configuration to these types

pub mod auto_renew;
pub mod config;
pub mod error;
pub mod jobs;
pub mod lock;
pub mod model;
pub mod orchestrator;
pub mod privacy;
pub mod refill;
pub mod registry;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod suspension;
pub mod timeout;
pub mod traits;
pub mod workflow;

// Re-export core types for convenience
pub use auto_renew::{AutoRenewReport, AutoRenewSettings, AutoRenewWorkflow, HeldUpdate, RenewalOutcome};
pub use config::ResellConfig;
pub use error::{Error, Result};
pub use lock::DomainLocks;
pub use model::{Domain, DomainKey, DomainStatus, RegistryMode};
pub use orchestrator::{ActionOptions, PaidAction, SmartActionOrchestrator};
pub use privacy::{PrivacyChange, PrivacyProvisioner};
pub use refill::{RefillDecision, RefillPolicy};
pub use registry::BackendRegistry;
pub use scheduler::{Clock, JobHandler, JobScheduler, ManualClock, SchedulerEvent, SystemClock};
pub use services::Services;
pub use state::{FileStore, MemoryStore};
pub use suspension::{NameserverAction, StatusChange, SuspensionController};
pub use traits::{NotificationSender, PaymentCollector, RegistryLedger, ResellStore};
pub use workflow::{FailureKind, Step, WorkflowResult};
