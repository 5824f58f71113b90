// # reselld - Domain Resale Daemon
//
// Thin integration layer: reads configuration from the environment, wires
// backends through the registry and runs the recurring jobs. All renewal,
// refill, suspension and privacy logic lives in resell-core.
//
// ## Configuration
//
// ### Backends
// - `RESELL_LEDGER`: registered registry ledger factory (required)
// - `RESELL_LEDGER_CONFIG`: JSON handed to the ledger factory
// - `RESELL_PAYMENTS`: registered payment collector factory (required)
// - `RESELL_PAYMENTS_CONFIG`: JSON handed to the payment factory
//
// ### Store
// - `RESELL_STORE_TYPE`: file (default) or memory
// - `RESELL_STORE_PATH`: path to the JSON store (for file)
//
// ### Notifications
// - `RESELL_NOTIFIER`: log (default) or webhook
// - `RESELL_WEBHOOK_URL`: delivery endpoint (for webhook)
// - `RESELL_WEBHOOK_TOKEN`: bearer token (optional)
//
// ### Behaviour
// - `RESELL_MODE`: test (default) or production
// - `RESELL_REFILL_FEE_PERCENT`: processor fee as a fraction (0.05)
// - `RESELL_MIN_REFILL`: minimum top-up amount (25.00)
// - `RESELL_ALLOW_AUTO_REFILL`: true/false
// - `RESELL_QUARANTINE_NAMESERVERS`: comma-separated, at least 2 (required)
// - `RESELL_RUN_ON_START`: comma-separated job names to run once at startup
// - `RESELL_CALL_TIMEOUT_SECS`: budget for each external call
// - `RESELL_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export RESELL_LEDGER=acme-registry
// export RESELL_PAYMENTS=acme-payments
// export RESELL_STORE_PATH=/var/lib/resell/state.json
// export RESELL_QUARANTINE_NAMESERVERS=ns1.quarantine.example,ns2.quarantine.example
// export RESELL_RUN_ON_START=domain_sync
//
// reselld
// ```
//
// Ledger and payment factories are provided by plugin crates linked into
// the binary; an unregistered factory name fails startup with exit code 1.

use anyhow::Result;
use resell_core::config::{BackendConfig, NotifierConfig, ResellConfig, StoreConfig};
use resell_core::scheduler::SchedulerEvent;
use resell_core::{BackendRegistry, RegistryMode, Services, SystemClock, jobs};
use rust_decimal::Decimal;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Time allowed for in-flight jobs to finish after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResellExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<ResellExitCode> for ExitCode {
    fn from(code: ResellExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration as read from the environment
#[derive(Debug)]
struct Config {
    mode: String,
    ledger: String,
    ledger_config: Option<String>,
    payments: String,
    payments_config: Option<String>,
    store_type: String,
    store_path: Option<String>,
    notifier: String,
    webhook_url: Option<String>,
    webhook_token: Option<String>,
    fee_percent: Option<String>,
    min_refill: Option<String>,
    allow_auto_refill: Option<String>,
    quarantine_nameservers: Vec<String>,
    run_on_start: Vec<String>,
    call_timeout_secs: Option<String>,
    log_level: String,
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            mode: get("RESELL_MODE").unwrap_or_else(|| "test".to_string()),
            ledger: get("RESELL_LEDGER").unwrap_or_default(),
            ledger_config: get("RESELL_LEDGER_CONFIG"),
            payments: get("RESELL_PAYMENTS").unwrap_or_default(),
            payments_config: get("RESELL_PAYMENTS_CONFIG"),
            store_type: get("RESELL_STORE_TYPE").unwrap_or_else(|| "file".to_string()),
            store_path: get("RESELL_STORE_PATH"),
            notifier: get("RESELL_NOTIFIER").unwrap_or_else(|| "log".to_string()),
            webhook_url: get("RESELL_WEBHOOK_URL"),
            webhook_token: get("RESELL_WEBHOOK_TOKEN"),
            fee_percent: get("RESELL_REFILL_FEE_PERCENT"),
            min_refill: get("RESELL_MIN_REFILL"),
            allow_auto_refill: get("RESELL_ALLOW_AUTO_REFILL"),
            quarantine_nameservers: split_list(get("RESELL_QUARANTINE_NAMESERVERS")),
            run_on_start: split_list(get("RESELL_RUN_ON_START")),
            call_timeout_secs: get("RESELL_CALL_TIMEOUT_SECS"),
            log_level: get("RESELL_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        }
    }

    /// Check the environment values and build the core configuration
    fn into_resell_config(self) -> Result<ResellConfig> {
        let mut config = ResellConfig::new();

        config.mode = RegistryMode::from_str(&self.mode).map_err(|_| {
            anyhow::anyhow!(
                "RESELL_MODE '{}' is not valid. Valid modes: test, production",
                self.mode
            )
        })?;

        if self.ledger.trim().is_empty() {
            anyhow::bail!(
                "RESELL_LEDGER is required. \
                Set it via: export RESELL_LEDGER=<registered ledger factory>"
            );
        }
        config.ledger = BackendConfig::new(
            self.ledger.trim(),
            parse_json("RESELL_LEDGER_CONFIG", self.ledger_config.as_deref())?,
        );

        if self.payments.trim().is_empty() {
            anyhow::bail!(
                "RESELL_PAYMENTS is required. \
                Set it via: export RESELL_PAYMENTS=<registered payment factory>"
            );
        }
        config.payments = BackendConfig::new(
            self.payments.trim(),
            parse_json("RESELL_PAYMENTS_CONFIG", self.payments_config.as_deref())?,
        );

        config.store = match self.store_type.as_str() {
            "memory" => {
                warn!("RESELL_STORE_TYPE=memory: nothing survives a restart");
                StoreConfig::Memory
            }
            "file" => {
                let Some(path) = self.store_path.filter(|p| !p.trim().is_empty()) else {
                    anyhow::bail!(
                        "RESELL_STORE_PATH is required when RESELL_STORE_TYPE=file. \
                        Set it via: export RESELL_STORE_PATH=/var/lib/resell/state.json"
                    );
                };
                if let Some(parent) = std::path::Path::new(&path).parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                {
                    anyhow::bail!(
                        "RESELL_STORE_PATH parent directory does not exist: {}. \
                        Create it first: sudo mkdir -p {}",
                        parent.display(),
                        parent.display()
                    );
                }
                StoreConfig::File { path }
            }
            other => anyhow::bail!(
                "RESELL_STORE_TYPE '{}' is not supported. Supported types: file, memory",
                other
            ),
        };

        config.notifier = match self.notifier.as_str() {
            "log" => NotifierConfig::Log,
            "webhook" => {
                let Some(url) = self.webhook_url.filter(|u| !u.trim().is_empty()) else {
                    anyhow::bail!(
                        "RESELL_WEBHOOK_URL is required when RESELL_NOTIFIER=webhook. \
                        Set it via: export RESELL_WEBHOOK_URL=https://mail.internal/hooks/resell"
                    );
                };
                let mut webhook = serde_json::json!({ "url": url });
                if let Some(token) = self.webhook_token {
                    webhook["bearer_token"] = serde_json::Value::String(token);
                }
                NotifierConfig::Custom {
                    factory: "webhook".to_string(),
                    config: webhook,
                }
            }
            other => anyhow::bail!(
                "RESELL_NOTIFIER '{}' is not supported. Supported notifiers: log, webhook",
                other
            ),
        };

        if let Some(fee) = self.fee_percent {
            config.refill.fee_percent = parse_decimal("RESELL_REFILL_FEE_PERCENT", &fee)?;
        }
        if let Some(min) = self.min_refill {
            config.refill.min_refill = parse_decimal("RESELL_MIN_REFILL", &min)?;
        }
        if let Some(allow) = self.allow_auto_refill {
            config.refill.allow_auto_refill = match allow.to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => anyhow::bail!(
                    "RESELL_ALLOW_AUTO_REFILL must be true or false. Got: {}",
                    allow
                ),
            };
        }

        if self.quarantine_nameservers.len() < 2 {
            anyhow::bail!(
                "RESELL_QUARANTINE_NAMESERVERS needs at least 2 nameservers, got {}. \
                Set it via: export RESELL_QUARANTINE_NAMESERVERS=ns1.example,ns2.example",
                self.quarantine_nameservers.len()
            );
        }
        config.suspension.quarantine_nameservers = self.quarantine_nameservers;

        if let Some(secs) = self.call_timeout_secs {
            let secs: u64 = secs.parse().map_err(|_| {
                anyhow::anyhow!("RESELL_CALL_TIMEOUT_SECS must be a number. Got: {}", secs)
            })?;
            if !(1..=600).contains(&secs) {
                anyhow::bail!(
                    "RESELL_CALL_TIMEOUT_SECS must be between 1 and 600 seconds. Got: {}",
                    secs
                );
            }
            config.timeouts.call_timeout_secs = secs;
        }

        for job in &self.run_on_start {
            if !jobs::ALL.contains(&job.as_str()) {
                anyhow::bail!(
                    "RESELL_RUN_ON_START names unknown job '{}'. Valid jobs: {}",
                    job,
                    jobs::ALL.join(", ")
                );
            }
        }

        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
        Ok(config)
    }
}

fn parse_json(var: &str, raw: Option<&str>) -> Result<serde_json::Value> {
    match raw {
        None => Ok(serde_json::Value::Null),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("{} is not valid JSON: {}", var, e)),
    }
}

fn parse_decimal(var: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|_| anyhow::anyhow!("{} must be a decimal number. Got: {}", var, raw))
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "RESELL_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

fn main() -> ExitCode {
    let env = Config::from_env();

    let log_level = match parse_log_level(&env.log_level) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Configuration validation error: {}", e);
            return ResellExitCode::ConfigError.into();
        }
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ResellExitCode::ConfigError.into();
    }

    let run_on_start = env.run_on_start.clone();
    let config = match env.into_resell_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration validation error: {}", e);
            return ResellExitCode::ConfigError.into();
        }
    };

    info!(mode = %config.mode, ledger = %config.ledger.factory, "Starting reselld daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ResellExitCode::RuntimeError.into();
        }
    };

    rt.block_on(run_daemon(config, run_on_start)).into()
}

fn registry() -> BackendRegistry {
    let registry = BackendRegistry::with_builtins();

    #[cfg(feature = "webhook")]
    {
        info!("Registering webhook notifier");
        resell_notify_webhook::register(&registry);
    }

    registry
}

/// Run the daemon until a shutdown signal arrives
async fn run_daemon(config: ResellConfig, run_on_start: Vec<String>) -> ResellExitCode {
    let registry = registry();
    let (services, events) = match Services::build(&config, &registry, Arc::new(SystemClock)).await {
        Ok(built) => built,
        Err(resell_core::Error::Config(msg)) => {
            error!(
                ledgers = ?registry.list_ledgers(),
                payments = ?registry.list_payments(),
                notifiers = ?registry.list_notifiers(),
                "Startup configuration error: {}",
                msg
            );
            return ResellExitCode::ConfigError;
        }
        Err(e) => {
            error!("Failed to build services: {}", e);
            return ResellExitCode::RuntimeError;
        }
    };

    let drain = tokio::spawn(log_events(ReceiverStream::new(events)));

    for job in &run_on_start {
        info!(job = %job, "Running job on start");
        if let Err(e) = services.scheduler.run_job(job).await {
            error!(job = %job, "Startup job could not run: {}", e);
        }
    }

    if let Err(e) = services.scheduler.start().await {
        error!("Failed to start scheduler: {}", e);
        return ResellExitCode::RuntimeError;
    }
    info!("Daemon initialized successfully");

    let code = match wait_for_shutdown(&services).await {
        Ok(signal) => {
            info!("Received shutdown signal: {}", signal);
            ResellExitCode::CleanShutdown
        }
        Err(e) => {
            error!("Signal handling error: {}", e);
            ResellExitCode::RuntimeError
        }
    };

    info!("Stopping scheduler");
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, services.scheduler.stop())
        .await
        .is_err()
    {
        error!("Shutdown timeout after {:?}; jobs still running", SHUTDOWN_TIMEOUT);
        return ResellExitCode::RuntimeError;
    }

    if let Err(e) = services.store.flush().await {
        error!("Failed to flush store: {}", e);
        return ResellExitCode::RuntimeError;
    }

    // The scheduler owns the sender; dropping it ends the drain
    drop(services);
    let _ = tokio::time::timeout(Duration::from_secs(1), drain).await;

    info!("Shutdown complete");
    code
}

async fn log_events(mut events: ReceiverStream<SchedulerEvent>) {
    while let Some(event) = events.next().await {
        match event {
            SchedulerEvent::Started { jobs } => info!(jobs, "scheduler started"),
            SchedulerEvent::JobStarted { name } => info!(job = %name, "job started"),
            SchedulerEvent::JobSucceeded { name, duration_ms } => {
                info!(job = %name, duration_ms, "job succeeded")
            }
            SchedulerEvent::JobFailed { name, error } => {
                warn!(job = %name, error = %error, "job failed")
            }
            SchedulerEvent::Stopped => info!("scheduler stopped"),
        }
    }
}

async fn log_status(services: &Services) {
    for job in services.scheduler.status().await {
        info!(
            job = %job.name,
            schedule = %job.schedule,
            run_count = job.run_count,
            last_run = ?job.last_run,
            next_run = ?job.next_run,
            last_duration_ms = ?job.last_duration_ms,
            recent_errors = job.recent_errors.len(),
            "job status"
        );
    }
    let held = services.auto_renew.pending_reconciliations().await.len();
    let held_updates = services.auto_renew.held_updates().await.len();
    match services.store.list_reconciliations().await {
        Ok(records) => info!(stored = records.len(), held, held_updates, "reconciliation records"),
        Err(e) => warn!(held, held_updates, "Failed to read reconciliation records: {}", e),
    }
}

/// Wait for SIGTERM or SIGINT; SIGUSR1 dumps status and keeps waiting
#[cfg(unix)]
async fn wait_for_shutdown(services: &Services) -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;
    let mut sigusr1 = signal(SignalKind::user_defined1())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGUSR1 handler: {}", e))?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => return Ok("SIGTERM"),
            _ = sigint.recv() => return Ok("SIGINT"),
            _ = sigusr1.recv() => log_status(services).await,
        }
    }
}

/// Fallback for non-Unix platforms: CTRL-C only
#[cfg(not(unix))]
async fn wait_for_shutdown(services: &Services) -> Result<&'static str> {
    let _ = services;
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
