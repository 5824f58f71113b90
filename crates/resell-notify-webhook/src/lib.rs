// # Webhook Notifier
//
// Delivers customer notifications by POSTing JSON to an HTTP endpoint,
// typically a mail relay or an internal messaging service.
//
// ## Payload
//
// ```json
// { "template": "renewal_confirmation", "recipient": "owner@example.com", "data": { ... } }
// ```
//
// ## Configuration
//
// ```json
// { "url": "https://mail.internal/hooks/resell", "bearer_token": "...", "timeout_secs": 10 }
// ```
//
// Single-shot like every collaborator: no retries here. Callers log failed
// deliveries and move on.

use resell_core::registry::BackendRegistry;
use resell_core::traits::{NotificationSender, NotificationSenderFactory};
use resell_core::{Error, Result};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default HTTP timeout for one delivery
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Body sent to the webhook
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload<'a> {
    pub template: &'a str,
    pub recipient: &'a str,
    pub data: serde_json::Value,
}

/// Factory-side configuration
#[derive(Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("url", &self.url)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<REDACTED>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Notification sender that POSTs to a webhook
///
/// The Debug implementation does NOT expose the bearer token.
pub struct WebhookNotifier {
    url: String,
    /// ⚠️ NEVER log this value
    bearer_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("url", &self.url)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        if !config.url.starts_with("https://") && !config.url.starts_with("http://") {
            return Err(Error::config(format!(
                "Webhook URL must use HTTP or HTTPS scheme. Got: {}",
                config.url
            )));
        }
        if config.timeout_secs == 0 {
            return Err(Error::config("Webhook timeout must be at least 1 second"));
        }
        if config.bearer_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(Error::config("Webhook bearer token cannot be empty when set"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: config.url,
            bearer_token: config.bearer_token,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl NotificationSender for WebhookNotifier {
    async fn send(&self, template: &str, recipient: &str, data: serde_json::Value) -> Result<()> {
        let payload = WebhookPayload {
            template,
            recipient,
            data,
        };

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::notification(format!("Webhook request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(template, recipient, "notification delivered");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        match status.as_u16() {
            401 | 403 => Err(Error::notification(format!(
                "Webhook rejected credentials. Status: {}",
                status
            ))),
            429 => Err(Error::notification(format!(
                "Webhook rate limit exceeded. Status: {}",
                status
            ))),
            500..=599 => Err(Error::notification(format!(
                "Webhook server error (transient): {} - {}",
                status, body
            ))),
            _ => Err(Error::notification(format!(
                "Webhook returned {}: {}",
                status, body
            ))),
        }
    }

    fn sender_name(&self) -> &'static str {
        "webhook"
    }
}

/// Factory for creating webhook notifiers
pub struct WebhookNotifierFactory;

impl NotificationSenderFactory for WebhookNotifierFactory {
    fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn NotificationSender>> {
        let config: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::config(format!("Invalid webhook notifier config: {}", e)))?;
        Ok(Arc::new(WebhookNotifier::new(config)?))
    }
}

/// Register the webhook notifier with a registry
///
/// ```rust,ignore
/// let registry = BackendRegistry::with_builtins();
/// resell_notify_webhook::register(&registry);
/// ```
pub fn register(registry: &BackendRegistry) {
    registry.register_notifier("webhook", Box::new(WebhookNotifierFactory));
}
