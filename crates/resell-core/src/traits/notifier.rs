// # Notification Sender Trait
//
// Fire-and-forget delivery of customer notices (renewal confirmations,
// failed renewals, "add a payment method" reminders).
//
// Templating and rendering live outside this crate: a notification is a
// template name plus a JSON data bag. Callers log failures and move on; a
// failed notice never fails a workflow.

use async_trait::async_trait;

/// Template names used by the workflows
pub mod templates {
    pub const RENEWAL_CONFIRMATION: &str = "domain_renewal_confirmation";
    pub const RENEWAL_FAILED: &str = "domain_renewal_failed";
    pub const ADD_PAYMENT_METHOD: &str = "add_payment_method";
}

/// Trait for notification transports
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver one notification
    async fn send(
        &self,
        template: &str,
        recipient: &str,
        data: serde_json::Value,
    ) -> Result<(), crate::Error>;

    /// Transport name (for logging/debugging)
    fn sender_name(&self) -> &'static str;
}

/// Helper trait for constructing notifiers from configuration
pub trait NotificationSenderFactory: Send + Sync {
    /// Create a notifier from its factory-specific configuration
    fn create(
        &self,
        config: &serde_json::Value,
    ) -> Result<std::sync::Arc<dyn NotificationSender>, crate::Error>;
}

/// Notifier that records notifications as tracing events
///
/// Used when no delivery transport is configured so notices still show up
/// in the logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send(
        &self,
        template: &str,
        recipient: &str,
        data: serde_json::Value,
    ) -> Result<(), crate::Error> {
        tracing::info!(template, recipient, %data, "notification");
        Ok(())
    }

    fn sender_name(&self) -> &'static str {
        "log"
    }
}

/// Factory for [`LogNotifier`]
pub struct LogNotifierFactory;

impl NotificationSenderFactory for LogNotifierFactory {
    fn create(
        &self,
        _config: &serde_json::Value,
    ) -> Result<std::sync::Arc<dyn NotificationSender>, crate::Error> {
        Ok(std::sync::Arc::new(LogNotifier))
    }
}
