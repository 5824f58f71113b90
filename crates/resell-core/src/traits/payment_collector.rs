// # Payment Collector Trait
//
// Defines the interface for charging a customer's stored payment instrument.
//
// ## Outcomes vs. errors
//
// A processor answer (approved, declined, needs authentication) is an
// `Ok(ChargeOutcome)`. An `Err` means the answer never arrived (transport
// failure, timeout) and the charge may or may not have happened.

use async_trait::async_trait;
use rust_decimal::Decimal;

/// Processor answer to a charge attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// Funds captured
    Succeeded {
        /// Processor reference for the capture
        reference: String,
    },
    /// Card declined
    Declined {
        /// Processor-provided reason
        reason: String,
    },
    /// Off-session charge needs customer authentication (e.g. 3-D Secure)
    RequiresAction {
        /// Processor reference for the pending intent
        reference: String,
    },
}

impl ChargeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ChargeOutcome::Succeeded { .. })
    }
}

/// Trait for payment processor implementations
///
/// Implementations perform exactly one charge attempt per call and never
/// retry; an automatic retry could double-charge the customer.
#[async_trait]
pub trait PaymentCollector: Send + Sync {
    /// Charge `amount` against the customer's stored payment method
    async fn charge(
        &self,
        customer_id: &str,
        amount: Decimal,
        payment_method_id: &str,
    ) -> Result<ChargeOutcome, crate::Error>;

    /// Processor name (for logging/debugging)
    fn processor_name(&self) -> &'static str;
}

/// Helper trait for constructing payment collectors from configuration
pub trait PaymentCollectorFactory: Send + Sync {
    /// Create a collector from its factory-specific configuration
    fn create(
        &self,
        config: &serde_json::Value,
    ) -> Result<std::sync::Arc<dyn PaymentCollector>, crate::Error>;
}
