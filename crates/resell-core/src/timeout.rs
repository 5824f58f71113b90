//! Bounded external calls
//!
//! Every call to the registry, the payment processor or the store goes
//! through [`bounded`], so a hung remote surfaces as an ordinary
//! [`Error::Timeout`] instead of stalling a scheduled job.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Await `fut` for at most `limit`
pub async fn bounded<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, ?limit, "external call timed out");
            Err(Error::timeout(operation, limit))
        }
    }
}
