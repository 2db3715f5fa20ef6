//! Notification capability used by the matching engine.
//!
//! The engine only knows this trait; the concrete channels (console,
//! email) are a closed set of variants selected when the service is
//! assembled.

use async_trait::async_trait;

/// Deliver one alert to its owner.
///
/// Implementations swallow and log their own delivery failures: losing a
/// notification must never stop matching.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn notify(&self, account: &str, instrument: &str, price: f64, reason: &str);
}
