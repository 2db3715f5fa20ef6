//! alert-core
//!
//! Pure price-alert logic:
//! - alert conditions and their trigger predicates
//! - the concurrently readable, periodically reloaded alert index
//! - the tick matching engine with trigger-once semantics
//! - the last-price cache
//! - seams towards the durable store, the account directory and the
//!   notification channels

pub mod condition;
pub mod trigger;
pub mod tick;
pub mod alert_store;
pub mod matching_engine;
pub mod price_cache;
pub mod notify;
pub mod repository;
pub mod error;

pub use condition::{AlertCondition, AlertId, ConditionState, SCHEDULE_FORMAT};
pub use trigger::Trigger;
pub use tick::Tick;

pub use alert_store::{AlertIndex, AlertStore};
pub use matching_engine::{FiredAlert, MatchingEngine};
pub use price_cache::PriceCache;
pub use notify::Notify;
pub use repository::{AlertRepository, EmailDirectory, InMemoryRepository};
pub use error::{ConditionError, StoreError};
