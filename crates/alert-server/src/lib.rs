//! alert-server
//!
//! Price alert service: feed session, tick ingestion, periodic alert
//! reload and notification dispatch.

pub mod config;
pub mod types;
pub mod feed_client;
pub mod ingestion;
pub mod json_store;
pub mod notifier;
pub mod service;

pub use config::{Config, NotifierKind};
pub use service::Service;
