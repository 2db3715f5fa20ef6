//! Seams towards the external collaborators.
//!
//! - [`AlertRepository`]: the durable alert store (query pending, mark
//!   triggered).
//! - [`EmailDirectory`]: account → email address resolution.
//!
//! [`InMemoryRepository`] implements both and is used by tests and by
//! deployments that seed alerts programmatically.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::condition::{AlertCondition, AlertId, ConditionState};
use crate::error::StoreError;

/// Durable store of alert conditions.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// All conditions currently in `Pending` state.
    async fn query_pending(&self) -> Result<Vec<AlertCondition>, StoreError>;

    /// Persist the `Triggered` state for `id`.
    async fn mark_triggered(&self, id: AlertId) -> Result<(), StoreError>;
}

/// Resolves an account to its notification address.
#[async_trait]
pub trait EmailDirectory: Send + Sync {
    /// `Ok(None)` means the account has no address on file.
    async fn lookup_email(&self, account: &str) -> Result<Option<String>, StoreError>;
}

/// In-process store.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    alerts: Vec<AlertCondition>,
    emails: HashMap<String, String>,
    fail_queries: bool,
    fail_updates: bool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        InMemoryRepository::default()
    }

    /// Insert or replace a condition (matched by id).
    pub fn upsert(&self, condition: AlertCondition) {
        let mut inner = self.inner.lock();
        match inner.alerts.iter_mut().find(|a| a.id == condition.id) {
            Some(existing) => *existing = condition,
            None => inner.alerts.push(condition),
        }
    }

    /// Delete a condition outright (as if the user withdrew it).
    pub fn delete(&self, id: AlertId) {
        self.inner.lock().alerts.retain(|a| a.id != id);
    }

    pub fn set_email(&self, account: impl Into<String>, email: impl Into<String>) {
        self.inner.lock().emails.insert(account.into(), email.into());
    }

    /// Make `query_pending` fail until reset.
    pub fn fail_queries(&self, fail: bool) {
        self.inner.lock().fail_queries = fail;
    }

    /// Make `mark_triggered` fail until reset.
    pub fn fail_updates(&self, fail: bool) {
        self.inner.lock().fail_updates = fail;
    }

    pub fn state_of(&self, id: AlertId) -> Option<ConditionState> {
        self.inner
            .lock()
            .alerts
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.state)
    }
}

#[async_trait]
impl AlertRepository for InMemoryRepository {
    async fn query_pending(&self) -> Result<Vec<AlertCondition>, StoreError> {
        let inner = self.inner.lock();
        if inner.fail_queries {
            return Err(StoreError::Unavailable("query rejected".into()));
        }
        Ok(inner
            .alerts
            .iter()
            .filter(|a| a.state == ConditionState::Pending)
            .cloned()
            .collect())
    }

    async fn mark_triggered(&self, id: AlertId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.fail_updates {
            return Err(StoreError::Unavailable("update rejected".into()));
        }
        let alert = inner
            .alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(StoreError::UnknownAlert(id))?;
        alert.state = ConditionState::Triggered;
        Ok(())
    }
}

#[async_trait]
impl EmailDirectory for InMemoryRepository {
    async fn lookup_email(&self, account: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .emails
            .get(account)
            .filter(|e| !e.trim().is_empty())
            .cloned())
    }
}
