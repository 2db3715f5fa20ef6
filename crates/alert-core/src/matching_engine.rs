//! Tick → alert matching.
//!
//! For every tick the engine:
//! 1. snapshots the pending conditions of the instrument (cheap exit when
//!    there are none),
//! 2. evaluates each condition's predicates (ceiling, floor, schedule)
//!    against the tick price and a single `now`,
//! 3. notifies the owner of every fired condition and asks the durable
//!    store to persist `Triggered` (best effort),
//! 4. removes all fired ids from the live index in one batch.
//!
//! No lock is held while notifying, so slow channels (mail relay round
//! trips) only delay this instrument's tick, never readers of the index.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::alert_store::AlertStore;
use crate::condition::{AlertCondition, AlertId};
use crate::notify::Notify;
use crate::repository::AlertRepository;
use crate::trigger::{self, Trigger};

/// A condition that fired on a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredAlert {
    pub id: AlertId,
    pub account: String,
    pub trigger: Trigger,
}

pub struct MatchingEngine<N> {
    store: Arc<AlertStore>,
    repository: Arc<dyn AlertRepository>,
    notifier: N,
}

impl<N: Notify> MatchingEngine<N> {
    pub fn new(store: Arc<AlertStore>, repository: Arc<dyn AlertRepository>, notifier: N) -> Self {
        MatchingEngine {
            store,
            repository,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<AlertStore> {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Evaluate one tick against local wall-clock time.
    pub async fn evaluate(&self, instrument: &str, price: f64) -> Vec<FiredAlert> {
        let candidates = self.store.lookup(instrument);
        if candidates.is_empty() {
            return Vec::new();
        }
        let now = Local::now().naive_local();
        self.process(instrument, price, now, candidates).await
    }

    /// Evaluate one tick as of `now`.
    pub async fn evaluate_at(
        &self,
        instrument: &str,
        price: f64,
        now: NaiveDateTime,
    ) -> Vec<FiredAlert> {
        let candidates = self.store.lookup(instrument);
        if candidates.is_empty() {
            return Vec::new();
        }
        self.process(instrument, price, now, candidates).await
    }

    async fn process(
        &self,
        instrument: &str,
        price: f64,
        now: NaiveDateTime,
        candidates: Vec<AlertCondition>,
    ) -> Vec<FiredAlert> {
        let mut fired = Vec::new();

        for condition in candidates {
            let Some(trigger) = trigger::evaluate(&condition, price, now) else {
                continue;
            };

            let reason = trigger.to_string();
            info!(
                alert_id = %condition.id,
                account = %condition.account,
                instrument,
                price,
                reason = %reason,
                "alert fired"
            );

            self.notifier
                .notify(&condition.account, instrument, price, &reason)
                .await;

            if let Err(e) = self.repository.mark_triggered(condition.id).await {
                warn!(alert_id = %condition.id, error = %e, "failed to persist triggered state");
            }

            fired.push(FiredAlert {
                id: condition.id,
                account: condition.account,
                trigger,
            });
        }

        if !fired.is_empty() {
            let ids: HashSet<AlertId> = fired.iter().map(|f| f.id).collect();
            let removed = self.store.remove(instrument, &ids);
            debug!(instrument, removed, "dropped fired alerts from index");
        }

        fired
    }
}
