//! Shared types for the alert service tasks.
//!
//! This module defines:
//! - `RunFlag` / `StopSignal`: the process-wide run flag and its observers
//! - channel aliases between the feed session and the ingestion task

use std::sync::Arc;
use std::time::Duration;

use alert_core::Tick;
use tokio::sync::{mpsc, watch};

/// Owner side of the run flag. Starts out "running"; `stop` is one-way.
#[derive(Debug, Clone)]
pub struct RunFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl RunFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        RunFlag { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_running(&self) -> bool {
        *self.tx.borrow()
    }

    /// A new observer for a background task.
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        RunFlag::new()
    }
}

/// Observer side of the run flag, one per task.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Also true once the owning `RunFlag` is gone.
    pub fn is_stopped(&self) -> bool {
        !*self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once the flag is cleared (or its owner is gone).
    pub async fn stopped(&mut self) {
        while *self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `period`, waking early on stop. Returns `true` if stopped.
    pub async fn sleep(&mut self, period: Duration) -> bool {
        let _ = tokio::time::timeout(period, self.stopped()).await;
        self.is_stopped()
    }
}

/// Ticks from the feed session → ingestion task.
pub type TickTx = mpsc::UnboundedSender<Tick>;
pub type TickRx = mpsc::UnboundedReceiver<Tick>;
