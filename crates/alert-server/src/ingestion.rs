//! Tick ingestion loop.
//!
//! This task owns the receiving end of the tick channel, so ticks are
//! evaluated one at a time in arrival order. Notifications are awaited
//! here too: while a mail is being delivered, later ticks queue up in the
//! channel. The email channel caps one delivery at a few multiples of the
//! SMTP timeout.

use std::sync::Arc;

use alert_core::{FiredAlert, MatchingEngine, Notify, PriceCache, Tick};
use tracing::{debug, info};

use crate::types::{StopSignal, TickRx};

pub struct IngestionAdapter<N> {
    engine: Arc<MatchingEngine<N>>,
    prices: Arc<PriceCache>,
}

impl<N: Notify> IngestionAdapter<N> {
    pub fn new(engine: Arc<MatchingEngine<N>>, prices: Arc<PriceCache>) -> Self {
        IngestionAdapter { engine, prices }
    }

    /// Record the last price, then match the tick.
    pub async fn on_tick(&self, tick: &Tick) -> Vec<FiredAlert> {
        self.prices.update(&tick.instrument, tick.price);
        self.engine.evaluate(&tick.instrument, tick.price).await
    }

    /// Run until the channel closes or `stop` fires.
    pub async fn run(&self, mut ticks: TickRx, mut stop: StopSignal) {
        let mut processed: u64 = 0;
        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                next = ticks.recv() => {
                    let Some(tick) = next else {
                        debug!("tick channel closed");
                        break;
                    };
                    self.on_tick(&tick).await;
                    processed += 1;
                }
            }
        }
        info!(processed, "ingestion loop shutting down");
    }
}
