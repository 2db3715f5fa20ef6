//! Service wiring and lifecycle.
//!
//! `Service::start`:
//! - builds the notification channel picked in the config,
//! - loads the alert index once (a failure here is logged, not fatal),
//! - connects the feed session (fatal on failure),
//! - spawns the background tasks:
//!   - ingestion: tick channel → price cache → matching engine,
//!   - subscribe: waits for login, then subscribes with retry,
//!   - reload: refreshes the alert index on a fixed interval,
//!   - heartbeat: logs the last price of every subscribed instrument,
//!   - shutdown monitor: on stop, unsubscribes and closes the feed.
//!
//! `Service::stop` flips the run flag and joins every task.

use std::sync::Arc;
use std::time::Duration;

use alert_core::{AlertRepository, AlertStore, EmailDirectory, MatchingEngine, PriceCache};
use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, NotifierKind};
use crate::feed_client::FeedClient;
use crate::ingestion::IngestionAdapter;
use crate::json_store::JsonFileRepository;
use crate::notifier::Notifier;
use crate::types::{RunFlag, StopSignal, TickRx, TickTx};

pub struct Service {
    run: RunFlag,
    store: Arc<AlertStore>,
    prices: Arc<PriceCache>,
    feed: Arc<FeedClient>,
    instruments: Vec<String>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Service {
    /// Start against the JSON alert file named in the config.
    pub async fn start(config: Config) -> anyhow::Result<Service> {
        let repository = Arc::new(JsonFileRepository::new(&config.store.path));
        info!(path = %repository.path().display(), "using alert file");
        Service::start_with(config, repository.clone(), repository).await
    }

    /// Start against explicit store collaborators.
    pub async fn start_with(
        config: Config,
        repository: Arc<dyn AlertRepository>,
        directory: Arc<dyn EmailDirectory>,
    ) -> anyhow::Result<Service> {
        let notifier = build_notifier(&config, directory)?;
        info!(notifier = notifier.kind(), "notification channel ready");

        let store = Arc::new(AlertStore::new(repository.clone()));
        match store.reload().await {
            Ok(count) => info!(count, "initial alert load"),
            Err(e) => warn!(error = %e, "initial alert load failed, starting with an empty index"),
        }

        let instruments = subscription_list(&store, &config.default_instruments);
        info!(instruments = ?instruments, "subscription list");

        let (tick_tx, tick_rx): (TickTx, TickRx) = mpsc::unbounded_channel();
        let feed = FeedClient::connect(config.feed.settings(), tick_tx)
            .await
            .with_context(|| format!("failed to start feed session at {}", config.feed.addr))?;
        let feed = Arc::new(feed);

        let run = RunFlag::new();
        let prices = Arc::new(PriceCache::new());
        let engine = Arc::new(MatchingEngine::new(store.clone(), repository, notifier));
        let mut tasks = Vec::new();

        // Ingestion starts before login so no early tick is lost.
        {
            let adapter = IngestionAdapter::new(engine, prices.clone());
            let signal = run.signal();
            tasks.push((
                "ingestion",
                tokio::spawn(async move { adapter.run(tick_rx, signal).await }),
            ));
        }

        if feed.login(config.feed.login_timeout()).await {
            info!("feed login confirmed");
        } else {
            warn!(
                timeout_secs = config.feed.login_timeout_secs,
                "feed login not confirmed in time"
            );
        }

        {
            let feed = feed.clone();
            let instruments = instruments.clone();
            let retry = config.feed.subscribe_retry();
            let signal = run.signal();
            tasks.push((
                "subscribe",
                tokio::spawn(async move {
                    feed.subscribe_until(&instruments, retry, signal).await;
                }),
            ));
        }

        tasks.push((
            "reload",
            tokio::spawn(run_reload_loop(store.clone(), config.reload_interval(), run.signal())),
        ));

        tasks.push((
            "heartbeat",
            tokio::spawn(run_heartbeat(
                prices.clone(),
                feed.clone(),
                instruments.clone(),
                config.heartbeat_interval(),
                run.signal(),
            )),
        ));

        tasks.push((
            "shutdown",
            tokio::spawn(run_shutdown_monitor(feed.clone(), run.signal())),
        ));

        info!(tasks = tasks.len(), "alert service started");

        Ok(Service {
            run,
            store,
            prices,
            feed,
            instruments,
            tasks,
        })
    }

    pub fn store(&self) -> &Arc<AlertStore> {
        &self.store
    }

    pub fn prices(&self) -> &Arc<PriceCache> {
        &self.prices
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    pub fn is_logged_in(&self) -> bool {
        self.feed.is_logged_in()
    }

    /// Handle that can stop the service from elsewhere.
    pub fn run_flag(&self) -> RunFlag {
        self.run.clone()
    }

    pub async fn stop(self) {
        info!("stopping alert service");
        self.run.stop();
        self.wait().await;
    }

    /// Wait for every background task to finish.
    pub async fn wait(self) {
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "background task ended abnormally");
            }
        }
        info!("alert service stopped");
    }
}

fn build_notifier(config: &Config, directory: Arc<dyn EmailDirectory>) -> anyhow::Result<Notifier> {
    match config.notifier.kind {
        NotifierKind::Console => Ok(Notifier::console()),
        NotifierKind::Email => {
            if config.smtp.host.trim().is_empty() {
                bail!("email notifier selected but no smtp host configured");
            }
            Ok(Notifier::email(config.smtp.settings(), directory))
        }
    }
}

/// Instruments of the pending alerts, or `defaults` when there are none.
pub fn subscription_list(store: &AlertStore, defaults: &[String]) -> Vec<String> {
    let instruments = store.instruments();
    if instruments.is_empty() {
        debug!("no pending alerts, using default instruments");
        defaults.to_vec()
    } else {
        instruments
    }
}

async fn run_reload_loop(store: Arc<AlertStore>, interval: Duration, mut stop: StopSignal) {
    while !stop.sleep(interval).await {
        match store.reload().await {
            Ok(count) => debug!(count, "alert index reloaded"),
            Err(e) => warn!(error = %e, "alert reload failed, keeping previous index"),
        }
    }
    debug!("reload loop exiting");
}

async fn run_heartbeat(
    prices: Arc<PriceCache>,
    feed: Arc<FeedClient>,
    instruments: Vec<String>,
    interval: Duration,
    mut stop: StopSignal,
) {
    while !stop.sleep(interval).await {
        info!(
            connected = feed.is_connected(),
            logged_in = feed.is_logged_in(),
            "heartbeat"
        );
        for instrument in &instruments {
            match prices.last_price(instrument) {
                Some(price) => info!(instrument = %instrument, price, "last price"),
                None => debug!(instrument = %instrument, "no price yet"),
            }
        }
    }
}

async fn run_shutdown_monitor(feed: Arc<FeedClient>, mut stop: StopSignal) {
    stop.stopped().await;
    if let Err(e) = feed.unsubscribe().await {
        warn!(error = %e, "unsubscribe failed");
    }
    feed.close().await;
}
