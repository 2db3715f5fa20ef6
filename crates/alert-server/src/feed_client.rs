//! TCP session with the market data feed.
//!
//! One connection carries the line protocol from `alert_protocol::feed_codec`.
//! A reader task owns the read half and:
//! - answers `CONNECTED` with the login request,
//! - flips the shared `logged_in` flag on login results,
//! - routes subscription acks to whoever is waiting in `subscribe`,
//! - forwards ticks to the ingestion channel.
//!
//! The write half is shared behind a mutex so requests from the service
//! and the reader's automatic login never interleave on the wire.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alert_protocol::{format_request, parse_event_line, FeedEvent, FeedRequest};
use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::types::{StopSignal, TickTx};

/// Poll step of the login wait.
const LOGIN_POLL: Duration = Duration::from_millis(100);

/// How long `subscribe_until` waits for the login before trying anyway.
const SUBSCRIBE_LOGIN_WAIT: Duration = Duration::from_secs(5);

/// How long to wait for the acks of one SUB request.
const SUBSCRIBE_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Lines longer than this are dropped.
const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("cannot connect to feed {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("no answer from feed {addr} within {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("feed i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("feed session is not connected")]
    NotConnected,

    #[error("feed session closed")]
    Disconnected,

    #[error("subscription rejected (code {code}): {message}")]
    SubscribeRejected { code: i32, message: String },

    #[error("no subscription ack within {0:?}")]
    Timeout(Duration),
}

/// Where and as whom to connect.
#[derive(Clone)]
pub struct FeedSettings {
    pub addr: String,
    pub broker_id: String,
    pub user_id: String,
    pub password: String,
    /// Ceiling of the TCP connect.
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for FeedSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSettings")
            .field("addr", &self.addr)
            .field("broker_id", &self.broker_id)
            .field("user_id", &self.user_id)
            .field("password", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[derive(Debug)]
enum SubscribeOutcome {
    Accepted(String),
    Rejected { code: i32, message: String },
}

/// State shared between the client handle and its reader task.
struct Shared {
    settings: FeedSettings,
    connected: AtomicBool,
    logged_in: AtomicBool,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl Shared {
    async fn send(&self, req: &FeedRequest) -> Result<(), FeedError> {
        let line = format!("{}\n", format_request(req));
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(FeedError::NotConnected)?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn send_login(&self) -> Result<(), FeedError> {
        let req = FeedRequest::Login {
            broker: self.settings.broker_id.clone(),
            user: self.settings.user_id.clone(),
            password: self.settings.password.clone(),
        };
        self.send(&req).await
    }

    async fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.logged_in.store(false, Ordering::SeqCst);
        self.writer.lock().await.take();
    }
}

pub struct FeedClient {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    outcomes: Mutex<mpsc::UnboundedReceiver<SubscribeOutcome>>,
    subscribed: Mutex<Vec<String>>,
}

impl FeedClient {
    /// Open the session. Ticks received from now on go to `ticks`.
    pub async fn connect(settings: FeedSettings, ticks: TickTx) -> Result<FeedClient, FeedError> {
        let connecting = TcpStream::connect(&settings.addr);
        let stream = match tokio::time::timeout(settings.connect_timeout, connecting).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(FeedError::Connect {
                    addr: settings.addr.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(FeedError::ConnectTimeout {
                    addr: settings.addr.clone(),
                    timeout: settings.connect_timeout,
                })
            }
        };
        stream.set_nodelay(true).ok();
        info!(addr = %settings.addr, "connected to feed");

        let (read_half, write_half) = stream.into_split();
        let shared = Arc::new(Shared {
            settings,
            connected: AtomicBool::new(true),
            logged_in: AtomicBool::new(false),
            writer: Mutex::new(Some(write_half)),
        });

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let reader = {
            let shared = shared.clone();
            tokio::spawn(async move {
                run_reader(read_half, shared, ticks, outcome_tx).await;
            })
        };

        Ok(FeedClient {
            shared,
            reader: Mutex::new(Some(reader)),
            outcomes: Mutex::new(outcome_rx),
            subscribed: Mutex::new(Vec::new()),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_logged_in(&self) -> bool {
        self.shared.logged_in.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for the feed to confirm the login.
    pub async fn login(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_logged_in() {
                return true;
            }
            if !self.is_connected() || Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(LOGIN_POLL).await;
        }
    }

    /// Subscribe once and wait for every instrument to be acknowledged.
    pub async fn subscribe(&self, instruments: &[String]) -> Result<(), FeedError> {
        if instruments.is_empty() {
            debug!("nothing to subscribe");
            return Ok(());
        }

        let mut outcomes = self.outcomes.lock().await;
        while outcomes.try_recv().is_ok() {}

        self.shared
            .send(&FeedRequest::Subscribe(instruments.to_vec()))
            .await?;

        let mut pending: HashSet<&str> = instruments.iter().map(String::as_str).collect();
        let deadline = Instant::now() + SUBSCRIBE_ACK_TIMEOUT;
        while !pending.is_empty() {
            let outcome = match tokio::time::timeout_at(deadline, outcomes.recv()).await {
                Err(_) => return Err(FeedError::Timeout(SUBSCRIBE_ACK_TIMEOUT)),
                Ok(None) => return Err(FeedError::Disconnected),
                Ok(Some(outcome)) => outcome,
            };
            match outcome {
                SubscribeOutcome::Accepted(instrument) => {
                    debug!(instrument = %instrument, "subscribed");
                    pending.remove(instrument.as_str());
                }
                SubscribeOutcome::Rejected { code, message } => {
                    return Err(FeedError::SubscribeRejected { code, message });
                }
            }
        }

        *self.subscribed.lock().await = instruments.to_vec();
        info!(count = instruments.len(), "feed subscription active");
        Ok(())
    }

    /// Subscribe, retrying every `retry` until it succeeds or `stop` fires.
    ///
    /// Returns `false` if stopped before the subscription went through.
    pub async fn subscribe_until(
        &self,
        instruments: &[String],
        retry: Duration,
        mut stop: StopSignal,
    ) -> bool {
        let confirmed = tokio::select! {
            _ = stop.stopped() => return false,
            ok = self.login(SUBSCRIBE_LOGIN_WAIT) => ok,
        };
        if !confirmed {
            warn!("feed login not confirmed, subscribing anyway");
        }

        loop {
            let result = tokio::select! {
                _ = stop.stopped() => return false,
                result = self.subscribe(instruments) => result,
            };
            match result {
                Ok(()) => return true,
                Err(e) => warn!(error = %e, retry_ms = retry.as_millis() as u64, "subscribe failed, retrying"),
            }
            if stop.sleep(retry).await {
                return false;
            }
        }
    }

    /// Drop the current subscription. A no-op when nothing is subscribed.
    pub async fn unsubscribe(&self) -> Result<(), FeedError> {
        let instruments = std::mem::take(&mut *self.subscribed.lock().await);
        if instruments.is_empty() {
            return Ok(());
        }
        self.shared.send(&FeedRequest::Unsubscribe(instruments)).await
    }

    /// Close the connection and wait for the reader task.
    pub async fn close(&self) {
        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
            let _ = reader.await;
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.logged_in.store(false, Ordering::SeqCst);
        info!("feed session closed");
    }
}

async fn run_reader(
    mut read_half: OwnedReadHalf,
    shared: Arc<Shared>,
    ticks: TickTx,
    outcomes: mpsc::UnboundedSender<SubscribeOutcome>,
) {
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        match read_half.read_buf(&mut buffer).await {
            Ok(0) => {
                info!("feed closed the connection");
                break;
            }
            Ok(_) => {
                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line = buffer.split_to(pos + 1);
                    let line = String::from_utf8_lossy(&line);
                    handle_line(line.trim(), &shared, &ticks, &outcomes).await;
                }
                if buffer.len() > MAX_LINE_LEN {
                    warn!(len = buffer.len(), "feed line too long, dropped");
                    buffer.clear();
                }
            }
            Err(e) => {
                warn!(error = %e, "feed read error");
                break;
            }
        }
    }

    shared.mark_disconnected().await;
}

async fn handle_line(
    line: &str,
    shared: &Shared,
    ticks: &TickTx,
    outcomes: &mpsc::UnboundedSender<SubscribeOutcome>,
) {
    let event = match parse_event_line(line) {
        Ok(Some(event)) => event,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "unparseable feed line skipped");
            return;
        }
    };

    match event {
        FeedEvent::Connected => {
            shared.connected.store(true, Ordering::SeqCst);
            info!(user = %shared.settings.user_id, "feed session ready, logging in");
            if let Err(e) = shared.send_login().await {
                warn!(error = %e, "failed to send login");
            }
        }
        FeedEvent::LoginOk { detail } => {
            shared.logged_in.store(true, Ordering::SeqCst);
            info!(detail = %detail, "feed login ok");
        }
        FeedEvent::LoginRejected { code, message } => {
            shared.logged_in.store(false, Ordering::SeqCst);
            warn!(code, message = %message, "feed login rejected");
        }
        FeedEvent::Subscribed { instrument } => {
            let _ = outcomes.send(SubscribeOutcome::Accepted(instrument));
        }
        FeedEvent::SubscribeRejected { code, message } => {
            warn!(code, message = %message, "feed subscription rejected");
            let _ = outcomes.send(SubscribeOutcome::Rejected { code, message });
        }
        FeedEvent::Tick(tick) => {
            if ticks.send(tick).is_err() {
                debug!("tick dropped, ingestion has stopped");
            }
        }
    }
}
