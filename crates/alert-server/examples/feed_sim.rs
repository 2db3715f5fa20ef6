//! Minimal market data feed for local runs.
//!
//! Accepts one session at a time, confirms login and subscriptions, then
//! walks each subscribed instrument's price up and down.
//!
//!     FEED_SIM_ADDR=127.0.0.1:30011 cargo run -p alert-server --example feed_sim

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use alert_core::Tick;
use alert_protocol::{format_event, parse_request_line, FeedEvent, FeedRequest};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let addr = env::var("FEED_SIM_ADDR").unwrap_or_else(|_| "127.0.0.1:30011".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "feed simulator listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        info!(peer = %peer, "session opened");
        if let Err(e) = run_session(stream).await {
            warn!(peer = %peer, error = %e, "session ended with error");
        } else {
            info!(peer = %peer, "session closed");
        }
    }
}

async fn run_session(stream: TcpStream) -> anyhow::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut prices: BTreeMap<String, f64> = BTreeMap::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let mut step: u64 = 0;

    send(&mut write, &FeedEvent::Connected).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { return Ok(()) };
                match parse_request_line(&line) {
                    Some(FeedRequest::Login { user, .. }) => {
                        info!(user = %user, "login");
                        send(&mut write, &FeedEvent::LoginOk { detail: "simulator".into() }).await?;
                    }
                    Some(FeedRequest::Subscribe(symbols)) => {
                        for symbol in symbols {
                            prices.entry(symbol.clone()).or_insert(100.0);
                            send(&mut write, &FeedEvent::Subscribed { instrument: symbol }).await?;
                        }
                    }
                    Some(FeedRequest::Unsubscribe(symbols)) => {
                        for symbol in symbols {
                            prices.remove(&symbol);
                        }
                    }
                    None => warn!(line = %line, "unknown request"),
                }
            }
            _ = ticker.tick() => {
                step += 1;
                for (i, (symbol, price)) in prices.iter_mut().enumerate() {
                    // Triangle wave, a different phase per instrument.
                    let phase = (step + i as u64 * 7) % 40;
                    let delta = if phase < 20 { 0.5 } else { -0.5 };
                    *price += delta;
                    let tick = FeedEvent::Tick(Tick::new(symbol.clone(), *price));
                    send(&mut write, &tick).await?;
                }
            }
        }
    }
}

async fn send(write: &mut tokio::net::tcp::OwnedWriteHalf, event: &FeedEvent) -> anyhow::Result<()> {
    let line = format!("{}\n", format_event(event));
    write.write_all(line.as_bytes()).await?;
    Ok(())
}
