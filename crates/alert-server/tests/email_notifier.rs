// crates/alert-server/tests/email_notifier.rs
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alert_core::{InMemoryRepository, Notify};
use alert_protocol::SmtpSettings;
use alert_server::notifier::Notifier;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const REPLIES: [&str; 9] = [
    "250 relay.test\r\n",
    "334 VXNlcm5hbWU6\r\n",
    "334 UGFzc3dvcmQ6\r\n",
    "235 ok\r\n",
    "250 ok\r\n",
    "250 ok\r\n",
    "354 go ahead\r\n",
    "250 queued\r\n",
    "221 bye\r\n",
];

/// Relay accepting at most one session within `accept_within`, waiting
/// `reply_delay` before every reply. Returns the raw lines it received, or
/// `None` if nobody connected.
async fn spawn_relay(
    greeting: &'static str,
    accept_within: Duration,
    reply_delay: Duration,
) -> (SocketAddr, JoinHandle<Option<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = tokio::time::timeout(accept_within, listener.accept())
            .await
            .ok()?
            .ok()?;
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        tokio::time::sleep(reply_delay).await;
        write.write_all(greeting.as_bytes()).await.ok()?;
        if !greeting.starts_with("220") {
            return Some(Vec::new());
        }

        let mut received = Vec::new();
        let mut replies = REPLIES.iter();
        let mut in_data = false;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                break;
            }
            let ends_data = line == ".\r\n";
            received.push(line);
            if in_data && !ends_data {
                continue;
            }
            let last = received.last().map(String::as_str);
            in_data = last == Some("DATA\r\n");
            let Some(reply) = replies.next() else { break };
            tokio::time::sleep(reply_delay).await;
            if write.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
        Some(received)
    });

    (addr, handle)
}

fn email_notifier(addr: SocketAddr, directory: Arc<InMemoryRepository>) -> Notifier {
    email_notifier_with_timeout(addr, directory, Duration::from_secs(5))
}

fn email_notifier_with_timeout(
    addr: SocketAddr,
    directory: Arc<InMemoryRepository>,
    io_timeout: Duration,
) -> Notifier {
    let mut settings = SmtpSettings::new("127.0.0.1", addr.port(), "alerts@example.com", "pw");
    settings.io_timeout = io_timeout;
    Notifier::email(settings, directory)
}

#[tokio::test]
async fn alert_is_mailed_to_account_address() {
    let (addr, relay) = spawn_relay("220 relay.test\r\n", Duration::from_secs(5), Duration::ZERO).await;
    let directory = Arc::new(InMemoryRepository::new());
    directory.set_email("alice", "alice@example.com");

    email_notifier(addr, directory)
        .notify("alice", "IF2512", 4500.0, "price >= ceiling 4500")
        .await;

    let received = relay.await.unwrap().expect("relay was contacted");
    assert!(received.contains(&"RCPT TO: <alice@example.com>\r\n".to_string()), "{received:#?}");
    assert!(received.contains(&"Subject: Price alert - IF2512\r\n".to_string()));
    assert!(received.contains(&"Account: alice\r\n".to_string()));
    assert!(received.contains(&"Reason: price >= ceiling 4500\r\n".to_string()));
    assert_eq!(received.last().map(String::as_str), Some("QUIT\r\n"));
}

#[tokio::test]
async fn account_without_address_sends_nothing() {
    let (addr, relay) = spawn_relay("220 relay.test\r\n", Duration::from_millis(300), Duration::ZERO).await;
    let directory = Arc::new(InMemoryRepository::new());

    email_notifier(addr, directory)
        .notify("nobody", "IF2512", 4500.0, "price >= ceiling 4500")
        .await;

    assert!(relay.await.unwrap().is_none(), "relay must not be contacted");
}

#[tokio::test]
async fn relay_failure_is_swallowed() {
    let (addr, relay) = spawn_relay("421 busy\r\n", Duration::from_secs(5), Duration::ZERO).await;
    let directory = Arc::new(InMemoryRepository::new());
    directory.set_email("alice", "alice@example.com");

    tokio::time::timeout(
        Duration::from_secs(5),
        email_notifier(addr, directory).notify("alice", "IF2512", 4500.0, "price >= ceiling 4500"),
    )
    .await
    .expect("notify returns after a failed delivery");

    assert_eq!(relay.await.unwrap(), Some(Vec::new()));
}

#[tokio::test]
async fn slow_relay_is_abandoned_after_the_delivery_ceiling() {
    // Every reply is inside the per-step timeout, the whole session is not.
    let (addr, relay) =
        spawn_relay("220 relay.test\r\n", Duration::from_secs(5), Duration::from_millis(200)).await;
    let directory = Arc::new(InMemoryRepository::new());
    directory.set_email("alice", "alice@example.com");

    let started = Instant::now();
    email_notifier_with_timeout(addr, directory, Duration::from_millis(400))
        .notify("alice", "IF2512", 4500.0, "price >= ceiling 4500")
        .await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(1000), "gave up early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1700), "not abandoned: {elapsed:?}");

    let received = relay.await.unwrap().expect("relay was contacted");
    assert!(!received.contains(&"QUIT\r\n".to_string()), "{received:#?}");
}

#[tokio::test]
async fn console_channel_never_fails() {
    Notifier::console()
        .notify("alice", "IF2512", 4500.0, "price >= ceiling 4500")
        .await;
}
