//! Notification channels.
//!
//! The channel is picked once at startup from the config and then handed
//! to the matching engine as a closed enum. Neither variant reports
//! failure to its caller: delivery problems are logged here and the
//! engine moves on.
//!
//! Email delivery runs inline on the tick path, so a slow relay holds up
//! matching for that long. Each relay step is bounded by the SMTP
//! `io_timeout` and the whole delivery by [`SEND_TIMEOUT_FACTOR`] times it.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use alert_core::{EmailDirectory, Notify};
use alert_protocol::{Mail, SmtpClient, SmtpSettings};
use async_trait::async_trait;
use chrono::Local;
use tracing::{error, info, warn};

/// Time stamp format used in notification texts.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Ceiling of one whole delivery, in units of the SMTP `io_timeout`.
pub const SEND_TIMEOUT_FACTOR: u32 = 3;

pub enum Notifier {
    Console(ConsoleNotifier),
    Email(EmailNotifier),
}

impl Notifier {
    pub fn console() -> Self {
        Notifier::Console(ConsoleNotifier)
    }

    pub fn email(settings: SmtpSettings, directory: Arc<dyn EmailDirectory>) -> Self {
        Notifier::Email(EmailNotifier::new(settings, directory))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notifier::Console(_) => "console",
            Notifier::Email(_) => "email",
        }
    }
}

#[async_trait]
impl Notify for Notifier {
    async fn notify(&self, account: &str, instrument: &str, price: f64, reason: &str) {
        match self {
            Notifier::Console(n) => n.notify(account, instrument, price, reason),
            Notifier::Email(n) => n.notify(account, instrument, price, reason).await,
        }
    }
}

/// Writes one line per alert to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn notify(&self, account: &str, instrument: &str, price: f64, reason: &str) {
        let line = format_console_line(account, instrument, price, reason, &now_text());
        let mut out = std::io::stdout().lock();
        // A closed stdout is not worth stopping the matcher for.
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

pub fn format_console_line(
    account: &str,
    instrument: &str,
    price: f64,
    reason: &str,
    time: &str,
) -> String {
    format!("[ALERT {time}] account={account} instrument={instrument} price={price} reason={reason}")
}

/// Mails the account owner through the configured relay.
pub struct EmailNotifier {
    client: SmtpClient,
    directory: Arc<dyn EmailDirectory>,
    send_timeout: Duration,
}

impl EmailNotifier {
    pub fn new(settings: SmtpSettings, directory: Arc<dyn EmailDirectory>) -> Self {
        let send_timeout = settings.io_timeout * SEND_TIMEOUT_FACTOR;
        EmailNotifier {
            client: SmtpClient::new(settings),
            directory,
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub async fn notify(&self, account: &str, instrument: &str, price: f64, reason: &str) {
        info!(account, instrument, price, reason, "alert");

        let address = match self.directory.lookup_email(account).await {
            Ok(Some(address)) if !address.trim().is_empty() => address,
            Ok(_) => {
                warn!(account, "no email address on file, notification dropped");
                return;
            }
            Err(e) => {
                warn!(account, error = %e, "email lookup failed, notification dropped");
                return;
            }
        };

        let mail = compose_mail(&address, account, instrument, price, reason, &now_text());
        match tokio::time::timeout(self.send_timeout, self.client.send(&mail)).await {
            Ok(Ok(())) => info!(account, to = %address, instrument, "alert mail sent"),
            Ok(Err(e)) => error!(
                account,
                to = %address,
                instrument,
                step = %e.step(),
                error = %e,
                "alert mail failed"
            ),
            Err(_) => error!(
                account,
                to = %address,
                instrument,
                timeout = ?self.send_timeout,
                "alert mail abandoned, relay too slow"
            ),
        }
    }
}

pub fn compose_mail(
    to: &str,
    account: &str,
    instrument: &str,
    price: f64,
    reason: &str,
    time: &str,
) -> Mail {
    Mail {
        to: to.to_string(),
        subject: format!("Price alert - {instrument}"),
        body: format!(
            "Account: {account}\n\
             Instrument: {instrument}\n\
             Price: {price}\n\
             Reason: {reason}\n\
             Time: {time}\n"
        ),
    }
}

fn now_text() -> String {
    Local::now().format(TIME_FORMAT).to_string()
}
