//! Minimal outbound mail submission client.
//!
//! One call to [`SmtpClient::send`] opens a fresh TCP connection, walks the
//! submission dialogue and closes the connection again:
//!
//! ```text
//! connect
//!   <- 220 greeting
//! EHLO <domain>          -> 250
//! AUTH LOGIN             -> 334
//! base64(username)       -> 334
//! base64(password)       -> 235
//! MAIL FROM: <sender>    -> 250
//! RCPT TO: <recipient>   -> 250
//! DATA                   -> 354
//! headers, body, "."     -> 250
//! QUIT                   -> 221 (best effort)
//! ```
//!
//! A reply is accepted iff it starts with the expected code. The first
//! mismatch, transport error or timeout aborts the dialogue and the
//! connection is dropped; there is no retry and no connection reuse.
//!
//! Only `AUTH LOGIN` and a single plain-text message shape are supported.

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::wire_types::{reply, CRLF, MAX_REPLY_LEN, READ_CHUNK};

/// Position in the submission dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Connect,
    Greeting,
    Ehlo,
    AuthLogin,
    Username,
    Password,
    MailFrom,
    RcptTo,
    Data,
    Body,
    Quit,
}

impl Step {
    /// Reply code prefix that lets the dialogue continue past this step.
    pub fn expected_code(self) -> &'static str {
        match self {
            Step::Connect | Step::Greeting => reply::SERVICE_READY,
            Step::Ehlo | Step::MailFrom | Step::RcptTo | Step::Body => reply::OK,
            Step::AuthLogin | Step::Username => reply::AUTH_CONTINUE,
            Step::Password => reply::AUTH_SUCCESS,
            Step::Data => reply::START_MAIL_INPUT,
            Step::Quit => reply::CLOSING,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Connect => "connect",
            Step::Greeting => "greeting",
            Step::Ehlo => "EHLO",
            Step::AuthLogin => "AUTH LOGIN",
            Step::Username => "username",
            Step::Password => "password",
            Step::MailFrom => "MAIL FROM",
            Step::RcptTo => "RCPT TO",
            Step::Data => "DATA",
            Step::Body => "message body",
            Step::Quit => "QUIT",
        };
        f.write_str(name)
    }
}

/// Why a submission failed.
#[derive(Debug, Error)]
pub enum SmtpError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{step}: i/o error: {source}")]
    Io {
        step: Step,
        #[source]
        source: std::io::Error,
    },

    #[error("{step}: timed out")]
    Timeout { step: Step },

    #[error("{step}: connection closed by relay")]
    Closed { step: Step },

    #[error("{step}: expected {expected}, relay replied {reply:?}")]
    Rejected {
        step: Step,
        expected: &'static str,
        reply: String,
    },

    #[error("{step}: reply too long")]
    ReplyTooLong { step: Step },
}

impl SmtpError {
    /// The dialogue step at which the submission stopped.
    pub fn step(&self) -> Step {
        match self {
            SmtpError::Connect { .. } => Step::Connect,
            SmtpError::Io { step, .. }
            | SmtpError::Timeout { step }
            | SmtpError::Closed { step }
            | SmtpError::Rejected { step, .. }
            | SmtpError::ReplyTooLong { step } => *step,
        }
    }
}

/// Relay endpoint and account.
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,

    /// Envelope and `From:` address.
    pub sender: String,

    /// Domain announced in `EHLO`.
    pub helo_domain: String,

    /// Bound on connect and on every single read / write.
    pub io_timeout: Duration,
}

impl SmtpSettings {
    /// Settings where the sender address is the login name.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let username = username.into();
        SmtpSettings {
            host: host.into(),
            port,
            sender: username.clone(),
            username,
            password: password.into(),
            helo_domain: "localhost".to_string(),
            io_timeout: Duration::from_secs(10),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("sender", &self.sender)
            .field("helo_domain", &self.helo_domain)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

/// A single plain-text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Base64 (standard alphabet, `=` padding) of a credential line.
pub fn encode_credential(credential: &str) -> String {
    STANDARD.encode(credential.as_bytes())
}

/// Inverse of [`encode_credential`]; `None` if not valid base64 / UTF-8.
pub fn decode_credential(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded.trim()).ok()?;
    String::from_utf8(bytes).ok()
}

/// Build the DATA payload: headers, blank line, body, terminating dot line.
///
/// Body lines are re-terminated with CRLF and lines starting with `.` are
/// dot-stuffed so they cannot end the DATA phase early.
pub fn format_message(from: &str, mail: &Mail) -> String {
    let mut out = String::with_capacity(mail.body.len() + 128);

    for (name, value) in [
        ("From", from),
        ("To", mail.to.as_str()),
        ("Subject", mail.subject.as_str()),
    ] {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(&single_line(value));
        out.push_str(CRLF);
    }
    out.push_str(CRLF);

    for line in mail.body.lines() {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str(CRLF);
    }

    out.push('.');
    out.push_str(CRLF);
    out
}

fn single_line(value: &str) -> String {
    value.replace(|c: char| c == '\r' || c == '\n', " ")
}

/// Stateless mail sender; every [`send`](SmtpClient::send) is independent.
#[derive(Debug, Clone)]
pub struct SmtpClient {
    settings: SmtpSettings,
}

impl SmtpClient {
    pub fn new(settings: SmtpSettings) -> Self {
        SmtpClient { settings }
    }

    pub fn settings(&self) -> &SmtpSettings {
        &self.settings
    }

    /// Deliver `mail` through a fresh connection to the configured relay.
    pub async fn send(&self, mail: &Mail) -> Result<(), SmtpError> {
        let addr = self.settings.addr();
        let stream = match timeout(self.settings.io_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(SmtpError::Connect { addr, source }),
            Err(_) => return Err(SmtpError::Timeout { step: Step::Connect }),
        };
        debug!(relay = %addr, "connected to mail relay");

        self.send_over(stream, mail).await
    }

    /// Run the dialogue over an already established stream. The stream is
    /// shut down and dropped before returning, on success and on failure.
    pub async fn send_over<S>(&self, stream: S, mail: &Mail) -> Result<(), SmtpError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut session = Session::new(stream, self.settings.io_timeout);
        let result = self.converse(&mut session, mail).await;
        session.close().await;
        result
    }

    async fn converse<S>(&self, session: &mut Session<S>, mail: &Mail) -> Result<(), SmtpError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let s = &self.settings;

        session.expect(Step::Greeting).await?;
        session
            .command(Step::Ehlo, &format!("EHLO {}", s.helo_domain))
            .await?;
        session.command(Step::AuthLogin, "AUTH LOGIN").await?;
        session
            .secret(Step::Username, &encode_credential(&s.username))
            .await?;
        session
            .secret(Step::Password, &encode_credential(&s.password))
            .await?;
        session
            .command(Step::MailFrom, &format!("MAIL FROM: <{}>", single_line(&s.sender)))
            .await?;
        session
            .command(Step::RcptTo, &format!("RCPT TO: <{}>", single_line(&mail.to)))
            .await?;
        session.command(Step::Data, "DATA").await?;

        session.write(Step::Body, &format_message(&s.sender, mail)).await?;
        session.expect(Step::Body).await?;

        if let Err(e) = session.command(Step::Quit, "QUIT").await {
            debug!(error = %e, "relay did not acknowledge QUIT");
        }
        Ok(())
    }
}

/// One connection's worth of protocol state.
struct Session<S> {
    stream: S,
    buf: Vec<u8>,
    io_timeout: Duration,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(stream: S, io_timeout: Duration) -> Self {
        Session {
            stream,
            buf: Vec::with_capacity(READ_CHUNK),
            io_timeout,
        }
    }

    async fn command(&mut self, step: Step, line: &str) -> Result<String, SmtpError> {
        debug!(%step, ">> {}", line);
        self.write(step, &format!("{line}{CRLF}")).await?;
        self.expect(step).await
    }

    /// Like `command`, but never logs the line.
    async fn secret(&mut self, step: Step, line: &str) -> Result<String, SmtpError> {
        debug!(%step, ">> <credential>");
        self.write(step, &format!("{line}{CRLF}")).await?;
        self.expect(step).await
    }

    async fn write(&mut self, step: Step, data: &str) -> Result<(), SmtpError> {
        let io_timeout = self.io_timeout;
        let stream = &mut self.stream;
        let io = async {
            stream.write_all(data.as_bytes()).await?;
            stream.flush().await
        };
        match timeout(io_timeout, io).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(SmtpError::Io { step, source }),
            Err(_) => Err(SmtpError::Timeout { step }),
        }
    }

    async fn expect(&mut self, step: Step) -> Result<String, SmtpError> {
        let reply = self.read_reply(step).await?;
        debug!(%step, "<< {}", reply.trim_end());

        let expected = step.expected_code();
        if reply.starts_with(expected) {
            Ok(reply)
        } else {
            Err(SmtpError::Rejected {
                step,
                expected,
                reply: reply.trim_end().to_string(),
            })
        }
    }

    /// Accumulate bytes until a complete reply is buffered.
    ///
    /// Multi-line replies (`250-...` continuation lines) are collected up
    /// to their final `250 ...` line so that nothing is left over to be
    /// mistaken for the reply of the next command.
    async fn read_reply(&mut self, step: Step) -> Result<String, SmtpError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(end) = complete_reply_len(&self.buf) {
                let raw: Vec<u8> = self.buf.drain(..end).collect();
                return Ok(String::from_utf8_lossy(&raw).into_owned());
            }
            if self.buf.len() > MAX_REPLY_LEN {
                return Err(SmtpError::ReplyTooLong { step });
            }

            let n = match timeout(self.io_timeout, self.stream.read(&mut chunk)).await {
                Ok(Ok(n)) => n,
                Ok(Err(source)) => return Err(SmtpError::Io { step, source }),
                Err(_) => return Err(SmtpError::Timeout { step }),
            };

            if n == 0 {
                if self.buf.is_empty() {
                    return Err(SmtpError::Closed { step });
                }
                // Unterminated trailing data: let the code check judge it.
                let raw = std::mem::take(&mut self.buf);
                return Ok(String::from_utf8_lossy(&raw).into_owned());
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn close(mut self) {
        let _ = timeout(self.io_timeout, self.stream.shutdown()).await;
    }
}

/// Length of the first complete reply in `buf`, if any.
///
/// A reply ends with the first line whose fourth byte is not `-`.
fn complete_reply_len(buf: &[u8]) -> Option<usize> {
    let mut start = 0;
    while let Some(pos) = buf[start..].iter().position(|&b| b == b'\n') {
        let end = start + pos + 1;
        let line = &buf[start..end];
        if line.len() < 4 || line[3] != b'-' {
            return Some(end);
        }
        start = end;
    }
    None
}
