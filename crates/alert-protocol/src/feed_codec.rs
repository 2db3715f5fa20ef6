// crates/alert-protocol/src/feed_codec.rs

//! Line codec for the market data feed.
//!
//! Every message is one UTF-8 line terminated by `\n` (a trailing `\r` is
//! tolerated). Tokens are separated by whitespace.
//!
//! Client → feed (`FeedRequest`):
//!
//! - `LOGIN <broker> <user> <password>`
//! - `SUB <symbol> [<symbol>...]`
//! - `UNSUB <symbol> [<symbol>...]`
//!
//! Feed → client (`FeedEvent`):
//!
//! - `CONNECTED`
//! - `LOGIN OK [detail...]`
//! - `LOGIN ERR <code> [message...]`
//! - `SUB OK <symbol>`
//! - `SUB ERR <code> [message...]`
//! - `TICK <symbol> <price>`
//!
//! Blank lines and lines starting with `#` carry no message.

use alert_core::Tick;
use thiserror::Error;

use crate::wire_types::{feed, validate_symbol};

/// Requests sent by the alert service to the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedRequest {
    Login {
        broker: String,
        user: String,
        password: String,
    },
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Session events and market data pushed by the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Connected,
    LoginOk { detail: String },
    LoginRejected { code: i32, message: String },
    Subscribed { instrument: String },
    SubscribeRejected { code: i32, message: String },
    Tick(Tick),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedParseError {
    #[error("unknown verb {0:?}")]
    UnknownVerb(String),

    #[error("malformed {verb} line: {line:?}")]
    Malformed { verb: &'static str, line: String },

    #[error("invalid symbol {0:?}")]
    InvalidSymbol(String),

    #[error("invalid price {0:?}")]
    InvalidPrice(String),
}

/// Parse one line received from the feed.
///
/// Returns `Ok(None)` for blank lines and comments.
pub fn parse_event_line(line: &str) -> Result<Option<FeedEvent>, FeedParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    let malformed = |verb: &'static str| FeedParseError::Malformed {
        verb,
        line: trimmed.to_string(),
    };

    let event = match tokens[0] {
        feed::CONNECTED if tokens.len() == 1 => FeedEvent::Connected,
        feed::CONNECTED => return Err(malformed(feed::CONNECTED)),

        feed::LOGIN => match tokens.get(1).copied() {
            Some(feed::OK) => FeedEvent::LoginOk {
                detail: tokens[2..].join(" "),
            },
            Some(feed::ERR) => {
                let (code, message) = parse_error_tail(&tokens[2..]).ok_or_else(|| malformed(feed::LOGIN))?;
                FeedEvent::LoginRejected { code, message }
            }
            _ => return Err(malformed(feed::LOGIN)),
        },

        feed::SUB => match tokens.get(1).copied() {
            Some(feed::OK) if tokens.len() == 3 => FeedEvent::Subscribed {
                instrument: symbol(tokens[2])?,
            },
            Some(feed::ERR) => {
                let (code, message) = parse_error_tail(&tokens[2..]).ok_or_else(|| malformed(feed::SUB))?;
                FeedEvent::SubscribeRejected { code, message }
            }
            _ => return Err(malformed(feed::SUB)),
        },

        feed::TICK => {
            if tokens.len() != 3 {
                return Err(malformed(feed::TICK));
            }
            let instrument = symbol(tokens[1])?;
            let price = tokens[2]
                .parse::<f64>()
                .ok()
                .filter(|p| p.is_finite())
                .ok_or_else(|| FeedParseError::InvalidPrice(tokens[2].to_string()))?;
            FeedEvent::Tick(Tick { instrument, price })
        }

        other => return Err(FeedParseError::UnknownVerb(other.to_string())),
    };

    Ok(Some(event))
}

/// Format a request as a wire line (without the trailing newline).
pub fn format_request(req: &FeedRequest) -> String {
    match req {
        FeedRequest::Login {
            broker,
            user,
            password,
        } => format!("{} {} {} {}", feed::LOGIN, broker, user, password),
        FeedRequest::Subscribe(symbols) => format!("{} {}", feed::SUB, symbols.join(" ")),
        FeedRequest::Unsubscribe(symbols) => format!("{} {}", feed::UNSUB, symbols.join(" ")),
    }
}

/// Parse a request line (feed side; used by simulators and tests).
pub fn parse_request_line(line: &str) -> Option<FeedRequest> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        [feed::LOGIN, broker, user, password] => Some(FeedRequest::Login {
            broker: broker.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        }),
        [feed::SUB, symbols @ ..] if !symbols.is_empty() => {
            Some(FeedRequest::Subscribe(owned(symbols)))
        }
        [feed::UNSUB, symbols @ ..] if !symbols.is_empty() => {
            Some(FeedRequest::Unsubscribe(owned(symbols)))
        }
        _ => None,
    }
}

/// Format an event as a wire line (feed side; used by simulators and tests).
pub fn format_event(event: &FeedEvent) -> String {
    match event {
        FeedEvent::Connected => feed::CONNECTED.to_string(),
        FeedEvent::LoginOk { detail } if detail.is_empty() => format!("{} {}", feed::LOGIN, feed::OK),
        FeedEvent::LoginOk { detail } => format!("{} {} {}", feed::LOGIN, feed::OK, detail),
        FeedEvent::LoginRejected { code, message } => {
            format!("{} {} {} {}", feed::LOGIN, feed::ERR, code, message).trim_end().to_string()
        }
        FeedEvent::Subscribed { instrument } => format!("{} {} {}", feed::SUB, feed::OK, instrument),
        FeedEvent::SubscribeRejected { code, message } => {
            format!("{} {} {} {}", feed::SUB, feed::ERR, code, message).trim_end().to_string()
        }
        FeedEvent::Tick(t) => format!("{} {} {}", feed::TICK, t.instrument, t.price),
    }
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

fn parse_error_tail(tokens: &[&str]) -> Option<(i32, String)> {
    let (code, rest) = tokens.split_first()?;
    Some((code.parse().ok()?, rest.join(" ")))
}

fn symbol(token: &str) -> Result<String, FeedParseError> {
    if validate_symbol(token) {
        Ok(token.to_string())
    } else {
        Err(FeedParseError::InvalidSymbol(token.to_string()))
    }
}

fn owned(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|s| s.to_string()).collect()
}
