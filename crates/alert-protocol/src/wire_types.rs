//! Low-level wire constants shared by the text protocols.
//!
//! - Mail submission: line terminator, expected reply codes per step,
//!   receive chunk size.
//! - Market feed: command / event verbs.

/// Line terminator of the mail submission protocol.
pub const CRLF: &str = "\r\n";

/// Size of one receive call when reading a mail relay reply.
pub const READ_CHUNK: usize = 1024;

/// Upper bound for one buffered reply; a relay that streams more than this
/// without finishing its reply is treated as broken.
pub const MAX_REPLY_LEN: usize = 64 * 1024;

/// Reply code prefixes expected at each step of a submission.
pub mod reply {
    pub const SERVICE_READY: &str = "220";
    pub const OK: &str = "250";
    pub const AUTH_CONTINUE: &str = "334";
    pub const AUTH_SUCCESS: &str = "235";
    pub const START_MAIL_INPUT: &str = "354";
    pub const CLOSING: &str = "221";
}

/// Verbs of the market feed line protocol.
pub mod feed {
    pub const CONNECTED: &str = "CONNECTED";
    pub const LOGIN: &str = "LOGIN";
    pub const SUB: &str = "SUB";
    pub const UNSUB: &str = "UNSUB";
    pub const TICK: &str = "TICK";
    pub const OK: &str = "OK";
    pub const ERR: &str = "ERR";
}

/// Maximum instrument symbol length accepted from the feed.
pub const MAX_SYMBOL_LEN: usize = 32;

/// A tiny helper for validating symbols coming off the wire.
pub fn validate_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
}
