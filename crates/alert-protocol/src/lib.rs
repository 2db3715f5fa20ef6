//! alert-protocol
//!
//! Text wire protocols used by the alert service.
//!
//! - [`smtp`]       : outbound mail submission client (one message per connection)
//! - [`feed_codec`] : line codec of the market data feed
//! - [`wire_types`] : shared constants

pub mod wire_types;
pub mod smtp;
pub mod feed_codec;

pub use smtp::{
    Mail,
    SmtpClient,
    SmtpError,
    SmtpSettings,
    Step,
    decode_credential,
    encode_credential,
};

pub use feed_codec::{
    FeedEvent,
    FeedParseError,
    FeedRequest,
    format_event,
    format_request,
    parse_event_line,
    parse_request_line,
};
