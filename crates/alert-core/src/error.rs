//! Error types for the alert core.
//!
//! Matching itself is infallible: an instrument without alerts is a normal
//! empty result and malformed schedules simply disable the schedule
//! predicate. Errors only arise at the seams towards external
//! collaborators (the durable store, the account directory) and when a
//! stored record is unusable.

use thiserror::Error;

use crate::condition::AlertId;

/// Failure talking to the durable alert store or the account directory.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or read.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with data we could not decode.
    #[error("malformed store data: {0}")]
    Malformed(String),

    /// `mark_triggered` referenced an id the store does not know.
    #[error("unknown alert id {0}")]
    UnknownAlert(AlertId),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A stored record that cannot be placed in the alert index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("alert {0} has no instrument")]
    MissingInstrument(AlertId),

    #[error("alert {0} has no account")]
    MissingAccount(AlertId),
}
