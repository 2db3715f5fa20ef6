//! Trigger predicates for a single condition.

use std::fmt;

use chrono::NaiveDateTime;

use crate::condition::AlertCondition;

/// Why a condition fired.
///
/// The `Display` impl is the human-readable reason handed to notifiers.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// `price >= ceiling`.
    Ceiling(f64),

    /// `price <= floor`.
    Floor(f64),

    /// Local wall-clock time reached the scheduled time (raw text as stored).
    Scheduled(String),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Ceiling(v) => write!(f, "price >= ceiling {}", v),
            Trigger::Floor(v) => write!(f, "price <= floor {}", v),
            Trigger::Scheduled(at) => write!(f, "scheduled time reached {}", at),
        }
    }
}

/// Evaluate the predicates of `condition` against one tick.
///
/// Order is fixed: ceiling, floor, schedule. The first predicate that
/// holds wins, so a condition produces at most one trigger per tick.
pub fn evaluate(condition: &AlertCondition, price: f64, now: NaiveDateTime) -> Option<Trigger> {
    if let Some(ceiling) = condition.ceiling_bound() {
        if price >= ceiling {
            return Some(Trigger::Ceiling(ceiling));
        }
    }

    if let Some(floor) = condition.floor_bound() {
        if price <= floor {
            return Some(Trigger::Floor(floor));
        }
    }

    match (condition.scheduled_time(), condition.scheduled_at.as_deref()) {
        (Some(at), Some(raw)) if now >= at => Some(Trigger::Scheduled(raw.trim().to_string())),
        _ => None,
    }
}
