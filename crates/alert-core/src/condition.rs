//! User-authored alert conditions.
//!
//! An [`AlertCondition`] watches one instrument for one account and may
//! carry up to three independent predicates:
//! - a price ceiling (fires when `price >= ceiling`),
//! - a price floor (fires when `price <= floor`),
//! - a scheduled wall-clock time (fires once local time reaches it).
//!
//! Bounds are only *active* when set to a finite, strictly positive value;
//! `None`, zero or negative values mean "no bound". This mirrors how the
//! records are authored in the durable store, where `0` is the "unset"
//! marker.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::ConditionError;

/// Format of `scheduled_at` timestamps (local time, no zone).
pub const SCHEDULE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Persisted key of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub i64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state as stored in the durable store.
///
/// Conditions held in the in-memory index are always `Pending`;
/// `Triggered` is only ever written back to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionState {
    #[default]
    Pending,
    Triggered,
}

/// One alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    #[serde(alias = "order_id")]
    pub id: AlertId,

    /// Owning account (used to resolve the notification address).
    pub account: String,

    /// Instrument symbol this condition watches (e.g. `IF2512`).
    #[serde(alias = "symbol")]
    pub instrument: String,

    #[serde(default, alias = "max_price")]
    pub ceiling: Option<f64>,

    #[serde(default, alias = "min_price")]
    pub floor: Option<f64>,

    /// Local timestamp in [`SCHEDULE_FORMAT`]; unparseable values are
    /// treated as "not scheduled". Non-string scalars are kept as text.
    #[serde(default, alias = "trigger_time", deserialize_with = "lenient_schedule")]
    pub scheduled_at: Option<String>,

    #[serde(default)]
    pub state: ConditionState,
}

impl AlertCondition {
    /// Create a pending condition with no predicates set.
    pub fn new(id: i64, account: impl Into<String>, instrument: impl Into<String>) -> Self {
        AlertCondition {
            id: AlertId(id),
            account: account.into(),
            instrument: instrument.into(),
            ceiling: None,
            floor: None,
            scheduled_at: None,
            state: ConditionState::Pending,
        }
    }

    pub fn with_ceiling(mut self, ceiling: f64) -> Self {
        self.ceiling = Some(ceiling);
        self
    }

    pub fn with_floor(mut self, floor: f64) -> Self {
        self.floor = Some(floor);
        self
    }

    pub fn with_schedule(mut self, at: impl Into<String>) -> Self {
        self.scheduled_at = Some(at.into());
        self
    }

    /// The ceiling, if active.
    pub fn ceiling_bound(&self) -> Option<f64> {
        self.ceiling.filter(|v| is_active_bound(*v))
    }

    /// The floor, if active.
    pub fn floor_bound(&self) -> Option<f64> {
        self.floor.filter(|v| is_active_bound(*v))
    }

    /// Parsed scheduled time, or `None` when absent or malformed.
    pub fn scheduled_time(&self) -> Option<NaiveDateTime> {
        let raw = self.scheduled_at.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        NaiveDateTime::parse_from_str(raw, SCHEDULE_FORMAT).ok()
    }

    /// Reject records that can never be routed to an index bucket or
    /// an owner.
    pub fn validate(&self) -> Result<(), ConditionError> {
        if self.instrument.trim().is_empty() {
            return Err(ConditionError::MissingInstrument(self.id));
        }
        if self.account.trim().is_empty() {
            return Err(ConditionError::MissingAccount(self.id));
        }
        Ok(())
    }
}

fn is_active_bound(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSchedule {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
}

fn lenient_schedule<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<RawSchedule>::deserialize(deserializer)?;
    Ok(raw.map(|raw| match raw {
        RawSchedule::Text(s) => s,
        RawSchedule::Integer(i) => i.to_string(),
        RawSchedule::Float(f) => f.to_string(),
        RawSchedule::Flag(b) => b.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_bounds_are_inactive() {
        let c = AlertCondition::new(1, "acc", "IF2512").with_ceiling(0.0).with_floor(-3.0);
        assert_eq!(c.ceiling_bound(), None);
        assert_eq!(c.floor_bound(), None);

        let c = c.with_ceiling(f64::NAN);
        assert_eq!(c.ceiling_bound(), None);
    }

    #[test]
    fn malformed_schedule_is_ignored() {
        let c = AlertCondition::new(1, "acc", "IF2512").with_schedule("tomorrow at noon");
        assert!(c.scheduled_time().is_none());

        let c = AlertCondition::new(1, "acc", "IF2512").with_schedule("  ");
        assert!(c.scheduled_time().is_none());

        let c = AlertCondition::new(1, "acc", "IF2512").with_schedule("2000-01-01 00:00:00");
        assert!(c.scheduled_time().is_some());
    }

    #[test]
    fn accepts_store_column_names() {
        let raw = r#"{
            "order_id": 7,
            "account": "alice",
            "symbol": "IF2512",
            "max_price": 4500.0,
            "min_price": 0.0,
            "trigger_time": ""
        }"#;
        let c: AlertCondition = serde_json::from_str(raw).unwrap();
        assert_eq!(c.id, AlertId(7));
        assert_eq!(c.instrument, "IF2512");
        assert_eq!(c.ceiling_bound(), Some(4500.0));
        assert_eq!(c.floor_bound(), None);
        assert!(c.scheduled_time().is_none());
        assert_eq!(c.state, ConditionState::Pending);
    }

    #[test]
    fn numeric_schedule_keeps_record_usable() {
        let raw = r#"{ "id": 2, "account": "bob", "instrument": "IF2512",
                       "ceiling": 4500.0, "scheduled_at": 20990101 }"#;
        let c: AlertCondition = serde_json::from_str(raw).unwrap();
        assert_eq!(c.scheduled_at.as_deref(), Some("20990101"));
        assert!(c.scheduled_time().is_none());
        assert_eq!(c.ceiling_bound(), Some(4500.0));

        let c: AlertCondition =
            serde_json::from_str(r#"{ "id": 3, "account": "bob", "instrument": "IF2512", "scheduled_at": null }"#)
                .unwrap();
        assert_eq!(c.scheduled_at, None);
    }

    #[test]
    fn validate_rejects_blank_instrument() {
        let c = AlertCondition::new(3, "acc", " ");
        assert_eq!(c.validate(), Err(ConditionError::MissingInstrument(AlertId(3))));
    }
}
