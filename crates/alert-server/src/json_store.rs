//! JSON file backed alert store.
//!
//! The file holds one document:
//!
//! ```json
//! {
//!   "alerts": [
//!     { "id": 1, "account": "alice", "instrument": "IF2512",
//!       "ceiling": 4500.0, "floor": 0, "scheduled_at": null, "state": "pending" }
//!   ],
//!   "accounts": [ { "account": "alice", "email": "alice@example.com" } ]
//! }
//! ```
//!
//! The file is authored outside the service. It is re-read on every query,
//! so edits are picked up by the next reload cycle. Records are decoded one
//! by one: a record that does not decode is logged and skipped, the rest
//! still load. `mark_triggered` edits the raw document and only touches the
//! `state` key of the matching alert; every other key, including unknown
//! ones, is written back as it was read. Writes go through a temp file and
//! a rename so readers never see a half-written document.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use alert_core::{AlertCondition, AlertId, AlertRepository, ConditionState, EmailDirectory, StoreError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Keys an alert id may be stored under.
const ID_KEYS: [&str; 2] = ["id", "order_id"];

pub struct JsonFileRepository {
    path: PathBuf,
    // Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileRepository {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The raw top-level object of the file.
    pub async fn read_document(&self) -> Result<Map<String, Value>, StoreError> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::Unavailable(format!(
                    "{} does not exist",
                    self.path.display()
                )));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        match serde_json::from_slice(&raw) {
            Ok(Value::Object(doc)) => Ok(doc),
            Ok(_) => Err(self.malformed("top level is not an object")),
            Err(e) => Err(self.malformed(e)),
        }
    }

    pub async fn write_document(&self, doc: &Map<String, Value>) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(doc).map_err(|e| self.malformed(e))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, &raw).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn malformed(&self, reason: impl std::fmt::Display) -> StoreError {
        StoreError::Malformed(format!("{}: {}", self.path.display(), reason))
    }

    /// Entries of a top-level array; a missing key is an empty table.
    fn table<'a>(&self, doc: &'a Map<String, Value>, key: &str) -> Result<&'a [Value], StoreError> {
        match doc.get(key) {
            None | Some(Value::Null) => Ok(&[]),
            Some(Value::Array(entries)) => Ok(entries),
            Some(_) => Err(self.malformed(format!("\"{key}\" is not an array"))),
        }
    }
}

fn record_id(record: &Value) -> Option<i64> {
    ID_KEYS
        .iter()
        .find_map(|key| record.get(*key).and_then(Value::as_i64))
}

#[async_trait]
impl AlertRepository for JsonFileRepository {
    async fn query_pending(&self) -> Result<Vec<AlertCondition>, StoreError> {
        let doc = self.read_document().await?;
        let alerts = self.table(&doc, "alerts")?;

        let mut pending = Vec::with_capacity(alerts.len());
        let mut skipped = 0usize;
        for (pos, record) in alerts.iter().enumerate() {
            match AlertCondition::deserialize(record) {
                Ok(alert) if alert.state == ConditionState::Pending => pending.push(alert),
                Ok(_) => {}
                Err(e) => {
                    skipped += 1;
                    warn!(
                        path = %self.path.display(),
                        position = pos,
                        id = ?record_id(record),
                        error = %e,
                        "skipping undecodable alert record"
                    );
                }
            }
        }
        debug!(
            path = %self.path.display(),
            pending = pending.len(),
            skipped,
            "queried alert file"
        );
        Ok(pending)
    }

    async fn mark_triggered(&self, id: AlertId) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut doc = self.read_document().await?;
        let record = match doc.get_mut("alerts") {
            Some(Value::Array(alerts)) => alerts
                .iter_mut()
                .find(|record| record_id(record) == Some(id.0)),
            _ => None,
        };
        let Some(Value::Object(record)) = record else {
            return Err(StoreError::UnknownAlert(id));
        };
        record.insert("state".to_string(), Value::from("triggered"));

        self.write_document(&doc).await
    }
}

#[async_trait]
impl EmailDirectory for JsonFileRepository {
    async fn lookup_email(&self, account: &str) -> Result<Option<String>, StoreError> {
        let doc = self.read_document().await?;
        let accounts = self.table(&doc, "accounts")?;
        Ok(accounts
            .iter()
            .find(|r| r.get("account").and_then(Value::as_str) == Some(account))
            .and_then(|r| r.get("email"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}
