//! Configuration for the alert service.
//!
//! Values come from three layers, later ones winning:
//! 1. built-in defaults,
//! 2. an optional TOML file (`--config alert.toml`),
//! 3. environment variables:
//!
//! - `ALERT_FEED_ADDR`        (default: "127.0.0.1:30011")
//! - `ALERT_FEED_BROKER`, `ALERT_FEED_USER`, `ALERT_FEED_PASSWORD`
//! - `ALERT_LOGIN_TIMEOUT_SECS` (default: "10")
//! - `ALERT_STORE_PATH`       (default: "alerts.json")
//! - `ALERT_RELOAD_SECS`      (default: "3")
//! - `ALERT_HEARTBEAT_SECS`   (default: "30")
//! - `ALERT_NOTIFIER`         ("console" | "email", default: "console")
//! - `ALERT_SMTP_HOST`, `ALERT_SMTP_PORT` (default: "25"),
//!   `ALERT_SMTP_USER`, `ALERT_SMTP_PASSWORD`, `ALERT_SMTP_SENDER`
//! - `ALERT_INSTRUMENTS`      (comma separated fallback subscription list)

use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use alert_protocol::SmtpSettings;
use serde::Deserialize;
use thiserror::Error;

use crate::feed_client::FeedSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Env {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Invalid(String),
}

/// Notification channel selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    Console,
    Email,
}

impl FromStr for NotifierKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(NotifierKind::Console),
            "email" => Ok(NotifierKind::Email),
            other => Err(format!("unknown notifier {other:?}")),
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feed: FeedConfig,
    pub store: StoreConfig,
    pub notifier: NotifierConfig,
    pub smtp: SmtpConfig,

    /// Interval of the last-price heartbeat log.
    pub heartbeat_secs: u64,

    /// Subscription list used when the store has no pending alerts.
    pub default_instruments: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub addr: String,
    pub broker_id: String,
    pub user_id: String,
    pub password: String,

    /// Ceiling of the TCP connect and of the login confirmation wait.
    pub login_timeout_secs: u64,

    /// Backoff between subscription attempts.
    pub subscribe_retry_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub reload_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,

    /// Defaults to `username` when empty.
    pub sender: String,
    pub helo_domain: String,

    /// Bound on the connect and on each relay read or write. A whole
    /// delivery is capped at a small multiple of this.
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            feed: FeedConfig::default(),
            store: StoreConfig::default(),
            notifier: NotifierConfig::default(),
            smtp: SmtpConfig::default(),
            heartbeat_secs: 30,
            default_instruments: ["IF2512", "IH2512", "IC2512", "IM2512", "TS2603", "TF2603", "T2603"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            addr: "127.0.0.1:30011".to_string(),
            broker_id: String::new(),
            user_id: String::new(),
            password: String::new(),
            login_timeout_secs: 10,
            subscribe_retry_ms: 1000,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: PathBuf::from("alerts.json"),
            reload_interval_secs: 3,
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        SmtpConfig {
            host: String::new(),
            port: 25,
            username: String::new(),
            password: String::new(),
            sender: String::new(),
            helo_domain: "localhost".to_string(),
            timeout_secs: 10,
        }
    }
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("sender", &self.sender)
            .finish()
    }
}

impl Config {
    /// Defaults, then `path` (if given), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Config::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `ALERT_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_with(&lookup, "ALERT_FEED_ADDR", &mut self.feed.addr)?;
        override_with(&lookup, "ALERT_FEED_BROKER", &mut self.feed.broker_id)?;
        override_with(&lookup, "ALERT_FEED_USER", &mut self.feed.user_id)?;
        override_with(&lookup, "ALERT_FEED_PASSWORD", &mut self.feed.password)?;
        override_with(&lookup, "ALERT_LOGIN_TIMEOUT_SECS", &mut self.feed.login_timeout_secs)?;
        override_with(&lookup, "ALERT_STORE_PATH", &mut self.store.path)?;
        override_with(&lookup, "ALERT_RELOAD_SECS", &mut self.store.reload_interval_secs)?;
        override_with(&lookup, "ALERT_HEARTBEAT_SECS", &mut self.heartbeat_secs)?;
        override_with(&lookup, "ALERT_NOTIFIER", &mut self.notifier.kind)?;
        override_with(&lookup, "ALERT_SMTP_HOST", &mut self.smtp.host)?;
        override_with(&lookup, "ALERT_SMTP_PORT", &mut self.smtp.port)?;
        override_with(&lookup, "ALERT_SMTP_USER", &mut self.smtp.username)?;
        override_with(&lookup, "ALERT_SMTP_PASSWORD", &mut self.smtp.password)?;
        override_with(&lookup, "ALERT_SMTP_SENDER", &mut self.smtp.sender)?;

        if let Some(list) = lookup("ALERT_INSTRUMENTS") {
            self.default_instruments = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.reload_interval_secs == 0 {
            return Err(ConfigError::Invalid("store.reload_interval_secs must be > 0".into()));
        }
        if self.heartbeat_secs == 0 {
            return Err(ConfigError::Invalid("heartbeat_secs must be > 0".into()));
        }
        if self.notifier.kind == NotifierKind::Email && self.smtp.host.trim().is_empty() {
            return Err(ConfigError::Invalid("email notifier requires smtp.host".into()));
        }
        Ok(())
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.store.reload_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

impl FeedConfig {
    pub fn settings(&self) -> FeedSettings {
        FeedSettings {
            addr: self.addr.clone(),
            broker_id: self.broker_id.clone(),
            user_id: self.user_id.clone(),
            password: self.password.clone(),
            connect_timeout: self.login_timeout().max(Duration::from_secs(1)),
        }
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn subscribe_retry(&self) -> Duration {
        Duration::from_millis(self.subscribe_retry_ms)
    }
}

impl SmtpConfig {
    pub fn settings(&self) -> SmtpSettings {
        let mut settings = SmtpSettings::new(
            self.host.clone(),
            self.port,
            self.username.clone(),
            self.password.clone(),
        );
        if !self.sender.trim().is_empty() {
            settings.sender = self.sender.clone();
        }
        settings.helo_domain = self.helo_domain.clone();
        settings.io_timeout = Duration::from_secs(self.timeout_secs.max(1));
        settings
    }
}

fn override_with<F, T>(lookup: &F, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    if let Some(value) = lookup(key) {
        *slot = value.parse::<T>().map_err(|e| ConfigError::Env {
            key,
            value: value.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}
