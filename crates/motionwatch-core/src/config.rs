//! Runtime configuration.
//!
//! Settings come from a JSON file named by `MOTIONWATCH_CONFIG` or, when that
//! is unset, from environment variables with the same keys. Both feed a
//! [`RawConfig`] in which every key is optional; [`Config::from_raw`] then
//! validates it and reports every problem at once.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use motionwatch_smtp::Security;
use serde::Deserialize;

use crate::model::{AckMode, ItemFilter};
use crate::retry::{Backoff, RetryPolicy};
use crate::{Error, Result};

/// Environment variable naming a JSON configuration file.
pub const CONFIG_FILE_VAR: &str = "MOTIONWATCH_CONFIG";

/// Trigger phrase cameras put in their notification mails.
pub const DEFAULT_KEYWORD: &str = "Motion DetectStart";

/// Every recognised key.
pub const KEYS: &[&str] = &[
    "IMAP_HOST",
    "IMAP_PORT",
    "IMAP_USERNAME",
    "IMAP_PASSWORD",
    "IMAP_MAILBOX",
    "WATCH_DIR",
    "SMTP_HOST",
    "SMTP_PORT",
    "SMTP_SECURITY",
    "SMTP_USERNAME",
    "SMTP_PASSWORD",
    "SENDER_EMAIL",
    "DEST_EMAIL",
    "POLL_INTERVAL_SECS",
    "LOOKBACK_HOURS",
    "MAX_DEFERRALS",
    "DETECTION_THRESHOLD",
    "TARGET_LABELS",
    "DELETE_AFTER_PROCESSING",
    "INFERENCE_URL",
    "KEYWORD",
    "UNSEEN_ONLY",
    "LABELS_PATH",
    "LEDGER_PATH",
    "LISTEN_ADDR",
    "CALL_TIMEOUT_SECS",
    "RETRY_ATTEMPTS",
    "RETRY_BACKOFF_SECS",
    "ALERT_TIMEZONE",
];

/// A configuration value as written in JSON or the environment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// `true` / `false`.
    Bool(bool),
    /// Any JSON number.
    Number(serde_json::Number),
    /// Text.
    Text(String),
    /// A list, only meaningful for `TARGET_LABELS`.
    List(Vec<String>),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => f.write_str(&items.join(",")),
        }
    }
}

/// Unvalidated settings; every key optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct RawConfig {
    values: BTreeMap<String, Scalar>,
}

impl RawConfig {
    /// Parses a JSON object of settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document is not an object of scalars
    /// or names an unknown key.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: Self = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("invalid configuration file: {e}")))?;
        let unknown: Vec<&str> = raw
            .values
            .keys()
            .map(String::as_str)
            .filter(|k| !KEYS.contains(k))
            .collect();
        if unknown.is_empty() {
            Ok(raw)
        } else {
            Err(Error::Config(format!(
                "unknown configuration keys: {}",
                unknown.join(", ")
            )))
        }
    }

    /// Collects the recognised keys from a lookup function.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let values = KEYS
            .iter()
            .filter_map(|key| lookup(key).map(|v| ((*key).to_string(), Scalar::Text(v))))
            .collect();
        Self { values }
    }

    /// Collects the recognised keys from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Sets one key.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values
            .insert(key.to_string(), Scalar::Text(value.into()));
    }

    fn get(&self, key: &str) -> Option<&Scalar> {
        self.values.get(key)
    }
}

/// A credential that never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// IMAP mailbox settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapSettings {
    /// Server hostname.
    pub host: String,
    /// Server port (implicit TLS).
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: Secret,
    /// Mailbox to poll.
    pub mailbox: String,
}

/// Where items come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSettings {
    /// Poll an IMAP mailbox.
    Imap(ImapSettings),
    /// Poll a local directory of image files.
    Folder(PathBuf),
}

/// Alert delivery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Transport protection.
    pub security: Security,
    /// AUTH PLAIN user.
    pub username: String,
    /// AUTH PLAIN password.
    pub password: Secret,
    /// Envelope and header sender.
    pub sender: String,
    /// Alert recipient.
    pub recipient: String,
}

/// Object detection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    /// Base URL of the inference server.
    pub inference_url: String,
    /// Minimum confidence, in `(0, 1]`.
    pub threshold: f32,
    /// Labels that raise an alert.
    pub target_labels: Vec<String>,
    /// Class-name file for servers that answer with class ids.
    pub labels_path: Option<PathBuf>,
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Item source.
    pub source: SourceSettings,
    /// Alert transport.
    pub smtp: SmtpSettings,
    /// Detector.
    pub detection: DetectionSettings,
    /// Time between cycles.
    pub poll_interval: Duration,
    /// Candidate selection.
    pub filter: ItemFilter,
    /// Failed cycles before an undecodable item is abandoned.
    pub max_deferrals: u32,
    /// What to do with resolved items at the source.
    pub ack_mode: AckMode,
    /// Ledger database file.
    pub ledger_path: String,
    /// Liveness endpoint bind address.
    pub listen_addr: SocketAddr,
    /// Retry budget and per-call deadline.
    pub retry: RetryPolicy,
    /// Time zone used in alert subjects.
    pub timezone: Tz,
}

impl Config {
    /// Loads configuration from `MOTIONWATCH_CONFIG` or the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or any setting is
    /// missing or invalid.
    pub fn load() -> Result<Self> {
        let raw = match std::env::var(CONFIG_FILE_VAR) {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| Error::Config(format!("cannot read {path}: {e}")))?;
                RawConfig::from_json(&text)?
            }
            Err(_) => RawConfig::from_env(),
        };
        Self::from_raw(&raw)
    }

    /// Validates raw settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming every missing key and every invalid
    /// value.
    pub fn from_raw(raw: &RawConfig) -> Result<Self> {
        let mut v = Validator::new(raw);

        let source = if raw.get("WATCH_DIR").is_some() {
            v.text("WATCH_DIR").map(|d| SourceSettings::Folder(PathBuf::from(d)))
        } else if ["IMAP_HOST", "IMAP_USERNAME", "IMAP_PASSWORD"]
            .iter()
            .any(|k| raw.get(k).is_some())
        {
            let host = v.text("IMAP_HOST");
            let username = v.text("IMAP_USERNAME");
            let password = v.text("IMAP_PASSWORD");
            let port = v.optional("IMAP_PORT", 993, parse_port);
            let mailbox = v
                .optional_text("IMAP_MAILBOX")
                .unwrap_or_else(|| "INBOX".to_string());
            match (host, username, password) {
                (Some(host), Some(username), Some(password)) => {
                    Some(SourceSettings::Imap(ImapSettings {
                        host,
                        port,
                        username,
                        password: Secret::new(password),
                        mailbox,
                    }))
                }
                _ => None,
            }
        } else {
            v.missing.push("IMAP_HOST, IMAP_USERNAME, IMAP_PASSWORD (or WATCH_DIR)");
            None
        };

        let smtp_host = v.text("SMTP_HOST");
        let smtp_username = v.text("SMTP_USERNAME");
        let smtp_password = v.text("SMTP_PASSWORD");
        let sender = v.text("SENDER_EMAIL");
        let recipient = v.text("DEST_EMAIL");
        let smtp_port = v.optional("SMTP_PORT", 465, parse_port);
        let default_security = if smtp_port == 587 {
            Security::StartTls
        } else {
            Security::Implicit
        };
        let security = v.optional("SMTP_SECURITY", default_security, |s| s.parse().ok());

        let poll_secs = v.required("POLL_INTERVAL_SECS", |s| {
            s.parse::<u64>().ok().filter(|n| *n > 0)
        });
        let lookback_hours = v.required("LOOKBACK_HOURS", |s| {
            s.parse::<u64>().ok().filter(|n| *n > 0)
        });
        let max_deferrals = v.required("MAX_DEFERRALS", |s| {
            s.parse::<u32>().ok().filter(|n| *n > 0)
        });
        let threshold = v.required("DETECTION_THRESHOLD", |s| {
            s.parse::<f32>().ok().filter(|t| *t > 0.0 && *t <= 1.0)
        });
        let target_labels = v.required("TARGET_LABELS", parse_labels);
        let delete = v.required("DELETE_AFTER_PROCESSING", parse_flag);
        let inference_url = v.text("INFERENCE_URL");

        let keyword = match raw.get("KEYWORD") {
            Some(value) => Some(value.to_string().trim().to_string()).filter(|k| !k.is_empty()),
            None => Some(DEFAULT_KEYWORD.to_string()),
        };
        let unseen_only = v.optional("UNSEEN_ONLY", false, parse_flag);
        let labels_path = v.optional_text("LABELS_PATH").map(PathBuf::from);
        let ledger_path = v
            .optional_text("LEDGER_PATH")
            .unwrap_or_else(|| "motionwatch.db".to_string());
        let listen_addr = v.optional(
            "LISTEN_ADDR",
            SocketAddr::from(([0, 0, 0, 0], 8080)),
            |s| s.parse().ok(),
        );
        let call_timeout = v.optional("CALL_TIMEOUT_SECS", 60, |s| {
            s.parse::<u64>().ok().filter(|n| *n > 0)
        });
        let attempts = v.optional("RETRY_ATTEMPTS", 3, |s| {
            s.parse::<u32>().ok().filter(|n| *n > 0)
        });
        let backoff = v.optional("RETRY_BACKOFF_SECS", 2, |s| s.parse::<u64>().ok());
        let timezone = v.optional("ALERT_TIMEZONE", Tz::UTC, |s| s.parse::<Tz>().ok());

        v.finish()?;

        // finish() fails whenever a required value is absent
        let (
            Some(source),
            Some(host),
            Some(username),
            Some(password),
            Some(sender),
            Some(recipient),
            Some(poll_secs),
            Some(lookback_hours),
            Some(max_deferrals),
            Some(threshold),
            Some(target_labels),
            Some(delete),
            Some(inference_url),
        ) = (
            source,
            smtp_host,
            smtp_username,
            smtp_password,
            sender,
            recipient,
            poll_secs,
            lookback_hours,
            max_deferrals,
            threshold,
            target_labels,
            delete,
            inference_url,
        )
        else {
            return Err(Error::Config("incomplete configuration".into()));
        };

        Ok(Self {
            source,
            smtp: SmtpSettings {
                host,
                port: smtp_port,
                security,
                username,
                password: Secret::new(password),
                sender,
                recipient,
            },
            detection: DetectionSettings {
                inference_url,
                threshold,
                target_labels,
                labels_path,
            },
            poll_interval: Duration::from_secs(poll_secs),
            filter: ItemFilter {
                lookback: Duration::from_secs(lookback_hours.saturating_mul(3600)),
                keyword,
                unseen_only,
            },
            max_deferrals,
            ack_mode: if delete { AckMode::Delete } else { AckMode::MarkSeen },
            ledger_path,
            listen_addr,
            retry: RetryPolicy {
                max_attempts: attempts,
                backoff: Backoff::Fixed(Duration::from_secs(backoff)),
                call_timeout: Duration::from_secs(call_timeout),
            },
            timezone,
        })
    }
}

/// Accumulates missing and invalid keys while reading settings.
struct Validator<'a> {
    raw: &'a RawConfig,
    missing: Vec<&'static str>,
    invalid: Vec<String>,
}

impl<'a> Validator<'a> {
    const fn new(raw: &'a RawConfig) -> Self {
        Self {
            raw,
            missing: Vec::new(),
            invalid: Vec::new(),
        }
    }

    fn value(&self, key: &str) -> Option<String> {
        self.raw
            .get(key)
            .map(|v| v.to_string().trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn required<T>(&mut self, key: &'static str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let Some(text) = self.value(key) else {
            self.missing.push(key);
            return None;
        };
        let parsed = parse(&text);
        if parsed.is_none() {
            self.invalid.push(format!("{key}={text}"));
        }
        parsed
    }

    fn text(&mut self, key: &'static str) -> Option<String> {
        self.required(key, |s| Some(s.to_string()))
    }

    fn optional<T>(&mut self, key: &'static str, default: T, parse: impl Fn(&str) -> Option<T>) -> T {
        let Some(text) = self.value(key) else {
            return default;
        };
        parse(&text).unwrap_or_else(|| {
            self.invalid.push(format!("{key}={text}"));
            default
        })
    }

    fn optional_text(&self, key: &str) -> Option<String> {
        self.value(key)
    }

    fn finish(self) -> Result<()> {
        let mut problems = Vec::new();
        if !self.missing.is_empty() {
            problems.push(format!("missing {}", self.missing.join(", ")));
        }
        if !self.invalid.is_empty() {
            problems.push(format!("invalid {}", self.invalid.join(", ")));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }
}

fn parse_port(s: &str) -> Option<u16> {
    s.parse::<u16>().ok().filter(|p| *p > 0)
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_labels(s: &str) -> Option<Vec<String>> {
    let labels: Vec<String> = s
        .split(',')
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    (!labels.is_empty()).then_some(labels)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn minimal() -> RawConfig {
        let mut raw = RawConfig::default();
        for (k, v) in [
            ("IMAP_HOST", "imap.example.com"),
            ("IMAP_USERNAME", "cam@example.com"),
            ("IMAP_PASSWORD", "hunter2"),
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_USERNAME", "alerts@example.com"),
            ("SMTP_PASSWORD", "hunter3"),
            ("SENDER_EMAIL", "alerts@example.com"),
            ("DEST_EMAIL", "me@example.com"),
            ("POLL_INTERVAL_SECS", "30"),
            ("LOOKBACK_HOURS", "24"),
            ("MAX_DEFERRALS", "3"),
            ("DETECTION_THRESHOLD", "0.5"),
            ("TARGET_LABELS", "person, cat"),
            ("DELETE_AFTER_PROCESSING", "true"),
            ("INFERENCE_URL", "http://localhost:9000"),
        ] {
            raw.set(k, v);
        }
        raw
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_raw(&minimal()).unwrap();
        let SourceSettings::Imap(imap) = &config.source else {
            panic!("expected IMAP source");
        };
        assert_eq!(imap.port, 993);
        assert_eq!(imap.mailbox, "INBOX");
        assert_eq!(config.smtp.port, 465);
        assert_eq!(config.smtp.security, Security::Implicit);
        assert_eq!(config.filter.keyword.as_deref(), Some(DEFAULT_KEYWORD));
        assert!(!config.filter.unseen_only);
        assert_eq!(config.filter.lookback, Duration::from_secs(24 * 3600));
        assert_eq!(config.detection.target_labels, vec!["person", "cat"]);
        assert_eq!(config.ack_mode, AckMode::Delete);
        assert_eq!(config.ledger_path, "motionwatch.db");
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.timezone, Tz::UTC);
    }

    #[test]
    fn test_missing_keys_all_reported() {
        let mut raw = RawConfig::default();
        raw.set("SMTP_HOST", "smtp.example.com");
        let err = Config::from_raw(&raw).unwrap_err().to_string();
        for key in ["WATCH_DIR", "SMTP_USERNAME", "DEST_EMAIL", "INFERENCE_URL", "MAX_DEFERRALS"] {
            assert!(err.contains(key), "{key} not in {err}");
        }
        assert!(!err.contains("SMTP_HOST,"));
    }

    #[test]
    fn test_threshold_bounds() {
        let mut raw = minimal();
        raw.set("DETECTION_THRESHOLD", "0");
        let err = Config::from_raw(&raw).unwrap_err().to_string();
        assert!(err.contains("DETECTION_THRESHOLD=0"));

        raw.set("DETECTION_THRESHOLD", "1.0");
        assert!(Config::from_raw(&raw).is_ok());
    }

    #[test]
    fn test_empty_labels_rejected() {
        let mut raw = minimal();
        raw.set("TARGET_LABELS", " , ");
        let err = Config::from_raw(&raw).unwrap_err().to_string();
        assert!(err.contains("TARGET_LABELS"));
    }

    #[test]
    fn test_folder_source_and_empty_keyword() {
        let mut raw = minimal();
        raw.set("WATCH_DIR", "/srv/snapshots");
        raw.set("KEYWORD", "");
        raw.set("DELETE_AFTER_PROCESSING", "no");
        let config = Config::from_raw(&raw).unwrap();
        assert_eq!(
            config.source,
            SourceSettings::Folder(PathBuf::from("/srv/snapshots"))
        );
        assert_eq!(config.filter.keyword, None);
        assert_eq!(config.ack_mode, AckMode::MarkSeen);
    }

    #[test]
    fn test_starttls_inferred_from_port() {
        let mut raw = minimal();
        raw.set("SMTP_PORT", "587");
        let config = Config::from_raw(&raw).unwrap();
        assert_eq!(config.smtp.security, Security::StartTls);
    }

    #[test]
    fn test_timezone_parsed() {
        let mut raw = minimal();
        raw.set("ALERT_TIMEZONE", "Asia/Tokyo");
        assert_eq!(Config::from_raw(&raw).unwrap().timezone, Tz::Asia__Tokyo);

        raw.set("ALERT_TIMEZONE", "Mars/Olympus");
        assert!(Config::from_raw(&raw).is_err());
    }

    #[test]
    fn test_json_file_with_typed_values() {
        let json = r#"{
            "WATCH_DIR": "/tmp/cam",
            "SMTP_HOST": "smtp.example.com",
            "SMTP_PORT": 2525,
            "SMTP_SECURITY": "none",
            "SMTP_USERNAME": "u",
            "SMTP_PASSWORD": "p",
            "SENDER_EMAIL": "a@example.com",
            "DEST_EMAIL": "b@example.com",
            "POLL_INTERVAL_SECS": 10,
            "LOOKBACK_HOURS": 2,
            "MAX_DEFERRALS": 5,
            "DETECTION_THRESHOLD": 0.35,
            "TARGET_LABELS": ["person", "dog"],
            "DELETE_AFTER_PROCESSING": false,
            "INFERENCE_URL": "http://infer:9000"
        }"#;
        let config = Config::from_raw(&RawConfig::from_json(json).unwrap()).unwrap();
        assert_eq!(config.smtp.port, 2525);
        assert_eq!(config.smtp.security, Security::None);
        assert_eq!(config.max_deferrals, 5);
        assert!((config.detection.threshold - 0.35).abs() < f32::EPSILON);
        assert_eq!(config.detection.target_labels, vec!["person", "dog"]);
    }

    #[test]
    fn test_json_unknown_key_rejected() {
        let err = RawConfig::from_json(r#"{"IMAP_HOTS": "x"}"#).unwrap_err();
        assert!(err.to_string().contains("IMAP_HOTS"));
    }

    #[test]
    fn test_secret_hidden_from_debug() {
        let config = Config::from_raw(&minimal()).unwrap();
        let dump = format!("{config:?}");
        assert!(!dump.contains("hunter2"));
        assert!(!dump.contains("hunter3"));
    }
}
