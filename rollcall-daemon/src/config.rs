//! Daemon configuration from `ROLLCALL_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use rollcall_auth::pin::DEFAULT_ISSUE_TIMEOUT;
use rollcall_auth::EmailHosts;

use crate::dispatch::DEFAULT_RESPONSE_DEADLINE;
use crate::services::{
    SchedulerSettings, DEFAULT_FOLLOW_UP_BUDGET, DEFAULT_FOLLOW_UP_INTERVAL,
    DEFAULT_PIN_ATTEMPTS_PER_MINUTE, DEFAULT_SEND_TIMEOUT,
};
use crate::store::composite::DEFAULT_SUBMISSION_TTL;
use crate::store::EphemeralSettings;

/// Default drain period for outstanding confirmation emails.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const DATABASE_FILE: &str = "rollcall.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid duration {value:?} in {var}: expected a number with ms, s, m or h suffix")]
    InvalidDuration { var: &'static str, value: String },

    #[error("invalid value {value:?} in {var}: expected {expected}")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Durable storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Memory,
}

/// How submissions are verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailMode {
    /// No confirmation email; members register on form submission.
    Off,
    /// PIN flow with a mailer that only logs the PIN.
    Log,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub store: StoreKind,
    pub email_hosts: EmailHosts,
    pub mail: MailMode,
    pub submission_ttl: Duration,
    pub janitor_interval: Duration,
    pub pin_timeout: Duration,
    pub send_timeout: Duration,
    pub response_deadline: Duration,
    pub follow_up_interval: Duration,
    pub follow_up_budget: Duration,
    pub shutdown_grace: Duration,
    pub pin_attempts_per_minute: u32,
}

impl DaemonConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using `lookup` to read variables. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let duration = |var: &'static str, default: Duration| match get(var) {
            Some(value) => parse_duration(&value).ok_or(ConfigError::InvalidDuration { var, value }),
            None => Ok(default),
        };

        let data_dir = get("ROLLCALL_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("rollcall")
        });

        let store = match get("ROLLCALL_STORE").map(|v| v.trim().to_ascii_lowercase()) {
            None => StoreKind::Sqlite,
            Some(v) if v == "sqlite" => StoreKind::Sqlite,
            Some(v) if v == "memory" => StoreKind::Memory,
            Some(value) => {
                return Err(ConfigError::InvalidValue {
                    var: "ROLLCALL_STORE",
                    value,
                    expected: "sqlite or memory",
                })
            }
        };

        let mail = match get("ROLLCALL_MAIL").map(|v| v.trim().to_ascii_lowercase()) {
            None => MailMode::Off,
            Some(v) if v == "off" => MailMode::Off,
            Some(v) if v == "log" => MailMode::Log,
            Some(value) => {
                return Err(ConfigError::InvalidValue {
                    var: "ROLLCALL_MAIL",
                    value,
                    expected: "off or log",
                })
            }
        };

        let email_hosts = get("ROLLCALL_EMAIL_HOSTS")
            .map(|list| EmailHosts::parse_list(&list))
            .unwrap_or_default();

        // A zero TTL would keep submissions and PINs forever
        let submission_ttl = duration("ROLLCALL_SUBMISSION_TTL", DEFAULT_SUBMISSION_TTL)?;
        if submission_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                var: "ROLLCALL_SUBMISSION_TTL",
                value: get("ROLLCALL_SUBMISSION_TTL").unwrap_or_default(),
                expected: "a non-zero duration",
            });
        }

        let pin_attempts_per_minute = match get("ROLLCALL_PIN_ATTEMPTS_PER_MINUTE") {
            Some(value) => match value.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "ROLLCALL_PIN_ATTEMPTS_PER_MINUTE",
                        value,
                        expected: "a positive integer",
                    })
                }
            },
            None => DEFAULT_PIN_ATTEMPTS_PER_MINUTE,
        };

        Ok(Self {
            data_dir,
            store,
            email_hosts,
            mail,
            submission_ttl,
            janitor_interval: duration("ROLLCALL_JANITOR_INTERVAL", submission_ttl)?,
            pin_timeout: duration("ROLLCALL_PIN_TIMEOUT", DEFAULT_ISSUE_TIMEOUT)?,
            send_timeout: duration("ROLLCALL_SEND_TIMEOUT", DEFAULT_SEND_TIMEOUT)?,
            response_deadline: duration("ROLLCALL_RESPONSE_DEADLINE", DEFAULT_RESPONSE_DEADLINE)?,
            follow_up_interval: duration("ROLLCALL_FOLLOWUP_INTERVAL", DEFAULT_FOLLOW_UP_INTERVAL)?,
            follow_up_budget: duration("ROLLCALL_FOLLOWUP_BUDGET", DEFAULT_FOLLOW_UP_BUDGET)?,
            shutdown_grace: duration("ROLLCALL_SHUTDOWN_GRACE", DEFAULT_SHUTDOWN_GRACE)?,
            pin_attempts_per_minute,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn ephemeral_settings(&self) -> EphemeralSettings {
        EphemeralSettings {
            submission_ttl: self.submission_ttl,
            pin_issue_timeout: self.pin_timeout,
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            send_timeout: self.send_timeout,
            follow_up_interval: self.follow_up_interval,
            follow_up_budget: self.follow_up_budget,
        }
    }
}

/// Parse durations like `250ms`, `30s`, `5m` or `1h`. A bare number is
/// seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();

    let (num_str, unit_ms) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (s, 1_000)
    };

    let num: u64 = num_str.trim().parse().ok()?;
    Some(Duration::from_millis(num.saturating_mul(unit_ms)))
}
