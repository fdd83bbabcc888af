//! Configuration types.

use crate::notifications::PumpConfig;
use anyhow::{Result, bail};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// A duration written as integer seconds or as `<n>{s,m,h,d}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(Duration);

impl Period {
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub const fn as_duration(self) -> Duration {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl From<Period> for Duration {
    fn from(p: Period) -> Self {
        p.0
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, unit) = s.split_at(split);
        let n: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration '{}'", s))?;
        let multiplier = match unit.trim() {
            "" | "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            "d" => 24 * 60 * 60,
            other => return Err(format!("unknown duration unit '{}' in '{}'", other, s)),
        };
        n.checked_mul(multiplier)
            .map(Period::from_secs)
            .ok_or_else(|| format!("duration '{}' is too large", s))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        match secs {
            0 => write!(f, "0s"),
            s if s % 86_400 == 0 => write!(f, "{}d", s / 86_400),
            s if s % 3_600 == 0 => write!(f, "{}h", s / 3_600),
            s if s % 60 == 0 => write!(f, "{}m", s / 60),
            s => write!(f, "{}s", s),
        }
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Secs(s) => Ok(Period::from_secs(s)),
            Raw::Text(t) => t.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Only `sqlite` is supported.
    pub driver: String,
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "sqlite".into(),
            path: PathBuf::from("task-wizard.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub read_timeout: Period,
    pub write_timeout: Period,
    /// Empty allows any origin.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 2021,
            read_timeout: Period::from_secs(10),
            write_timeout: Period::from_secs(10),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whole-request timeout applied to HTTP handlers.
    pub fn request_timeout(&self) -> Duration {
        self.read_timeout.as_duration() + self.write_timeout.as_duration()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerJobsConfig {
    pub due_frequency: Period,
    pub overdue_frequency: Period,
    /// Sweeper period; unset means twice `due_frequency`.
    pub notification_cleanup: Option<Period>,
    pub overdue_synthesis: bool,
}

impl Default for SchedulerJobsConfig {
    fn default() -> Self {
        Self {
            due_frequency: Period::from_secs(5 * 60),
            overdue_frequency: Period::from_secs(24 * 60 * 60),
            notification_cleanup: None,
            overdue_synthesis: true,
        }
    }
}

impl SchedulerJobsConfig {
    pub fn cleanup_period(&self) -> Duration {
        self.notification_cleanup
            .map(Period::as_duration)
            .unwrap_or(self.due_frequency.as_duration() * 2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Outbound delivery timeout.
    pub timeout: Period,
    /// How long before the due date the pre-due reminder fires.
    pub pre_due_offset: Period,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            timeout: Period::from_secs(10),
            pre_due_offset: Period::from_secs(3 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub scheduler_jobs: SchedulerJobsConfig,
    pub notifications: NotificationsConfig,
}

impl Config {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.database.driver.eq_ignore_ascii_case("sqlite") {
            bail!(
                "unsupported database driver '{}' (only sqlite is available)",
                self.database.driver
            );
        }
        if self.scheduler_jobs.due_frequency.is_zero() {
            bail!("scheduler_jobs.due_frequency must be greater than zero");
        }
        if self.scheduler_jobs.overdue_frequency.is_zero() {
            bail!("scheduler_jobs.overdue_frequency must be greater than zero");
        }
        if self.notifications.timeout.is_zero() {
            bail!("notifications.timeout must be greater than zero");
        }
        Ok(())
    }

    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            due_frequency: self.scheduler_jobs.due_frequency.as_duration(),
            overdue_frequency: self.scheduler_jobs.overdue_frequency.as_duration(),
            cleanup: self.scheduler_jobs.cleanup_period(),
            overdue_synthesis: self.scheduler_jobs.overdue_synthesis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_parses_units() {
        assert_eq!("5m".parse::<Period>().unwrap(), Period::from_secs(300));
        assert_eq!("24h".parse::<Period>().unwrap(), Period::from_secs(86_400));
        assert_eq!("2d".parse::<Period>().unwrap(), Period::from_secs(172_800));
        assert_eq!("45".parse::<Period>().unwrap(), Period::from_secs(45));
        assert!("5w".parse::<Period>().is_err());
        assert!("m".parse::<Period>().is_err());
    }

    #[test]
    fn period_displays_largest_unit() {
        assert_eq!(Period::from_secs(300).to_string(), "5m");
        assert_eq!(Period::from_secs(86_400).to_string(), "1d");
        assert_eq!(Period::from_secs(90).to_string(), "90s");
    }

    #[test]
    fn period_accepts_integers_and_strings() {
        let from_int: Period = serde_yaml::from_str("600").unwrap();
        let from_text: Period = serde_yaml::from_str("10m").unwrap();
        assert_eq!(from_int, from_text);
    }

    #[test]
    fn cleanup_defaults_to_twice_due_frequency() {
        let jobs = SchedulerJobsConfig::default();
        assert_eq!(jobs.cleanup_period(), Duration::from_secs(600));
        let jobs = SchedulerJobsConfig {
            notification_cleanup: Some(Period::from_secs(60)),
            ..jobs
        };
        assert_eq!(jobs.cleanup_period(), Duration::from_secs(60));
    }

    #[test]
    fn validate_rejects_other_drivers() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.database.driver = "postgres".into();
        assert!(config.validate().is_err());
    }
}
