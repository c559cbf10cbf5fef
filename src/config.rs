use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::db::config::DbConfig;

pub const DEFAULT_STUDENT_ID_PREFIX: &str = "CAP-ST";
pub const DEFAULT_MASTERY_THRESHOLD: f64 = 80.0;
pub const DEFAULT_NOTIFICATION_RETENTION_DAYS: i64 = 2;
pub const MAX_NOTIFICATION_RETENTION_DAYS: i64 = 3650;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_DIR: &str = "./logs";

/// Where tracing output goes. `file_dir` is set only when file logging is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub file_dir: Option<PathBuf>,
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self::resolve(
            std::env::var("RUST_LOG").ok(),
            env_bool("ENABLE_FILE_LOGS").unwrap_or(false),
            std::env::var("LOG_DIR").ok(),
        )
    }

    fn resolve(level: Option<String>, file_logs: bool, dir: Option<String>) -> Self {
        let level = level
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let file_dir = file_logs.then(|| {
            let dir = dir
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());
            PathBuf::from(dir)
        });
        Self { level, file_dir }
    }

    pub fn stdout_only(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            file_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log: LogConfig,
    pub db: DbConfig,
    pub jwt_secret: Option<String>,
    pub student_id_prefix: String,
    pub mastery_threshold: f64,
    pub notification_retention_days: i64,
    pub bcrypt_cost: u32,
    pub default_student_password: String,
    pub seed_demo_data: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let jwt_secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|value| !value.trim().is_empty());

        let student_id_prefix = std::env::var("STUDENT_ID_PREFIX")
            .ok()
            .map(|value| value.trim().trim_end_matches('-').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_STUDENT_ID_PREFIX.to_string());

        let mastery_threshold = std::env::var("MASTERY_THRESHOLD")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| value.is_finite() && (0.0..=100.0).contains(value))
            .unwrap_or(DEFAULT_MASTERY_THRESHOLD);

        let notification_retention_days = std::env::var("NOTIFICATION_RETENTION_DAYS")
            .ok()
            .and_then(|value| parse_retention_days(&value))
            .unwrap_or(DEFAULT_NOTIFICATION_RETENTION_DAYS);

        let bcrypt_cost = std::env::var("BCRYPT_COST")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| (4..=31).contains(value))
            .unwrap_or(10);

        let default_student_password = std::env::var("DEFAULT_STUDENT_PASSWORD")
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "student123".to_string());

        let seed_demo_data = env_bool("SEED_DEMO_DATA").unwrap_or(false);

        Self {
            host,
            port,
            log: LogConfig::from_env(),
            db: DbConfig::from_env(),
            jwt_secret,
            student_id_prefix,
            mastery_threshold,
            notification_retention_days,
            bcrypt_cost,
            default_student_password,
            seed_demo_data,
        }
    }

    /// Configuration for an isolated database file, used by tests and tooling.
    pub fn for_database(database_url: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            log: LogConfig::stdout_only(DEFAULT_LOG_LEVEL),
            db: DbConfig::new(database_url),
            jwt_secret: Some(jwt_secret.into()),
            student_id_prefix: DEFAULT_STUDENT_ID_PREFIX.to_string(),
            mastery_threshold: DEFAULT_MASTERY_THRESHOLD,
            notification_retention_days: DEFAULT_NOTIFICATION_RETENTION_DAYS,
            bcrypt_cost: 4,
            default_student_password: "student123".to_string(),
            seed_demo_data: false,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Negative values are rejected; large ones are clamped to ten years.
fn parse_retention_days(value: &str) -> Option<i64> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|days| *days >= 0)
        .map(|days| days.min(MAX_NOTIFICATION_RETENTION_DAYS))
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    let normalized = value.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return None;
    }
    match normalized.as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_days_are_bounded() {
        assert_eq!(parse_retention_days("7"), Some(7));
        assert_eq!(parse_retention_days(" 0 "), Some(0));
        assert_eq!(parse_retention_days("-1"), None);
        assert_eq!(parse_retention_days("soon"), None);
        assert_eq!(
            parse_retention_days("9223372036854775807"),
            Some(MAX_NOTIFICATION_RETENTION_DAYS)
        );
    }

    #[test]
    fn file_logging_needs_the_switch() {
        let config = LogConfig::resolve(None, false, Some("/var/log/capsule".to_string()));
        assert_eq!(config, LogConfig::stdout_only(DEFAULT_LOG_LEVEL));

        let config = LogConfig::resolve(Some("debug".to_string()), true, None);
        assert_eq!(config.level, "debug");
        assert_eq!(config.file_dir, Some(PathBuf::from(DEFAULT_LOG_DIR)));

        let config = LogConfig::resolve(Some("  ".to_string()), true, Some("/tmp/capsule".to_string()));
        assert_eq!(config.level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.file_dir, Some(PathBuf::from("/tmp/capsule")));
    }
}
