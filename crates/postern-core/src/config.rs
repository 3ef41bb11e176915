use std::path::PathBuf;

/// Limiter configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the usage slot file.
    pub data_dir: PathBuf,
    /// Maximum messages allowed per device per calendar day.
    pub max_messages_per_day: u32,
    /// Usage entries whose last reset is older than this many days are
    /// evicted on save.
    pub retention_days: i64,
    /// Whether to resolve public IP / coarse location into audit fields
    /// when a message is recorded.
    pub enrich_enabled: bool,
}

/// Default daily quota.
pub const MAX_MESSAGES_PER_DAY: u32 = 3;

/// Default retention window for stale usage entries.
pub const RETENTION_DAYS: i64 = 30;

impl Config {
    /// Load configuration from `POSTERN_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("POSTERN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        Self {
            data_dir,
            max_messages_per_day: env_u32("POSTERN_MAX_PER_DAY", MAX_MESSAGES_PER_DAY),
            retention_days: env_i64("POSTERN_RETENTION_DAYS", RETENTION_DAYS),
            enrich_enabled: std::env::var("POSTERN_ENRICH_ENABLED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_messages_per_day: MAX_MESSAGES_PER_DAY,
            retention_days: RETENTION_DAYS,
            enrich_enabled: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("postern")
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
