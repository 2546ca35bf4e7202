use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ROOMS: &str = "General's Quarters,Major's Suite";

/// Runtime settings, read from `BOOKINGS_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub session_lifetime: Duration,
    pub compact_threshold: u64,
    /// Rooms created on first start, when the store has none.
    pub seed_rooms: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("BOOKINGS_DATA_DIR").unwrap_or_else(|| "./data".into());
        let metrics_port = lookup("BOOKINGS_METRICS_PORT").and_then(|s| s.parse().ok());
        let session_lifetime_secs: u64 = lookup("BOOKINGS_SESSION_LIFETIME_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(86_400);
        let compact_threshold: u64 = lookup("BOOKINGS_COMPACT_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1000);
        let seed_rooms = lookup("BOOKINGS_ROOMS")
            .unwrap_or_else(|| DEFAULT_ROOMS.into())
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();

        Self {
            data_dir: PathBuf::from(data_dir),
            metrics_port,
            session_lifetime: Duration::from_secs(session_lifetime_secs),
            compact_threshold,
            seed_rooms,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}
