//! Environment-driven configuration (C0), loaded the way the teacher's
//! `main.rs`/`state.rs` bootstrap reads `dotenvy` + `std::env::var`.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_host: String,
    pub bind_port: u16,

    /// `postgres://`/`postgresql://` ⇒ networked backend; otherwise a file
    /// path for the embedded SQLite store (§4.1 backend selection).
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_connect_timeout: Duration,

    /// Embedded-store-only knobs (ignored by the networked backend).
    pub sqlite_journal_mode: String,
    pub sqlite_synchronous: String,
    pub sqlite_foreign_keys: bool,

    pub default_timeout_threshold_s: i64,
    pub default_eviction_threshold_s: i64,
    pub sweep_interval: Duration,

    pub sse_idle_timeout: Duration,
    pub request_deadline: Duration,
    pub shutdown_grace: Duration,

    /// Relaxes the schema-downgrade refusal for local iteration.
    pub debug: bool,
}

impl Config {
    pub fn from_env() -> Self {
        if dotenvy::dotenv().is_err() {
            tracing::warn!("no .env file found, relying on process environment");
        }

        let default_timeout_threshold_s = env_i64("TIMEOUT_THRESHOLD_S", 60);
        let sweep_interval = Duration::from_secs(
            env_u64("SWEEP_INTERVAL_S", (default_timeout_threshold_s.max(2) / 2) as u64).max(1),
        );

        Self {
            bind_host: std::env::var("BIND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            bind_port: env_u16("PORT", 8100),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "mesh_registry.db".to_string()),
            db_max_connections: env_u32("DB_MAX_CONNECTIONS", 10),
            db_connect_timeout: Duration::from_secs(env_u64("DB_CONNECT_TIMEOUT_S", 10)),
            sqlite_journal_mode: std::env::var("SQLITE_JOURNAL_MODE")
                .unwrap_or_else(|_| "WAL".to_string()),
            sqlite_synchronous: std::env::var("SQLITE_SYNCHRONOUS")
                .unwrap_or_else(|_| "NORMAL".to_string()),
            sqlite_foreign_keys: env_bool("SQLITE_FOREIGN_KEYS", true),
            default_timeout_threshold_s,
            default_eviction_threshold_s: env_i64("EVICTION_THRESHOLD_S", 120),
            sweep_interval,
            sse_idle_timeout: Duration::from_secs(env_u64("SSE_IDLE_TIMEOUT_S", 60)),
            request_deadline: Duration::from_secs(env_u64("REQUEST_DEADLINE_S", 30)),
            shutdown_grace: Duration::from_secs(env_u64("SHUTDOWN_GRACE_S", 10)),
            debug: env_bool("DEBUG", cfg!(debug_assertions)),
        }
    }

    /// Is the configured `database_url` a networked (Postgres) backend?
    pub fn uses_networked_backend(&self) -> bool {
        self.database_url.starts_with("postgres://") || self.database_url.starts_with("postgresql://")
    }
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
