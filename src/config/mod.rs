/// Configuration management for the Floowsynk server
///
/// Handles server, database, scheduler and logging settings. Every value can be
/// overridden through a `FLOOWSYNK_*` environment variable.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub audit: AuditConfig,
    /// Default tracing filter when `RUST_LOG` is not set
    pub log_filter: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection string, e.g. "sqlite://data/floowsynk.db"
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether interval-triggered workflows are run by this process
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Buffer size of the live replay broadcast channel
    pub live_capacity: usize,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("FLOOWSYNK_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("FLOOWSYNK_PORT", 8081),
            },
            database: DatabaseConfig {
                url: std::env::var("FLOOWSYNK_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/floowsynk.db".to_string()),
            },
            scheduler: SchedulerConfig {
                enabled: env_or("FLOOWSYNK_SCHEDULER", true),
            },
            audit: AuditConfig {
                live_capacity: env_or("FLOOWSYNK_AUDIT_CAPACITY", 1024),
            },
            log_filter: std::env::var("FLOOWSYNK_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl Config {
    /// In-memory database, scheduler off; used by tests and quick local runs
    pub fn in_memory() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
            },
            scheduler: SchedulerConfig { enabled: false },
            audit: AuditConfig { live_capacity: 64 },
            log_filter: "info".to_string(),
        }
    }
}
