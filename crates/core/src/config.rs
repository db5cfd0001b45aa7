use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
    pub maintenance: MaintenanceConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            store: StoreConfig::from_env(),
            pipeline: PipelineConfig::from_env(),
            maintenance: MaintenanceConfig::from_env(),
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  server:      {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  store:       backend={}, redis={}:{}",
            self.store.backend,
            self.store.redis_host,
            self.store.redis_port
        );
        tracing::info!(
            "  pipeline:    workers={}, batch_size={}, max_retries={}, bulk_cap={}",
            self.pipeline.worker_count,
            self.pipeline.batch_size,
            self.pipeline.max_retries,
            self.pipeline.bulk_max_items
        );
        tracing::info!(
            "  maintenance: duration={}s, keep_days={}",
            self.maintenance.duration_secs,
            self.maintenance.keep_days
        );
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_u16("PORT", 3001),
            cors_origin: env_or("CORS_ORIGIN", "*"),
        }
    }
}

// ── Store ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend: "redis" (production) or "memory" (dev/test).
    pub backend: String,
    pub redis_host: String,
    pub redis_port: u16,
}

impl StoreConfig {
    fn from_env() -> Self {
        Self {
            backend: env_or("STORE_BACKEND", "redis"),
            redis_host: env_or("REDIS_HOST", "localhost"),
            redis_port: env_u16("REDIS_PORT", 6379),
        }
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.redis_host, self.redis_port)
    }
}

// ── Pipeline ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of worker tasks draining the reading queue.
    pub worker_count: usize,
    /// Maximum records drained per worker iteration.
    pub batch_size: usize,
    /// Apply attempts before a payload is dead-lettered.
    pub max_retries: u32,
    /// Maximum items accepted by the bulk ingress endpoint.
    pub bulk_max_items: usize,
    /// Blocking-pop timeout so workers observe stop() promptly.
    pub pop_timeout_ms: u64,
}

impl PipelineConfig {
    fn from_env() -> Self {
        Self {
            worker_count: env_usize("WORKER_COUNT", 4),
            batch_size: env_usize("BULK_BATCH_SIZE", 100),
            max_retries: env_u32("MAX_RETRIES", 3),
            bulk_max_items: env_usize("BULK_MAX_ITEMS", 1000),
            pop_timeout_ms: env_or("POP_TIMEOUT_MS", "1000").parse().unwrap_or(1000),
        }
    }
}

// ── Maintenance ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Length of the maintenance window; also the flag TTL.
    pub duration_secs: u64,
    /// History retention horizon in days.
    pub keep_days: u32,
}

impl MaintenanceConfig {
    fn from_env() -> Self {
        Self {
            duration_secs: env_or("MAINTENANCE_DURATION_SECS", "60").parse().unwrap_or(60),
            keep_days: env_u32("KEEP_DAYS", 365),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_url() {
        let store = StoreConfig {
            backend: "redis".to_string(),
            redis_host: "cache.internal".to_string(),
            redis_port: 6380,
        };
        assert_eq!(store.redis_url(), "redis://cache.internal:6380/");
    }

    #[test]
    fn test_defaults_without_env() {
        // Only assert fields no test environment is expected to override.
        let pipeline = PipelineConfig::from_env();
        assert!(pipeline.worker_count >= 1);
        assert!(pipeline.batch_size >= 1);
        assert!(pipeline.bulk_max_items >= pipeline.batch_size);
    }
}
