//! Configuration module
//!
//! Environment-driven configuration for the platform core: database pool,
//! storage backend selection, encryption key material, link signing, and
//! queue tuning. Embedding binaries load `.env` via `dotenvy` before calling
//! `PlatformConfig::from_env()`.

use std::env;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::storage_types::StorageBackend;

// Common constants
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
pub const STORAGE_MAX_CONCURRENT_REQUESTS: usize = 100;
pub const LINK_TTL_SECONDS: i64 = 3600;
pub const QUEUE_MAX_WORKERS: usize = 4;
pub const QUEUE_POLL_INTERVAL_MS: u64 = 1000;
pub const QUEUE_DEFAULT_TIMEOUT_SECONDS: i32 = 3600;
pub const QUEUE_MAX_RETRIES: i32 = 3;
pub const QUEUE_STALE_JOB_REAP_INTERVAL_SECS: u64 = 60;
pub const QUEUE_STALE_JOB_GRACE_PERIOD_SECS: i64 = 300;
pub const QUEUE_BLOCKED_REQUEUE_DELAY_SECS: i64 = 60;
pub const JOB_RETENTION_DAYS: i32 = 7;
const MASTER_KEY_LEN: usize = 32;
const MIN_LINK_SECRET_LEN: usize = 32;

/// Platform configuration
#[derive(Clone, Debug)]
pub struct PlatformConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub environment: String,
    // Storage configuration
    pub storage_backend: Option<StorageBackend>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO, etc.)
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub s3_force_path_style: bool,
    pub local_storage_path: Option<String>,
    pub storage_max_concurrent_requests: usize,
    // Encryption configuration
    pub master_encryption_key: Option<String>, // base64, 32 bytes decoded
    pub master_key_version: i32,
    // Pre-signed link configuration
    pub link_secret: String,
    pub link_ttl_seconds: i64,
    // Queue configuration
    pub queue_max_workers: usize,
    pub queue_poll_interval_ms: u64,
    pub queue_default_timeout_seconds: i32,
    pub queue_max_retries: i32,
    /// Interval in seconds between runs of the stale job reaper. 0 = disabled.
    pub queue_stale_job_reap_interval_secs: u64,
    /// Grace period in seconds added to job timeout before reaping stale running jobs.
    pub queue_stale_job_grace_period_secs: i64,
    /// Delay before a Blocked job becomes eligible again.
    pub queue_blocked_requeue_delay_secs: i64,
    /// Retention in days for finished jobs. Old jobs are deleted during cleanup. 0 = disabled.
    pub job_retention_days: i32,
}

impl PlatformConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(s) if !s.trim().is_empty() => Some(StorageBackend::from_str(&s)?),
            _ => None,
        };

        let config = Self {
            database_url,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            storage_backend,
            s3_region: env::var("S3_REGION").ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            aws_access_key_id: env::var("AWS_ACCESS_KEY_ID").ok(),
            aws_secret_access_key: env::var("AWS_SECRET_ACCESS_KEY").ok(),
            s3_force_path_style: env::var("S3_FORCE_PATH_STYLE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            storage_max_concurrent_requests: env::var("STORAGE_MAX_CONCURRENT_REQUESTS")
                .unwrap_or_else(|_| STORAGE_MAX_CONCURRENT_REQUESTS.to_string())
                .parse()
                .unwrap_or(STORAGE_MAX_CONCURRENT_REQUESTS),
            master_encryption_key: env::var("MASTER_ENCRYPTION_KEY").ok(),
            master_key_version: env::var("MASTER_KEY_VERSION")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .unwrap_or(1),
            link_secret: env::var("LINK_SECRET")
                .map_err(|_| anyhow::anyhow!("LINK_SECRET must be set"))?,
            link_ttl_seconds: env::var("LINK_TTL_SECONDS")
                .unwrap_or_else(|_| LINK_TTL_SECONDS.to_string())
                .parse()
                .unwrap_or(LINK_TTL_SECONDS),
            queue_max_workers: env::var("QUEUE_MAX_WORKERS")
                .unwrap_or_else(|_| QUEUE_MAX_WORKERS.to_string())
                .parse()
                .unwrap_or(QUEUE_MAX_WORKERS),
            queue_poll_interval_ms: env::var("QUEUE_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| QUEUE_POLL_INTERVAL_MS.to_string())
                .parse()
                .unwrap_or(QUEUE_POLL_INTERVAL_MS),
            queue_default_timeout_seconds: env::var("QUEUE_DEFAULT_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| QUEUE_DEFAULT_TIMEOUT_SECONDS.to_string())
                .parse()
                .unwrap_or(QUEUE_DEFAULT_TIMEOUT_SECONDS),
            queue_max_retries: env::var("QUEUE_MAX_RETRIES")
                .unwrap_or_else(|_| QUEUE_MAX_RETRIES.to_string())
                .parse()
                .unwrap_or(QUEUE_MAX_RETRIES),
            queue_stale_job_reap_interval_secs: env::var("QUEUE_STALE_JOB_REAP_INTERVAL_SECS")
                .unwrap_or_else(|_| QUEUE_STALE_JOB_REAP_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(QUEUE_STALE_JOB_REAP_INTERVAL_SECS),
            queue_stale_job_grace_period_secs: env::var("QUEUE_STALE_JOB_GRACE_PERIOD_SECS")
                .unwrap_or_else(|_| QUEUE_STALE_JOB_GRACE_PERIOD_SECS.to_string())
                .parse()
                .unwrap_or(QUEUE_STALE_JOB_GRACE_PERIOD_SECS),
            queue_blocked_requeue_delay_secs: env::var("QUEUE_BLOCKED_REQUEUE_DELAY_SECS")
                .unwrap_or_else(|_| QUEUE_BLOCKED_REQUEUE_DELAY_SECS.to_string())
                .parse()
                .unwrap_or(QUEUE_BLOCKED_REQUEUE_DELAY_SECS),
            job_retention_days: env::var("JOB_RETENTION_DAYS")
                .unwrap_or_else(|_| JOB_RETENTION_DAYS.to_string())
                .parse()
                .unwrap_or(JOB_RETENTION_DAYS),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase().eq("production") || self.environment.to_lowercase().eq("prod")
    }

    /// Whether managed encryption is available (a master key is configured).
    pub fn encryption_configured(&self) -> bool {
        self.master_encryption_key.is_some()
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.database_url.trim().is_empty() {
            return Err(anyhow::anyhow!("DATABASE_URL must not be empty"));
        }

        match self.storage_backend {
            Some(StorageBackend::S3) => {
                if self.s3_region.is_none() && self.s3_endpoint.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3 backend requires S3_REGION or S3_ENDPOINT"
                    ));
                }
            }
            Some(StorageBackend::Local) => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "Local backend requires LOCAL_STORAGE_PATH"
                    ));
                }
            }
            None => {}
        }

        if let Some(ref key) = self.master_encryption_key {
            let decoded = STANDARD
                .decode(key)
                .map_err(|e| anyhow::anyhow!("MASTER_ENCRYPTION_KEY is not valid base64: {}", e))?;
            if decoded.len() != MASTER_KEY_LEN {
                return Err(anyhow::anyhow!(
                    "MASTER_ENCRYPTION_KEY must decode to {} bytes, got {}",
                    MASTER_KEY_LEN,
                    decoded.len()
                ));
            }
        }

        if self.link_secret.len() < MIN_LINK_SECRET_LEN {
            return Err(anyhow::anyhow!(
                "LINK_SECRET must be at least {} characters",
                MIN_LINK_SECRET_LEN
            ));
        }

        if self.link_ttl_seconds <= 0 {
            return Err(anyhow::anyhow!("LINK_TTL_SECONDS must be positive"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> PlatformConfig {
        PlatformConfig {
            database_url: "postgresql://localhost/stowage".to_string(),
            db_max_connections: MAX_CONNECTIONS,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            environment: "development".to_string(),
            storage_backend: None,
            s3_region: None,
            s3_endpoint: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            s3_force_path_style: true,
            local_storage_path: None,
            storage_max_concurrent_requests: STORAGE_MAX_CONCURRENT_REQUESTS,
            master_encryption_key: None,
            master_key_version: 1,
            link_secret: "0123456789abcdef0123456789abcdef".to_string(),
            link_ttl_seconds: LINK_TTL_SECONDS,
            queue_max_workers: QUEUE_MAX_WORKERS,
            queue_poll_interval_ms: QUEUE_POLL_INTERVAL_MS,
            queue_default_timeout_seconds: QUEUE_DEFAULT_TIMEOUT_SECONDS,
            queue_max_retries: QUEUE_MAX_RETRIES,
            queue_stale_job_reap_interval_secs: QUEUE_STALE_JOB_REAP_INTERVAL_SECS,
            queue_stale_job_grace_period_secs: QUEUE_STALE_JOB_GRACE_PERIOD_SECS,
            queue_blocked_requeue_delay_secs: QUEUE_BLOCKED_REQUEUE_DELAY_SECS,
            job_retention_days: JOB_RETENTION_DAYS,
        }
    }

    #[test]
    fn test_validate_accepts_minimal_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_s3_without_region_or_endpoint() {
        let mut config = base_config();
        config.storage_backend = Some(StorageBackend::S3);
        assert!(config.validate().is_err());

        config.s3_endpoint = Some("http://localhost:9000".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_local_without_path() {
        let mut config = base_config();
        config.storage_backend = Some(StorageBackend::Local);
        assert!(config.validate().is_err());

        config.local_storage_path = Some("/var/lib/stowage".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_master_key() {
        let mut config = base_config();
        // 16 bytes, too short
        config.master_encryption_key = Some(STANDARD.encode([0u8; 16]));
        assert!(config.validate().is_err());

        config.master_encryption_key = Some(STANDARD.encode([0u8; 32]));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_link_secret() {
        let mut config = base_config();
        config.link_secret = "short".to_string();
        assert!(config.validate().is_err());
    }
}
