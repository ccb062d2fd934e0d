use garde::Validate;
use serde::Deserialize;
use std::time::Duration;

use crate::pipeline::PipelineConfig;

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// PostgreSQL connection string. Jobs are kept in memory when unset.
    #[garde(skip)]
    pub database_url: Option<String>,

    /// Directory for artifacts when no object store is configured.
    #[serde(default = "default_artifact_dir")]
    #[garde(length(min = 1))]
    pub artifact_dir: String,

    /// R2 bucket name
    #[garde(skip)]
    pub r2_bucket: Option<String>,

    /// R2 endpoint URL
    #[garde(skip)]
    pub r2_endpoint: Option<String>,

    /// R2 access key ID (S3-compatible)
    #[garde(skip)]
    pub r2_access_key: Option<String>,

    /// R2 secret access key (S3-compatible)
    #[garde(skip)]
    pub r2_secret_key: Option<String>,

    /// Batch items processed concurrently per job
    #[serde(default = "default_batch_concurrency")]
    #[garde(range(min = 1, max = 256))]
    pub batch_concurrency: usize,

    /// Image references processed concurrently per item
    #[serde(default = "default_item_concurrency")]
    #[garde(range(min = 1, max = 64))]
    pub item_concurrency: usize,

    #[serde(default = "default_fetch_timeout_secs")]
    #[garde(range(min = 1, max = 600))]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    #[garde(range(min = 1, max = 10))]
    pub fetch_max_attempts: u32,

    #[serde(default = "default_max_image_bytes")]
    #[garde(range(min = 1))]
    pub max_image_bytes: u64,

    /// JPEG quality for recompressed artifacts
    #[serde(default = "default_jpeg_quality")]
    #[garde(range(min = 1, max = 100))]
    pub jpeg_quality: u8,

    #[serde(default = "default_max_output_bytes")]
    #[garde(range(min = 1))]
    pub max_output_bytes: usize,

    #[serde(default = "default_max_attempts")]
    #[garde(range(min = 1, max = 10))]
    pub store_max_attempts: u32,

    /// First backoff delay; later attempts double it up to a fixed cap.
    #[serde(default = "default_retry_base_delay_ms")]
    #[garde(range(max = 60_000))]
    pub retry_base_delay_ms: u64,
}

/// S3-compatible storage settings, present only when fully configured.
pub struct R2Settings<'a> {
    pub bucket: &'a str,
    pub endpoint: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_artifact_dir() -> String {
    "output".to_string()
}

fn default_batch_concurrency() -> usize {
    8
}

fn default_item_concurrency() -> usize {
    4
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_image_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_jpeg_quality() -> u8 {
    50
}

fn default_max_output_bytes() -> usize {
    512 * 1024
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Load from explicit key/value pairs (keys in upper case).
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            batch_concurrency: self.batch_concurrency,
            item_concurrency: self.item_concurrency,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            fetch_max_attempts: self.fetch_max_attempts,
            max_image_bytes: self.max_image_bytes,
            jpeg_quality: self.jpeg_quality,
            max_output_bytes: self.max_output_bytes,
            store_max_attempts: self.store_max_attempts,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn r2(&self) -> Option<R2Settings<'_>> {
        Some(R2Settings {
            bucket: self.r2_bucket.as_deref()?,
            endpoint: self.r2_endpoint.as_deref()?,
            access_key: self.r2_access_key.as_deref()?,
            secret_key: self.r2_secret_key.as_deref()?,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_vars(Vec::new()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.artifact_dir, "output");
        assert_eq!(config.jpeg_quality, 50);
        assert!(config.database_url.is_none());
        assert!(config.r2().is_none());

        let pipeline = config.pipeline();
        assert_eq!(pipeline.batch_concurrency, 8);
        assert_eq!(pipeline.fetch_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_vars(vars(&[
            ("BATCH_CONCURRENCY", "16"),
            ("JPEG_QUALITY", "75"),
            ("DATABASE_URL", "postgres://localhost/jobs"),
        ]))
        .unwrap();
        assert_eq!(config.batch_concurrency, 16);
        assert_eq!(config.jpeg_quality, 75);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/jobs"));
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(matches!(
            AppConfig::from_vars(vars(&[("JPEG_QUALITY", "0")])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::from_vars(vars(&[("BATCH_CONCURRENCY", "0")])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::from_vars(vars(&[("RETRY_BASE_DELAY_MS", "18446744073709551615")])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::from_vars(vars(&[("FETCH_TIMEOUT_SECS", "soon")])),
            Err(ConfigError::Env(_))
        ));
    }

    #[test]
    fn test_r2_requires_all_fields() {
        let partial = AppConfig::from_vars(vars(&[("R2_BUCKET", "artifacts")])).unwrap();
        assert!(partial.r2().is_none());

        let full = AppConfig::from_vars(vars(&[
            ("R2_BUCKET", "artifacts"),
            ("R2_ENDPOINT", "https://r2.example.com"),
            ("R2_ACCESS_KEY", "key"),
            ("R2_SECRET_KEY", "secret"),
        ]))
        .unwrap();
        assert_eq!(full.r2().unwrap().bucket, "artifacts");
    }
}
