use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub storage: StorageConfig,
    pub email: EmailConfig,
    pub lifecycle: LifecycleConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Overrides the `Host`-derived base used in download links.
    pub public_base_url: Option<String>,
    pub public_scheme: String,
    /// Use the first `X-Forwarded-For` hop as the client key.
    pub trust_proxy_headers: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub provider: String,
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub provider: String,
    pub url: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub provider: String,
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    pub s3_endpoint: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub provider: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    pub max_upload_bytes: usize,
    pub record_ttl_secs: u64,
    pub signed_url_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitErrorBehavior {
    /// Fail-open: admit the request when the counter store is unreachable.
    Allow,
    /// Fail-closed: reject with an internal error.
    Deny,
}

impl FromStr for RateLimitErrorBehavior {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            other => Err(anyhow::anyhow!(
                "unknown rate limit error behavior '{}' (expected 'allow' or 'deny')",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u64,
    pub window_secs: u64,
    pub on_error: RateLimitErrorBehavior,
}

impl LifecycleConfig {
    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 25 * 1024 * 1024,
            record_ttl_secs: 7 * 24 * 60 * 60,
            signed_url_ttl_secs: 15 * 60,
            sweep_interval_secs: 12 * 60 * 60,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 1000,
            window_secs: 60 * 60,
            on_error: RateLimitErrorBehavior::Deny,
        }
    }
}

/// Read `name` and parse it, falling back to `default` when unset.
fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid value for {}: '{}' ({})", name, raw, e))
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn check_provider(name: &str, value: &str, known: &[&str]) -> Result<()> {
    if known.contains(&value) {
        Ok(())
    } else {
        anyhow::bail!("unknown {} '{}' (expected one of: {})", name, value, known.join(", "))
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let lifecycle_defaults = LifecycleConfig::default();
        let rate_defaults = RateLimitConfig::default();

        let username = optional_var("EMAIL_ID");
        let from = optional_var("EMAIL_FROM")
            .or_else(|| username.clone())
            .unwrap_or_else(|| "no-reply@localhost".to_string());

        let config = Self {
            server: ServerConfig {
                port: parse_var("PORT", "3000")?,
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                public_base_url: optional_var("PUBLIC_BASE_URL")
                    .map(|url| url.trim_end_matches('/').to_string()),
                public_scheme: env::var("PUBLIC_SCHEME").unwrap_or_else(|_| "https".to_string()),
                trust_proxy_headers: parse_var("TRUST_PROXY_HEADERS", "false")?,
            },
            database: DatabaseConfig {
                provider: env::var("RECORD_INDEX").unwrap_or_else(|_| "postgres".to_string()),
                url: optional_var("DATABASE_URL"),
                max_connections: parse_var("DB_MAX_CONNECTIONS", "10")?,
                min_connections: parse_var("DB_MIN_CONNECTIONS", "1")?,
            },
            redis: RedisConfig {
                provider: env::var("RATE_LIMIT_BACKEND").unwrap_or_else(|_| "redis".to_string()),
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                key_prefix: env::var("REDIS_KEY_PREFIX")
                    .unwrap_or_else(|_| "sendit:ratelimit".to_string()),
            },
            storage: StorageConfig {
                provider: env::var("STORAGE_PROVIDER").unwrap_or_else(|_| "s3".to_string()),
                s3_bucket: env::var("S3_BUCKET").unwrap_or_default(),
                s3_region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                s3_access_key_id: optional_var("AWS_ACCESS_KEY_ID"),
                s3_secret_access_key: optional_var("AWS_SECRET_ACCESS_KEY"),
                s3_endpoint: optional_var("S3_ENDPOINT"),
                timeout_secs: parse_var("STORAGE_TIMEOUT_SECS", "30")?,
            },
            email: EmailConfig {
                provider: env::var("EMAIL_PROVIDER").unwrap_or_else(|_| "smtp".to_string()),
                smtp_host: env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()),
                smtp_port: parse_var("SMTP_PORT", "587")?,
                smtp_tls: parse_var("SMTP_TLS", "true")?,
                username,
                password: optional_var("EMAIL_PWD"),
                from,
            },
            lifecycle: LifecycleConfig {
                max_upload_bytes: parse_var(
                    "MAX_UPLOAD_BYTES",
                    &lifecycle_defaults.max_upload_bytes.to_string(),
                )?,
                record_ttl_secs: parse_var(
                    "RECORD_TTL_SECS",
                    &lifecycle_defaults.record_ttl_secs.to_string(),
                )?,
                signed_url_ttl_secs: parse_var(
                    "SIGNED_URL_TTL_SECS",
                    &lifecycle_defaults.signed_url_ttl_secs.to_string(),
                )?,
                sweep_interval_secs: parse_var(
                    "SWEEP_INTERVAL_SECS",
                    &lifecycle_defaults.sweep_interval_secs.to_string(),
                )?,
            },
            rate_limit: RateLimitConfig {
                max_requests: parse_var(
                    "RATE_LIMIT_MAX_REQUESTS",
                    &rate_defaults.max_requests.to_string(),
                )?,
                window_secs: parse_var(
                    "RATE_LIMIT_WINDOW_SECS",
                    &rate_defaults.window_secs.to_string(),
                )?,
                on_error: parse_var("RATE_LIMIT_ON_ERROR", "deny")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the services cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.lifecycle.record_ttl_secs == 0 {
            anyhow::bail!("RECORD_TTL_SECS must be greater than zero");
        }
        if self.lifecycle.signed_url_ttl_secs == 0 {
            anyhow::bail!("SIGNED_URL_TTL_SECS must be greater than zero");
        }
        if self.lifecycle.sweep_interval_secs == 0 {
            anyhow::bail!("SWEEP_INTERVAL_SECS must be greater than zero");
        }
        if self.rate_limit.window_secs == 0 {
            anyhow::bail!("RATE_LIMIT_WINDOW_SECS must be greater than zero");
        }
        check_provider("RECORD_INDEX", &self.database.provider, &["postgres", "memory"])?;
        check_provider("RATE_LIMIT_BACKEND", &self.redis.provider, &["redis", "memory"])?;
        check_provider("STORAGE_PROVIDER", &self.storage.provider, &["s3", "memory"])?;
        check_provider("EMAIL_PROVIDER", &self.email.provider, &["smtp", "log"])?;
        if self.database.provider == "postgres" {
            self.database
                .url
                .as_ref()
                .context("DATABASE_URL must be set when RECORD_INDEX=postgres")?;
        }
        if self.storage.provider == "s3" && self.storage.s3_bucket.is_empty() {
            anyhow::bail!("S3_BUCKET must be set when STORAGE_PROVIDER=s3");
        }
        Ok(())
    }

    /// Self-contained configuration with in-memory backends everywhere.
    pub fn in_memory() -> Self {
        Self {
            server: ServerConfig {
                port: 3000,
                host: "127.0.0.1".to_string(),
                public_base_url: None,
                public_scheme: "https".to_string(),
                trust_proxy_headers: false,
            },
            database: DatabaseConfig {
                provider: "memory".to_string(),
                url: None,
                max_connections: 1,
                min_connections: 1,
            },
            redis: RedisConfig {
                provider: "memory".to_string(),
                url: "redis://localhost:6379".to_string(),
                key_prefix: "sendit:ratelimit".to_string(),
            },
            storage: StorageConfig {
                provider: "memory".to_string(),
                s3_bucket: String::new(),
                s3_region: "us-east-1".to_string(),
                s3_access_key_id: None,
                s3_secret_access_key: None,
                s3_endpoint: None,
                timeout_secs: 30,
            },
            email: EmailConfig {
                provider: "log".to_string(),
                smtp_host: "localhost".to_string(),
                smtp_port: 2525,
                smtp_tls: false,
                username: None,
                password: None,
                from: "no-reply@localhost".to_string(),
            },
            lifecycle: LifecycleConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}
