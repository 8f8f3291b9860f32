use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    pub stale_after: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(5 * 60),
        }
    }
}

impl SweepConfig {
    pub fn stale_after_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.stale_after).unwrap_or(chrono::Duration::minutes(5))
    }

    pub fn stale_after_minutes(&self) -> u64 {
        (self.stale_after.as_secs() / 60).max(1)
    }
}

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    pub attempt_timeout: Duration,
    pub device_budget: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub max_devices_per_user: usize,
    pub device_ttl: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(10),
            device_budget: Duration::from_secs(12),
            max_retries: 2,
            backoff_base: Duration::from_secs(1),
            max_devices_per_user: crate::models::DEFAULT_MAX_DEVICES,
            device_ttl: Duration::from_secs(90 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    pub max_network_errors: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 60,
            max_network_errors: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    pub public_base_url: String,

    // Redis (device registry)
    pub redis_url: String,

    pub sweep: SweepConfig,
    pub fanout: FanoutConfig,

    // Web Push signing
    pub vapid_private_key: String,
    pub vapid_subject: String,

    // Notification appearance
    pub push_icon: Option<String>,
    pub push_badge: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let environment = Self::parse_environment()?;
        let defaults_fanout = FanoutConfig::default();

        let config = Self {
            environment,
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_var("PORT", 8080)?,
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),

            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),

            sweep: SweepConfig {
                interval: Duration::from_secs(Self::parse_var("SWEEP_INTERVAL_SECS", 30)?),
                stale_after: Duration::from_secs(Self::parse_var("STALE_AFTER_SECS", 300)?),
            },
            fanout: FanoutConfig {
                attempt_timeout: Duration::from_secs(Self::parse_var("PUSH_TIMEOUT_SECS", 10)?),
                device_budget: Duration::from_secs(Self::parse_var("PUSH_DEVICE_BUDGET_SECS", 12)?),
                max_retries: Self::parse_var("PUSH_MAX_RETRIES", defaults_fanout.max_retries)?,
                backoff_base: Duration::from_millis(Self::parse_var("PUSH_BACKOFF_BASE_MS", 1000)?),
                max_devices_per_user: Self::parse_var(
                    "MAX_DEVICES_PER_USER",
                    defaults_fanout.max_devices_per_user,
                )?,
                device_ttl: Duration::from_secs(Self::days_to_secs(Self::parse_var(
                    "DEVICE_TTL_DAYS",
                    90u64,
                )?)?),
            },

            vapid_private_key: Self::read_vapid_key()?,
            vapid_subject: std::env::var("VAPID_SUBJECT")
                .unwrap_or_else(|_| "mailto:suporte@example.com".to_string()),

            push_icon: std::env::var("PUSH_ICON").ok(),
            push_badge: std::env::var("PUSH_BADGE").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    fn read_vapid_key() -> Result<String> {
        let path = std::env::var("VAPID_PRIVATE_KEY_FILE")
            .context("VAPID_PRIVATE_KEY_FILE is required (PEM encoded P-256 key)")?;
        std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path))
    }

    fn days_to_secs(days: u64) -> Result<u64> {
        match days.checked_mul(24 * 3600) {
            Some(secs) => Ok(secs),
            None => bail!("DEVICE_TTL_DAYS is too large: {}", days),
        }
    }

    fn parse_environment() -> Result<Environment> {
        let env = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        match env.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => bail!("Unknown environment: {}", env),
        }
    }

    fn parse_var<T>(var: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match std::env::var(var) {
            Ok(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}", var)),
            Err(_) => Ok(default),
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.public_base_url.starts_with("http") {
            bail!("PUBLIC_BASE_URL must be HTTP(S) URL");
        }
        if !self.redis_url.starts_with("redis") {
            bail!("REDIS_URL must be a redis:// or rediss:// URL");
        }
        if self.sweep.interval.is_zero() {
            bail!("SWEEP_INTERVAL_SECS must be greater than zero");
        }
        if self.sweep.stale_after < self.sweep.interval {
            bail!("STALE_AFTER_SECS must not be shorter than SWEEP_INTERVAL_SECS");
        }
        if self.fanout.max_devices_per_user == 0 {
            bail!("MAX_DEVICES_PER_USER must be at least 1");
        }
        if self.fanout.attempt_timeout.is_zero() {
            bail!("PUSH_TIMEOUT_SECS must be greater than zero");
        }
        if !self.vapid_subject.starts_with("mailto:") && !self.vapid_subject.starts_with("https://") {
            bail!("VAPID_SUBJECT must be a mailto: or https:// URL");
        }
        if self.fanout.device_budget < self.fanout.attempt_timeout {
            bail!("PUSH_DEVICE_BUDGET_SECS must not be shorter than PUSH_TIMEOUT_SECS");
        }

        tracing::info!(
            "Configuration validated for {:?} environment",
            self.environment
        );

        Ok(())
    }
}
