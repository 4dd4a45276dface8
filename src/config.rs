use anyhow::{Context, Result, anyhow};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub crm_base_url: String,
    pub crm_api_key: String,
    pub crm_attempts_field: String,
    pub analytics_base_url: String,
    pub analytics_api_key: String,
    pub sheets_webhook_url: String,
    pub automation_webhook_url: String,
    pub max_payload_bytes: usize,
    pub http_timeout_seconds: u64,
    pub dedup_ttl_seconds: i64,
    pub queue_max_concurrent: usize,
    pub queue_dispatch_delay_ms: u64,
    pub queue_max_retries: u32,
    pub queue_backoff_base_ms: u64,
    pub queue_backoff_max_ms: u64,
    pub queue_depth_warn: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            bind_addr: env::var("SYNC_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            crm_base_url: required_env("CRM_BASE_URL")?,
            crm_api_key: required_env("CRM_API_KEY")?,
            crm_attempts_field: required_env("CRM_ATTEMPTS_FIELD")?,
            analytics_base_url: required_env("ANALYTICS_BASE_URL")?,
            analytics_api_key: required_env("ANALYTICS_API_KEY")?,
            sheets_webhook_url: required_env("SHEETS_WEBHOOK_URL")?,
            automation_webhook_url: required_env("AUTOMATION_WEBHOOK_URL")?,
            max_payload_bytes: env_usize("SYNC_MAX_PAYLOAD_BYTES", 1_048_576)?,
            http_timeout_seconds: env_u64("SYNC_HTTP_TIMEOUT_SECONDS", 10)?,
            dedup_ttl_seconds: env_i64("SYNC_DEDUP_TTL_SECONDS", 300)?,
            queue_max_concurrent: env_usize("SYNC_QUEUE_MAX_CONCURRENT", 5)?,
            queue_dispatch_delay_ms: env_u64("SYNC_QUEUE_DISPATCH_DELAY_MS", 200)?,
            queue_max_retries: env_u32("SYNC_QUEUE_MAX_RETRIES", 3)?,
            queue_backoff_base_ms: env_u64("SYNC_QUEUE_BACKOFF_BASE_MS", 1_000)?,
            queue_backoff_max_ms: env_u64("SYNC_QUEUE_BACKOFF_MAX_MS", 30_000)?,
            queue_depth_warn: env_usize("SYNC_QUEUE_DEPTH_WARN", 100)?,
        };

        if config.dedup_ttl_seconds <= 0 {
            return Err(anyhow!("SYNC_DEDUP_TTL_SECONDS must be a positive integer"));
        }

        if config.queue_max_concurrent == 0 {
            return Err(anyhow!("SYNC_QUEUE_MAX_CONCURRENT must be at least 1"));
        }

        if config.queue_backoff_max_ms < config.queue_backoff_base_ms {
            return Err(anyhow!(
                "SYNC_QUEUE_BACKOFF_MAX_MS must be >= SYNC_QUEUE_BACKOFF_BASE_MS"
            ));
        }

        Ok(config)
    }
}

fn required_env(name: &str) -> Result<String> {
    let value = env::var(name).with_context(|| format!("missing required env var: {name}"))?;
    if value.trim().is_empty() {
        return Err(anyhow!("required env var {name} cannot be empty"));
    }
    Ok(value)
}

fn env_u32(name: &str, default: u32) -> Result<u32> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(|value| {
            value
                .parse::<u32>()
                .with_context(|| format!("invalid u32 for {name}"))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(|value| {
            value
                .parse::<u64>()
                .with_context(|| format!("invalid u64 for {name}"))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

fn env_i64(name: &str, default: i64) -> Result<i64> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(|value| {
            value
                .parse::<i64>()
                .with_context(|| format!("invalid i64 for {name}"))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

fn env_usize(name: &str, default: usize) -> Result<usize> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(|value| {
            value
                .parse::<usize>()
                .with_context(|| format!("invalid usize for {name}"))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}
