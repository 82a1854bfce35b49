use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use parley_db::RetryPolicy;
use parley_db::thread::DEFAULT_REPLY_DEPTH;

/// Secrets shipped in sample `.env` files. Refused at startup.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub reply_depth: usize,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub token_ttl_days: i64,
    pub db_retry: RetryPolicy,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        Ok(Self {
            jwt_secret,
            db_path: lookup("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()).into(),
            host: lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "PARLEY_PORT", 3000)?,
            reply_depth: parse_or(&lookup, "PARLEY_REPLY_DEPTH", DEFAULT_REPLY_DEPTH)?,
            cache_capacity: parse_or(&lookup, "PARLEY_CACHE_CAPACITY", 256)?,
            cache_ttl: Duration::from_secs(parse_or(&lookup, "PARLEY_CACHE_TTL_SECS", 60)?),
            token_ttl_days: parse_or(&lookup, "PARLEY_TOKEN_TTL_DAYS", 30)?,
            db_retry: RetryPolicy {
                retries: parse_or(&lookup, "PARLEY_DB_RETRIES", RetryPolicy::default().retries)?,
                delay: Duration::from_millis(parse_or(&lookup, "PARLEY_DB_RETRY_DELAY_MS", 50)?),
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
