use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use depthcaster_api::Settings;
use depthcaster_api::thread::OrphanPolicy;

const PLACEHOLDER_SECRETS: [&str; 3] = ["dev-secret-change-me", "changeme", "secret"];

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub neynar_api_key: String,
    pub neynar_api_url: String,
    pub settings: Settings,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn secs(name: &str, default: u64) -> Result<Duration> {
    let raw = var_or(name, &default.to_string());
    let secs = raw.parse().with_context(|| format!("{name} must be a number of seconds, got {raw:?}"))?;
    Ok(Duration::from_secs(secs))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = std::env::var("DEPTHCASTER_JWT_SECRET").context("DEPTHCASTER_JWT_SECRET is not set")?;
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("DEPTHCASTER_JWT_SECRET is a placeholder; set a real secret");
        }
        let neynar_api_key = std::env::var("NEYNAR_API_KEY").context("NEYNAR_API_KEY is not set")?;

        let webhook_secrets = var_or("NEYNAR_WEBHOOK_SECRETS", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        let orphan_policy: OrphanPolicy = var_or("DEPTHCASTER_ORPHAN_POLICY", "promote")
            .parse()
            .map_err(anyhow::Error::msg)?;

        Ok(Self {
            host: var_or("DEPTHCASTER_HOST", "0.0.0.0"),
            port: var_or("DEPTHCASTER_PORT", "3000").parse().context("DEPTHCASTER_PORT")?,
            db_path: PathBuf::from(var_or("DEPTHCASTER_DB_PATH", "depthcaster.db")),
            neynar_api_key,
            neynar_api_url: var_or("NEYNAR_API_URL", "https://api.neynar.com"),
            settings: Settings {
                jwt_secret,
                webhook_secrets,
                feed_cache_ttl: secs("DEPTHCASTER_FEED_CACHE_SECS", 30)?,
                curator_cache_ttl: secs("DEPTHCASTER_CURATOR_CACHE_SECS", 300)?,
                orphan_policy,
            },
        })
    }
}
