use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail};

use tandem_crypto::KeyFill;
use tandem_gateway::GatewayConfig;
use tandem_gateway::config::TurnConfig;

/// Secrets that MUST NOT be used.
pub const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub stats_interval: Duration,
    pub gateway: GatewayConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let text = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = get("TANDEM_JWT_SECRET").unwrap_or_default();
        require_secret("TANDEM_JWT_SECRET", &jwt_secret)?;
        let turn_secret = get("TANDEM_TURN_SECRET").unwrap_or_default();
        require_secret("TANDEM_TURN_SECRET", &turn_secret)?;

        let defaults = TurnConfig::default();
        let stun_urls = match get("TANDEM_STUN_URLS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.stun_urls,
        };

        let turn = TurnConfig {
            secret: turn_secret,
            host: text("TANDEM_TURN_HOST", &defaults.host),
            port: parse_or(&get, "TANDEM_TURN_PORT", defaults.port)?,
            tls_port: parse_or(&get, "TANDEM_TURNS_PORT", defaults.tls_port)?,
            stun_urls,
            ttl_secs: parse_or(&get, "TANDEM_TURN_TTL_SECS", defaults.ttl_secs)?,
        };

        let gateway = GatewayConfig {
            jwt_secret,
            turn,
            typing_interval: Duration::from_millis(parse_or(&get, "TANDEM_TYPING_THROTTLE_MS", 3000)?),
            presence_interval: Duration::from_millis(parse_or(&get, "TANDEM_PRESENCE_THROTTLE_MS", 10_000)?),
            ring_timeout: Duration::from_secs(parse_or(&get, "TANDEM_RING_TIMEOUT_SECS", 45)?),
            key_fill: parse_or(&get, "TANDEM_LEGACY_KEY_FILL", KeyFill::Repeat)?,
            ..GatewayConfig::default()
        };

        let stats_secs: u64 = parse_or(&get, "TANDEM_STATS_INTERVAL_SECS", 60)?;
        if stats_secs == 0 {
            bail!("TANDEM_STATS_INTERVAL_SECS must be at least 1");
        }

        Ok(Self {
            host: text("TANDEM_HOST", "0.0.0.0"),
            port: parse_or(&get, "TANDEM_PORT", 3000)?,
            db_path: text("TANDEM_DB_PATH", "tandem.db").into(),
            stats_interval: Duration::from_secs(stats_secs),
            gateway,
        })
    }
}

fn require_secret(key: &str, value: &str) -> anyhow::Result<()> {
    if value.is_empty() || PLACEHOLDER_SECRETS.contains(&value) {
        bail!("{} is unset or still a placeholder", key);
    }
    Ok(())
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("invalid {}: {:?} ({})", key, raw, e)),
        None => Ok(default),
    }
}
