use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use courier_gateway::ForwardRoute;

/// Placeholder secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me",
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub master_secret: String,
    pub api_secret: String,
    pub admin_chat_id: i64,
    pub db_path: PathBuf,
    pub media_dir: PathBuf,
    pub bridge_url: String,
    pub bind_addr: SocketAddr,
    pub health_interval: Duration,
    pub retry_interval: Duration,
    pub maintenance_interval: Duration,
    pub forward_route: ForwardRoute,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let master_secret = required_secret(&get, "COURIER_MASTER_SECRET")?;
        let api_secret = required_secret(&get, "COURIER_API_SECRET")?;

        let admin_chat_id: i64 = get("COURIER_ADMIN_CHAT_ID")
            .context("COURIER_ADMIN_CHAT_ID is unset")?
            .trim()
            .parse()
            .context("COURIER_ADMIN_CHAT_ID must be an integer chat id")?;

        let host = get("COURIER_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("COURIER_PORT")
            .unwrap_or_else(|| "8080".into())
            .parse()
            .context("COURIER_PORT must be a port number")?;
        let bind_addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .context("COURIER_HOST/COURIER_PORT do not form a socket address")?;

        let forward_route = match get("COURIER_FORWARD_ROUTE") {
            Some(raw) => raw.parse().map_err(anyhow::Error::msg)?,
            None => ForwardRoute::default(),
        };

        Ok(Self {
            master_secret,
            api_secret,
            admin_chat_id,
            db_path: get("COURIER_DB_PATH").unwrap_or_else(|| "courier.db".into()).into(),
            media_dir: get("COURIER_MEDIA_DIR").unwrap_or_else(|| "./media".into()).into(),
            bridge_url: get("COURIER_BRIDGE_URL")
                .unwrap_or_else(|| "ws://127.0.0.1:8765/bridge".into()),
            bind_addr,
            health_interval: seconds(&get, "COURIER_HEALTH_INTERVAL_SECS", 60)?,
            retry_interval: seconds(&get, "COURIER_RETRY_INTERVAL_SECS", 30)?,
            maintenance_interval: seconds(&get, "COURIER_MAINTENANCE_INTERVAL_SECS", 3600)?,
            forward_route,
        })
    }
}

fn required_secret(get: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<String> {
    let value = get(key).unwrap_or_default();
    if value.is_empty() || PLACEHOLDER_SECRETS.contains(&value.as_str()) {
        bail!("{} is unset or still a placeholder. Set it in your .env file and restart.", key);
    }
    Ok(value)
}

fn seconds(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> anyhow::Result<Duration> {
    let secs = match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{} must be a whole number of seconds", key))?,
        None => default,
    };
    if secs == 0 {
        bail!("{} must be greater than zero", key);
    }
    Ok(Duration::from_secs(secs))
}
