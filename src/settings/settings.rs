use anyhow::{Result, anyhow};
use config::{Config, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub broker: Broker,
    pub rpc: Rpc,
    pub jwt: Jwt,
    pub cache: Cache,
    pub mysql: Mysql,
    pub log: Log,
}

#[derive(Debug, Deserialize)]
pub struct Broker {
    /// Comma-separated bootstrap server list.
    pub brokers: String,
    pub client_id: String,
    pub group_id: String,
}

#[derive(Debug, Deserialize)]
pub struct Rpc {
    pub request_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

#[derive(Deserialize)]
pub struct Jwt {
    pub secret: String,
    pub issuer: String,
    /// Duration string, e.g. "15m".
    pub access_expires_in: String,
    /// Duration string, e.g. "7d".
    pub refresh_expires_in: String,
}

// the signing secret must not leak into startup logs
impl std::fmt::Debug for Jwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jwt")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("access_expires_in", &self.access_expires_in)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct Cache {
    pub url: String,
    pub blacklist_prefix: String,
}

#[derive(Debug, Deserialize)]
pub struct Mysql {
    pub dsn: String,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}
