//! Configuration loading.
//!
//! Reads an optional TOML file, then applies environment overrides
//! prefixed `CAESAR_` with dots replaced by underscores (e.g.
//! `CAESAR_SIGNER_SOCKET_PATH`). Secrets are only ever read into
//! memory; nothing here writes them back to disk.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// All application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default)]
    pub signer: SignerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub venues: VenueConfig,
    #[serde(default)]
    pub pairs: Vec<PairConfig>,
}

fn default_env() -> String {
    "development".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: default_env(),
            signer: SignerConfig::default(),
            cache: CacheConfig::default(),
            db: DbConfig::default(),
            venues: VenueConfig::default(),
            pairs: Vec::new(),
        }
    }
}

/// Signer daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
    /// KMS key id for the external secrets backend. The terminal never
    /// touches key material; the backend decrypts and hands bytes to
    /// the signer daemon.
    #[serde(default)]
    pub kms_key_id: String,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_socket_path() -> String {
    "/var/run/caesar/signer.sock".to_string()
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            session_ttl_seconds: default_session_ttl(),
            kms_key_id: String::new(),
            region: default_region(),
        }
    }
}

/// Cache (Redis) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// host:port of the cache.
    #[serde(default = "default_cache_addr")]
    pub address: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db_index: u32,
}

fn default_cache_addr() -> String {
    "localhost:6379".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            address: default_cache_addr(),
            password: String::new(),
            db_index: 0,
        }
    }
}

impl CacheConfig {
    /// Connection URL for the redis client.
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}/{}", self.address, self.db_index)
        } else {
            format!("redis://:{}@{}/{}", self.password, self.address, self.db_index)
        }
    }
}

/// PostgreSQL settings for the external relational store (pair
/// metadata and trade history live there; the pipeline itself never
/// opens this connection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_name")]
    pub user: String,
    #[serde(default = "default_db_name")]
    pub password: String,
    #[serde(default = "default_db_name")]
    pub dbname: String,
    #[serde(default = "default_sslmode")]
    pub sslmode: String,
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "caesar".to_string()
}

fn default_sslmode() -> String {
    "disable".to_string()
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_name(),
            password: default_db_name(),
            dbname: default_db_name(),
            sslmode: default_sslmode(),
        }
    }
}

impl DbConfig {
    /// PostgreSQL connection string.
    pub fn dsn(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode={}",
            self.host, self.port, self.user, self.password, self.dbname, self.sslmode
        )
    }
}

/// Venue endpoints and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    #[serde(default = "default_poly_ws_url")]
    pub poly_ws_url: String,
    #[serde(default = "default_kalshi_ws_url")]
    pub kalshi_ws_url: String,
    #[serde(default)]
    pub kalshi_api_key: String,
    /// PKCS#8 PEM of the Kalshi API signing key.
    #[serde(default)]
    pub kalshi_private_key_pem: String,
    /// Minimum crossed-book spread before an arbitrage event fires.
    #[serde(default)]
    pub arb_threshold: f64,
}

fn default_poly_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string()
}

fn default_kalshi_ws_url() -> String {
    "wss://api.elections.kalshi.com/trade-api/ws/v2".to_string()
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            poly_ws_url: default_poly_ws_url(),
            kalshi_ws_url: default_kalshi_ws_url(),
            kalshi_api_key: String::new(),
            kalshi_private_key_pem: String::new(),
            arb_threshold: 0.0,
        }
    }
}

/// One tracked market pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairConfig {
    pub name: String,
    /// Polymarket condition id (market id in book updates).
    pub poly_market_id: String,
    /// Polymarket token id to subscribe to.
    pub poly_token_id: String,
    /// Kalshi market id (market id in book updates).
    pub kalshi_market_id: String,
    /// Kalshi ticker to subscribe to.
    pub kalshi_ticker: String,
}

impl Config {
    /// Load configuration: explicit path, else `CAESAR_CONFIG`, else
    /// `config/default.toml`; defaults when no file exists. Environment
    /// overrides apply last.
    pub fn load(path: Option<&str>) -> AppResult<Self> {
        let path = path
            .map(str::to_string)
            .or_else(|| std::env::var("CAESAR_CONFIG").ok())
            .unwrap_or_else(|| "config/default.toml".to_string());

        let mut cfg = if Path::new(&path).exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| AppError::Config(format!("failed to read {path}: {e}")))?;
            toml::from_str(&content)
                .map_err(|e| AppError::Config(format!("failed to parse {path}: {e}")))?
        } else {
            warn!(path = %path, "config file not found, using defaults");
            Self::default()
        };

        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        override_string("CAESAR_ENV", &mut self.env);

        override_string("CAESAR_SIGNER_SOCKET_PATH", &mut self.signer.socket_path);
        override_parse("CAESAR_SIGNER_SESSION_TTL_SECONDS", &mut self.signer.session_ttl_seconds);
        override_string("CAESAR_SIGNER_KMS_KEY_ID", &mut self.signer.kms_key_id);
        override_string("CAESAR_SIGNER_REGION", &mut self.signer.region);

        override_string("CAESAR_CACHE_ADDRESS", &mut self.cache.address);
        override_string("CAESAR_CACHE_PASSWORD", &mut self.cache.password);
        override_parse("CAESAR_CACHE_DB_INDEX", &mut self.cache.db_index);

        override_string("CAESAR_DB_HOST", &mut self.db.host);
        override_parse("CAESAR_DB_PORT", &mut self.db.port);
        override_string("CAESAR_DB_USER", &mut self.db.user);
        override_string("CAESAR_DB_PASSWORD", &mut self.db.password);
        override_string("CAESAR_DB_DBNAME", &mut self.db.dbname);
        override_string("CAESAR_DB_SSLMODE", &mut self.db.sslmode);

        override_string("CAESAR_VENUES_POLY_WS_URL", &mut self.venues.poly_ws_url);
        override_string("CAESAR_VENUES_KALSHI_WS_URL", &mut self.venues.kalshi_ws_url);
        override_string("CAESAR_VENUES_KALSHI_API_KEY", &mut self.venues.kalshi_api_key);
        override_string(
            "CAESAR_VENUES_KALSHI_PRIVATE_KEY_PEM",
            &mut self.venues.kalshi_private_key_pem,
        );
    }
}

fn override_string(var: &str, target: &mut String) {
    if let Ok(value) = std::env::var(var) {
        *target = value;
    }
}

fn override_parse<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(value) = std::env::var(var) {
        match value.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(var, value = %value, "ignoring unparsable override"),
        }
    }
}
