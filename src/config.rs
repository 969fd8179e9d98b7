//! Application-level configuration for the invitation server and its clients.

use std::{env, fs, io::ErrorKind, path::PathBuf, str::FromStr, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "GAME_INVITE_CONFIG_PATH";
/// Environment variable selecting the storage backend.
const STORE_ENV: &str = "INVITE_STORE";

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_FEED_CAPACITY: usize = 64;
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Storage backend holding the invitation rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map; rows are lost on restart.
    #[default]
    Memory,
    /// MongoDB, configured through `MONGO_URI` / `MONGO_DB`.
    Mongo,
    /// CouchDB, configured through `COUCH_BASE_URL` / `COUCH_DB`.
    Couch,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "couch" | "couchdb" => Ok(StoreBackend::Couch),
            other => Err(format!("unknown store backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the server.
pub struct AppConfig {
    /// TCP port the HTTP server binds to.
    pub port: u16,
    /// Storage backend to connect.
    pub store: StoreBackend,
    /// Capacity of the change-feed broadcast channel.
    pub feed_capacity: usize,
    /// Upper bound for a single store round trip of a transition operation.
    pub operation_timeout: Option<Duration>,
    /// Age after which a pending invitation is cancelled; `None` disables expiry.
    pub pending_ttl: Option<Duration>,
    /// How often the expiry sweeper scans for stale invitations.
    pub expiry_sweep_interval: Duration,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults, then apply
    /// the `PORT` / `INVITE_STORE` environment overrides.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        store = ?app_config.store,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(port) = env::var("PORT")
            .or_else(|_| env::var("SERVER_PORT"))
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
        {
            self.port = port;
        }

        if let Ok(value) = env::var(STORE_ENV) {
            match value.parse::<StoreBackend>() {
                Ok(store) => self.store = store,
                Err(err) => warn!(error = %err, "ignoring {STORE_ENV} override"),
            }
        }

        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            store: StoreBackend::default(),
            feed_capacity: DEFAULT_FEED_CAPACITY,
            operation_timeout: Some(DEFAULT_OPERATION_TIMEOUT),
            pending_ttl: None,
            expiry_sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    port: Option<u16>,
    store: Option<StoreBackend>,
    feed_capacity: Option<usize>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    operation_timeout_ms: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pending_ttl_secs: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    expiry_sweep_interval_secs: Option<Duration>,
    #[serde(default)]
    disable_operation_timeout: bool,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        let operation_timeout = if value.disable_operation_timeout {
            None
        } else {
            value.operation_timeout_ms.or(defaults.operation_timeout)
        };

        Self {
            port: value.port.unwrap_or(defaults.port),
            store: value.store.unwrap_or(defaults.store),
            feed_capacity: value.feed_capacity.unwrap_or(defaults.feed_capacity).max(1),
            operation_timeout,
            pending_ttl: value.pending_ttl_secs.filter(|ttl| !ttl.is_zero()),
            expiry_sweep_interval: value
                .expiry_sweep_interval_secs
                .filter(|interval| !interval.is_zero())
                .unwrap_or(defaults.expiry_sweep_interval),
        }
    }
}

/// Tuning knobs of the client-side event router.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// First delay before retrying a failed feed subscription.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_backoff: Duration,
    /// Ceiling of the exponential subscription backoff.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_backoff: Duration,
    /// How long an inviter profile lookup may take before the placeholder is used.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub profile_timeout: Duration,
    /// Capacity of the router inbox.
    pub inbox_capacity: usize,
    /// Number of canonical rows remembered for out-of-order reconciliation.
    pub history_capacity: usize,
    /// Re-fetch every tracked invitation whenever the feed subscription is (re)established.
    pub resync_on_reconnect: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            profile_timeout: Duration::from_secs(2),
            inbox_capacity: 64,
            history_capacity: 128,
            resync_on_reconnect: true,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
