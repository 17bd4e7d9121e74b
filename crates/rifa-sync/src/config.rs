//! # Storefront Configuration
//!
//! Configuration for a storefront session and for the sale hub.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     RIFA_REMOTE_URL=wss://vendas.escola.example/ws                     │
//! │     RIFA_ADMIN_PASSWORD=...                                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/rifa-storefront/rifa.toml (Linux)                        │
//! │     ~/Library/Application Support/com.rifa.storefront/rifa.toml        │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     offline, 3 turmas, R$ 5,00 per number                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Totem Cantina"
//!
//! [remote]          # omit the whole section to run offline
//! url = "ws://192.168.0.10:8765/ws"
//! project_id = "rifa-formatura"
//! api_key = "..."
//!
//! [raffle]
//! ticket_price_cents = 500
//! turmas = [
//!   { code = "3A", first = 1, last = 200 },
//!   { code = "3B", first = 1, last = 200 },
//! ]
//!
//! [admin]
//! password = "..."
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use rifa_core::validation::validate_price_cents;
use rifa_core::{TurmaPool, CART_RESERVATION_MINUTES, CASH_RESERVATION_HOURS};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Identity of this storefront session. Sent in `Hello`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Auto-generated on first run if not provided.
    pub id: String,

    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Storefront".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Remote Sale Store
// =============================================================================

/// Connection to the shared sale store.
///
/// When this section is absent the session runs in permanent offline mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// WebSocket URL of the sale hub.
    pub url: String,

    pub project_id: String,

    #[serde(default)]
    pub api_key: String,
}

// =============================================================================
// Raffle Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaffleSettings {
    /// Price of one raffle number, in centavos.
    #[serde(default = "default_ticket_price")]
    pub ticket_price_cents: i64,

    /// Classes selling numbers, each with its own inclusive range.
    #[serde(default = "default_turmas")]
    pub turmas: Vec<TurmaPool>,
}

fn default_ticket_price() -> i64 {
    500
}

fn default_turmas() -> Vec<TurmaPool> {
    vec![
        TurmaPool::new("3A", 1, 200),
        TurmaPool::new("3B", 1, 200),
        TurmaPool::new("3TECH", 1, 200),
    ]
}

impl Default for RaffleSettings {
    fn default() -> Self {
        RaffleSettings {
            ticket_price_cents: default_ticket_price(),
            turmas: default_turmas(),
        }
    }
}

impl RaffleSettings {
    pub fn pool(&self, turma: &str) -> Option<&TurmaPool> {
        self.turmas.iter().find(|p| p.code == turma)
    }
}

// =============================================================================
// Timing
// =============================================================================

/// Timers of the manager and the cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Interval of the sweep that pushes unsynced records (seconds).
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Interval of the full reload through `query_all` (seconds).
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// How long raffle numbers stay held in a cart (minutes).
    #[serde(default = "default_cart_ttl")]
    pub cart_ttl_mins: i64,

    /// Interval of the expired-cart sweep (seconds).
    #[serde(default = "default_cart_sweep")]
    pub cart_sweep_secs: u64,

    /// Payment window of a cash reservation (hours).
    #[serde(default = "default_cash_ttl")]
    pub cash_ttl_hours: i64,

    /// Pause between sequential number writes at checkout (milliseconds).
    #[serde(default = "default_checkout_delay")]
    pub checkout_item_delay_ms: u64,
}

fn default_resync_interval() -> u64 {
    60
}

fn default_refresh_interval() -> u64 {
    15
}

fn default_cart_ttl() -> i64 {
    CART_RESERVATION_MINUTES
}

fn default_cart_sweep() -> u64 {
    60
}

fn default_cash_ttl() -> i64 {
    CASH_RESERVATION_HOURS
}

fn default_checkout_delay() -> u64 {
    300
}

impl Default for TimingSettings {
    fn default() -> Self {
        TimingSettings {
            resync_interval_secs: default_resync_interval(),
            refresh_interval_secs: default_refresh_interval(),
            cart_ttl_mins: default_cart_ttl(),
            cart_sweep_secs: default_cart_sweep(),
            cash_ttl_hours: default_cash_ttl(),
            checkout_item_delay_ms: default_checkout_delay(),
        }
    }
}

impl TimingSettings {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn cart_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cart_sweep_secs)
    }

    pub fn checkout_item_delay(&self) -> Duration {
        Duration::from_millis(self.checkout_item_delay_ms)
    }

    pub fn cart_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cart_ttl_mins)
    }

    pub fn cash_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cash_ttl_hours)
    }
}

// =============================================================================
// Admin / Hub / Transport
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminSettings {
    /// Shared secret for the admin panel. Empty disables admin login.
    #[serde(default)]
    pub password: String,
}

/// Settings of the sale hub (`sale-hub` binary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    #[serde(default = "default_hub_port")]
    pub port: u16,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Project id clients must present in `Hello`.
    #[serde(default = "default_project_id")]
    pub project_id: String,

    /// API key clients must present. Empty accepts any key.
    #[serde(default)]
    pub api_key: String,

    /// Refuse an insert when the number is already held by an active sale.
    #[serde(default = "default_true")]
    pub enforce_unique_active: bool,

    /// Write the collection through to the `hub_sales` table.
    #[serde(default = "default_true")]
    pub persist: bool,
}

fn default_hub_port() -> u16 {
    8765
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_project_id() -> String {
    "rifa".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for HubSettings {
    fn default() -> Self {
        HubSettings {
            port: default_hub_port(),
            bind_addr: default_bind_addr(),
            project_id: default_project_id(),
            api_key: String::new(),
            enforce_unique_active: true,
            persist: true,
        }
    }
}

impl HubSettings {
    /// Returns the full bind address (e.g., "0.0.0.0:8765").
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// WebSocket client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Timeout of a single request/response exchange (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    10
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    60
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportSettings {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RifaConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    /// Absent means offline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,

    #[serde(default)]
    pub raffle: RaffleSettings,

    #[serde(default)]
    pub timing: TimingSettings,

    #[serde(default)]
    pub admin: AdminSettings,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub transport: TransportSettings,

    /// SQLite file. Defaults to `rifa.db` in the platform data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

impl RifaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (rifa.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigWrite("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Config saved");
        Ok(())
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        if let Some(ref remote) = self.remote {
            if !remote.url.starts_with("ws://") && !remote.url.starts_with("wss://") {
                return Err(SyncError::InvalidUrl(format!(
                    "Sale store URL must start with ws:// or wss://, got: {}",
                    remote.url
                )));
            }
            url::Url::parse(&remote.url)?;

            if remote.project_id.is_empty() {
                return Err(SyncError::InvalidConfig("remote.project_id is required".into()));
            }
        }

        validate_price_cents(self.raffle.ticket_price_cents)
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;

        if self.raffle.turmas.is_empty() {
            return Err(SyncError::InvalidConfig("at least one turma is required".into()));
        }
        for (i, pool) in self.raffle.turmas.iter().enumerate() {
            if pool.code.trim().is_empty() {
                return Err(SyncError::InvalidConfig("turma code cannot be empty".into()));
            }
            if pool.last < pool.first {
                return Err(SyncError::InvalidConfig(format!(
                    "turma {} has an empty range {}..={}",
                    pool.code, pool.first, pool.last
                )));
            }
            if self.raffle.turmas[..i].iter().any(|p| p.code == pool.code) {
                return Err(SyncError::InvalidConfig(format!(
                    "turma {} is configured twice",
                    pool.code
                )));
            }
        }

        if self.timing.resync_interval_secs == 0
            || self.timing.refresh_interval_secs == 0
            || self.timing.cart_sweep_secs == 0
        {
            return Err(SyncError::InvalidConfig(
                "timer intervals must be greater than 0".into(),
            ));
        }
        if self.timing.cart_ttl_mins <= 0 || self.timing.cash_ttl_hours <= 0 {
            return Err(SyncError::InvalidConfig(
                "cart and cash reservation windows must be positive".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("RIFA_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        // Remote credentials. A URL alone is enough to create the section;
        // validation reports a missing project id.
        let url = std::env::var("RIFA_REMOTE_URL").ok();
        let project_id = std::env::var("RIFA_PROJECT_ID").ok();
        let api_key = std::env::var("RIFA_API_KEY").ok();

        if url.is_some() || self.remote.is_some() {
            let mut remote = self.remote.take().unwrap_or(RemoteConfig {
                url: String::new(),
                project_id: String::new(),
                api_key: String::new(),
            });
            if let Some(url) = url {
                debug!(url = %url, "Overriding sale store URL from environment");
                remote.url = url;
            }
            if let Some(project_id) = project_id {
                remote.project_id = project_id;
            }
            if let Some(api_key) = api_key {
                remote.api_key = api_key;
            }
            self.remote = Some(remote);
        }

        if let Ok(password) = std::env::var("RIFA_ADMIN_PASSWORD") {
            self.admin.password = password;
        }

        if let Ok(port) = std::env::var("RIFA_HUB_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                debug!(port = p, "Overriding hub port from environment");
                self.hub.port = p;
            } else {
                warn!(port = %port, "Ignoring invalid RIFA_HUB_PORT");
            }
        }

        if let Ok(path) = std::env::var("RIFA_DB_PATH") {
            self.db_path = Some(PathBuf::from(path));
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "rifa", "storefront")
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("rifa.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// True when no sale store is configured.
    pub fn is_offline(&self) -> bool {
        self.remote.is_none()
    }

    /// SQLite path: explicit setting, else the platform data dir, else the
    /// working directory.
    pub fn database_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| {
            Self::project_dirs()
                .map(|dirs| dirs.data_dir().join("rifa.db"))
                .unwrap_or_else(|| PathBuf::from("rifa.db"))
        })
    }

    pub fn turmas(&self) -> &[TurmaPool] {
        &self.raffle.turmas
    }
}
