use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_MAX_DOWNLOADS: i32 = 5;
const DEFAULT_DOWNLOAD_VALIDITY_DAYS: i64 = 30;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";
const DEV_DEFAULT_GATEWAY_SECRET: &str = "development_gateway_checksum_secret_do_not_ship";

/// Payment gateway configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Provider tag recorded on every transaction (e.g. "paytm", "phonepe")
    #[serde(default = "default_gateway_provider")]
    pub provider: String,

    /// Merchant identifier issued by the gateway
    #[serde(default)]
    pub merchant_id: String,

    /// Shared secret used to sign requests and verify callbacks
    #[validate(length(min = 16))]
    #[serde(default)]
    pub merchant_secret: String,

    /// Gateway API base URL
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// Callback URL the gateway posts payment results to
    #[serde(default)]
    pub callback_url: String,

    /// Bound on outbound gateway calls (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: default_gateway_provider(),
            merchant_id: String::new(),
            merchant_secret: String::new(),
            base_url: default_gateway_base_url(),
            callback_url: String::new(),
            request_timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

/// Download entitlement configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DownloadConfig {
    /// Downloads allowed per purchase
    #[validate(range(min = 1))]
    #[serde(default = "default_max_downloads")]
    pub max_downloads: i32,

    /// Days a grant stays redeemable after purchase
    #[validate(range(min = 1))]
    #[serde(default = "default_download_validity_days")]
    pub validity_days: i64,

    /// Base URL download links are built against
    #[serde(default = "default_download_base_url")]
    pub base_url: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_downloads: default_max_downloads(),
            validity_days: default_download_validity_days(),
            base_url: default_download_base_url(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key shared with the auth issuer
    #[validate(length(min = 32))]
    #[serde(default)]
    pub jwt_secret: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Payment gateway settings
    #[validate]
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Download entitlement settings
    #[validate]
    #[serde(default)]
    pub downloads: DownloadConfig,
}

impl AppConfig {
    /// Minimal constructor used by tests and tooling.
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            gateway: GatewayConfig::default(),
            downloads: DownloadConfig::default(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

fn default_gateway_provider() -> String {
    "paytm".to_string()
}

fn default_gateway_base_url() -> String {
    "https://securegw-stage.gateway.test".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_max_downloads() -> i32 {
    DEFAULT_MAX_DOWNLOADS
}

fn default_download_validity_days() -> i64 {
    DEFAULT_DOWNLOAD_VALIDITY_DAYS
}

fn default_download_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_db_acquire_timeout_secs() -> u64 {
    8
}

/// Loads configuration from `config/default`, an environment-specific file,
/// and `APP__`-prefixed environment variables, in increasing precedence.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .set_default("environment", environment.clone())?
        .set_default("host", "0.0.0.0")?
        .set_default("database_url", "sqlite://bookvault.db?mode=rwc")?;

    let default_path = Path::new(CONFIG_DIR).join("default");
    let env_path = Path::new(CONFIG_DIR).join(&environment);
    builder = builder
        .add_source(File::with_name(&default_path.to_string_lossy()).required(false))
        .add_source(File::with_name(&env_path.to_string_lossy()).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;

    // Development fallbacks so a bare checkout can boot; production must
    // provide real secrets or fail validation below.
    if cfg.is_development() {
        if cfg.jwt_secret.is_empty() {
            cfg.jwt_secret = DEV_DEFAULT_JWT_SECRET.to_string();
        }
        if cfg.gateway.merchant_secret.is_empty() {
            cfg.gateway.merchant_secret = DEV_DEFAULT_GATEWAY_SECRET.to_string();
        }
    }

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    info!(
        environment = %cfg.environment,
        port = cfg.port,
        gateway = %cfg.gateway.provider,
        "Configuration loaded"
    );

    Ok(cfg)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bookvault_api={level},tower_http=warn")));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}
