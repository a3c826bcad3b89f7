use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{GatesyncError, Result};
use crate::fees::TierSchedule;
use crate::gateway::GatewayId;
use crate::ledger::RefundFeePolicy;
use crate::utils::{get_env_with_prefix, parse_env, parse_flag};
use crate::window::{DEFAULT_LOOKBACK_DAYS, MAX_LOOKBACK_DAYS, MIN_LOOKBACK_DAYS};

/// Main configuration for a gatesync process
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub trigger_limit: TriggerLimitConfig,
    #[serde(default)]
    pub fees: FeesConfig,
    #[serde(default)]
    pub gateways: GatewaysConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

/// How runs talk to gateways.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Window used when a request has no valid explicit dates.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Per-request timeout.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Retries after the first attempt of a page fetch.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Manual trigger discipline per `gateway:kind`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TriggerLimitConfig {
    #[serde(default = "default_trigger_max")]
    pub max_triggers: u32,
    #[serde(default = "default_trigger_window_seconds")]
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FeesConfig {
    #[serde(default)]
    pub schedule: TierSchedule,
    #[serde(default)]
    pub refund_fee_policy: RefundFeePolicy,
}

/// Settings for one gateway integration.
///
/// The API key is never serialized and never shown by `Debug`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(skip)]
    pub api_key: Option<SecretString>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub sandbox: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GatewaysConfig {
    #[serde(default)]
    pub asaas: GatewayConfig,
    #[serde(default)]
    pub pagbank: GatewayConfig,
    #[serde(default)]
    pub mercado_pago: GatewayConfig,
    #[serde(default)]
    pub pagarme: GatewayConfig,
}

impl GatewaysConfig {
    pub fn get(&self, gateway: GatewayId) -> &GatewayConfig {
        match gateway {
            GatewayId::Asaas => &self.asaas,
            GatewayId::PagBank => &self.pagbank,
            GatewayId::MercadoPago => &self.mercado_pago,
            GatewayId::Pagarme => &self.pagarme,
        }
    }

    pub fn get_mut(&mut self, gateway: GatewayId) -> &mut GatewayConfig {
        match gateway {
            GatewayId::Asaas => &mut self.asaas,
            GatewayId::PagBank => &mut self.pagbank,
            GatewayId::MercadoPago => &mut self.mercado_pago,
            GatewayId::Pagarme => &mut self.pagarme,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            page_size: default_page_size(),
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for TriggerLimitConfig {
    fn default() -> Self {
        Self {
            max_triggers: default_trigger_max(),
            window_seconds: default_trigger_window_seconds(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_lookback_days() -> i64 {
    DEFAULT_LOOKBACK_DAYS
}

fn default_page_size() -> u32 {
    100
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_trigger_max() -> u32 {
    3
}

fn default_trigger_window_seconds() -> u64 {
    120
}

impl ServerConfig {
    pub fn addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl TriggerLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Builder for Config with environment variable support
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
    // Parsed in build() so a bad schedule is reported, not ignored.
    tier_schedule_json: Option<String>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            tier_schedule_json: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.config.sync.lookback_days = days;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.config.sync.page_size = page_size;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.sync.timeout_seconds = seconds;
        self
    }

    /// Retry settings for page fetches.
    pub fn with_retries(mut self, max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.config.sync.max_retries = max_retries;
        self.config.sync.base_delay_ms = base_delay_ms;
        self.config.sync.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_trigger_limit(mut self, max_triggers: u32, window_seconds: u64) -> Self {
        self.config.trigger_limit.max_triggers = max_triggers;
        self.config.trigger_limit.window_seconds = window_seconds;
        self
    }

    pub fn with_tier_schedule(mut self, schedule: TierSchedule) -> Self {
        self.config.fees.schedule = schedule;
        self.tier_schedule_json = None;
        self
    }

    pub fn with_refund_fee_policy(mut self, policy: RefundFeePolicy) -> Self {
        self.config.fees.refund_fee_policy = policy;
        self
    }

    pub fn with_gateway(mut self, gateway: GatewayId, settings: GatewayConfig) -> Self {
        *self.config.gateways.get_mut(gateway) = settings;
        self
    }

    pub fn with_gateway_enabled(mut self, gateway: GatewayId, enabled: bool) -> Self {
        self.config.gateways.get_mut(gateway).enabled = enabled;
        self
    }

    pub fn with_gateway_api_key(mut self, gateway: GatewayId, api_key: impl Into<String>) -> Self {
        self.config.gateways.get_mut(gateway).api_key = Some(SecretString::from(api_key.into()));
        self
    }

    pub fn with_gateway_base_url(mut self, gateway: GatewayId, base_url: impl Into<String>) -> Self {
        self.config.gateways.get_mut(gateway).base_url = Some(base_url.into());
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database.url = Some(url.into());
        self
    }

    /// Load configuration from environment variables with GATESYNC_ prefix
    pub fn from_env(mut self) -> Self {
        if let Some(host) = get_env_with_prefix("HOST") {
            self.config.server.host = host;
        }
        if let Some(port) = parse_env("PORT") {
            self.config.server.port = port;
        }
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = get_env_with_prefix("LOG_JSON").and_then(|v| parse_flag(&v)) {
            self.config.logging.json = json;
        }

        let sync = &mut self.config.sync;
        if let Some(days) = parse_env("SYNC_LOOKBACK_DAYS") {
            sync.lookback_days = days;
        }
        if let Some(size) = parse_env("SYNC_PAGE_SIZE") {
            sync.page_size = size;
        }
        if let Some(secs) = parse_env("SYNC_TIMEOUT_SECONDS") {
            sync.timeout_seconds = secs;
        }
        if let Some(retries) = parse_env("SYNC_MAX_RETRIES") {
            sync.max_retries = retries;
        }
        if let Some(ms) = parse_env("SYNC_BASE_DELAY_MS") {
            sync.base_delay_ms = ms;
        }
        if let Some(ms) = parse_env("SYNC_MAX_DELAY_MS") {
            sync.max_delay_ms = ms;
        }

        if let Some(max) = parse_env("TRIGGER_MAX") {
            self.config.trigger_limit.max_triggers = max;
        }
        if let Some(secs) = parse_env("TRIGGER_WINDOW_SECONDS") {
            self.config.trigger_limit.window_seconds = secs;
        }

        if let Some(json) = get_env_with_prefix("TIER_SCHEDULE") {
            self.tier_schedule_json = Some(json);
        }
        if let Some(policy) = parse_env("REFUND_FEE_POLICY") {
            self.config.fees.refund_fee_policy = policy;
        }

        if let Some(url) = get_env_with_prefix("DATABASE_URL") {
            self.config.database.url = Some(url);
        }

        for gateway in GatewayId::ALL {
            let prefix = gateway.env_prefix();
            let settings = self.config.gateways.get_mut(gateway);
            if let Some(enabled) =
                get_env_with_prefix(&format!("{}_ENABLED", prefix)).and_then(|v| parse_flag(&v))
            {
                settings.enabled = enabled;
            }
            if let Some(key) = get_env_with_prefix(&format!("{}_API_KEY", prefix)) {
                settings.api_key = Some(SecretString::from(key));
            }
            if let Some(url) = get_env_with_prefix(&format!("{}_BASE_URL", prefix)) {
                settings.base_url = Some(url);
            }
            if let Some(sandbox) =
                get_env_with_prefix(&format!("{}_SANDBOX", prefix)).and_then(|v| parse_flag(&v))
            {
                settings.sandbox = sandbox;
            }
        }

        self
    }

    /// Build the configuration, validating all settings
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration is invalid:
    /// - Invalid log level
    /// - Lookback outside 1..=365 days
    /// - Zero page size, timeout or trigger limit
    /// - A tier schedule that does not parse or validate
    pub fn build(mut self) -> Result<Config> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.config.logging.level.to_lowercase().as_str()) {
            return Err(GatesyncError::bad_request(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.config.logging.level,
                valid_log_levels.join(", ")
            )));
        }

        let sync = &self.config.sync;
        if !(MIN_LOOKBACK_DAYS..=MAX_LOOKBACK_DAYS).contains(&sync.lookback_days) {
            return Err(GatesyncError::bad_request(format!(
                "Lookback must be between {} and {} days, got {}",
                MIN_LOOKBACK_DAYS, MAX_LOOKBACK_DAYS, sync.lookback_days
            )));
        }
        if sync.page_size == 0 {
            return Err(GatesyncError::bad_request("Page size must be greater than 0"));
        }
        if sync.timeout_seconds == 0 {
            return Err(GatesyncError::bad_request(
                "Request timeout must be greater than 0",
            ));
        }
        if sync.max_delay_ms < sync.base_delay_ms {
            return Err(GatesyncError::bad_request(
                "Maximum backoff must not be smaller than the base delay",
            ));
        }

        let limit = &self.config.trigger_limit;
        if limit.max_triggers == 0 || limit.window_seconds == 0 {
            return Err(GatesyncError::bad_request(
                "Trigger limit and window must be greater than 0",
            ));
        }

        if let Some(json) = self.tier_schedule_json.take() {
            self.config.fees.schedule = TierSchedule::from_json(&json)?;
        }

        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.sync.lookback_days, 30);
        assert_eq!(config.sync.page_size, 100);
        assert_eq!(config.sync.timeout_seconds, 10);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.trigger_limit.max_triggers, 3);
        assert_eq!(config.trigger_limit.window_seconds, 120);
        assert_eq!(config.fees.schedule.tiers().len(), 4);
        assert!(GatewayId::ALL.iter().all(|g| !config.gateways.get(*g).enabled));
    }

    #[test]
    fn test_gateway_setters() {
        let config = ConfigBuilder::new()
            .with_gateway_enabled(GatewayId::MercadoPago, true)
            .with_gateway_api_key(GatewayId::MercadoPago, "APP_USR-123")
            .build()
            .unwrap();
        let mp = config.gateways.get(GatewayId::MercadoPago);
        assert!(mp.enabled);
        assert_eq!(
            mp.api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("APP_USR-123".to_string())
        );
        assert!(!format!("{:?}", config).contains("APP_USR-123"));
    }

    #[test]
    fn test_build_rejects_invalid_values() {
        assert!(ConfigBuilder::new().with_log_level("loud").build().is_err());
        assert!(ConfigBuilder::new().with_lookback_days(0).build().is_err());
        assert!(ConfigBuilder::new().with_lookback_days(366).build().is_err());
        assert!(ConfigBuilder::new().with_page_size(0).build().is_err());
        assert!(ConfigBuilder::new().with_trigger_limit(0, 120).build().is_err());
        assert!(ConfigBuilder::new().with_retries(3, 1000, 10).build().is_err());
    }

    #[test]
    fn test_from_env_reads_gateway_and_schedule() {
        unsafe {
            std::env::set_var("GATESYNC_PAGARME_ENABLED", "yes");
            std::env::set_var("GATESYNC_PAGARME_API_KEY", "sk_test_env");
            std::env::set_var("GATESYNC_PAGARME_SANDBOX", "on");
            std::env::set_var(
                "GATESYNC_TIER_SCHEDULE",
                r#"[{"tier_number":1,"gmv_min":"0","gmv_max":"1000","fee_percent":"2.5"},
                    {"tier_number":2,"gmv_min":"1000","gmv_max":null,"fee_percent":"1.5"}]"#,
            );
        }

        let config = ConfigBuilder::new().from_env().build().unwrap();

        unsafe {
            std::env::remove_var("GATESYNC_PAGARME_ENABLED");
            std::env::remove_var("GATESYNC_PAGARME_API_KEY");
            std::env::remove_var("GATESYNC_PAGARME_SANDBOX");
            std::env::remove_var("GATESYNC_TIER_SCHEDULE");
        }

        let pagarme = config.gateways.get(GatewayId::Pagarme);
        assert!(pagarme.enabled);
        assert!(pagarme.sandbox);
        assert!(pagarme.api_key.is_some());
        assert_eq!(config.fees.schedule.tiers().len(), 2);
    }

    #[test]
    fn test_bad_schedule_fails_build() {
        let mut builder = ConfigBuilder::new();
        builder.tier_schedule_json = Some("[]".into());
        assert!(matches!(
            builder.build(),
            Err(GatesyncError::InvalidTierSchedule(_))
        ));
    }
}
