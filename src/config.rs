// src/config.rs

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::core::models::ProbeKind;
use crate::core::scanner::port_scanner::PortRange;

const ENV_PREFIX: &str = "VANGUARD";

/// Service configuration. Every section falls back to its defaults, so an
/// empty source set yields a runnable configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub assessment: AssessmentConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub vulnerability_db: VulnerabilityDbConfig,
    pub port_scan: PortScanConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted `POST /check_domains` body.
    pub max_batch_size: usize,
    /// Domains of one batch assessed at the same time.
    pub batch_concurrency: usize,
    /// Key the rate limiter on the first `X-Forwarded-For` hop instead of the
    /// peer address. Only enable behind a proxy that sets the header.
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_batch_size: 50,
            batch_concurrency: 2,
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
    /// Appended to input without a dot, e.g. `example` -> `example.pt`.
    pub default_suffix: String,
    pub probe_timeout_secs: u64,
    /// Bound on one network step inside a probe: a TLS handshake, an SMTP
    /// exchange, a site request. The TLS probe may take two such steps.
    pub stage_timeout_ms: u64,
    pub worker_pool_size: usize,
    pub enabled_probes: Vec<ProbeKind>,
    pub user_agent: String,
}

impl AssessmentConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            default_suffix: "pt".to_string(),
            probe_timeout_secs: 10,
            stage_timeout_ms: 4000,
            worker_pool_size: 7,
            enabled_probes: ProbeKind::default_set(),
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// `max-age` advertised in `Cache-Control`.
    pub http_max_age_secs: u64,
    /// 0 disables the background sweep; expired entries are still evicted on access.
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300, http_max_age_secs: 3600, sweep_interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { window_secs: 60, max_requests: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VulnerabilityDbConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub results_per_page: u32,
    pub request_timeout_secs: u64,
    /// Time the correlation probe may spend on lookups before skipping the
    /// remaining technologies.
    pub lookup_budget_ms: u64,
}

impl VulnerabilityDbConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn lookup_budget(&self) -> Duration {
        Duration::from_millis(self.lookup_budget_ms)
    }
}

impl Default for VulnerabilityDbConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://services.nvd.nist.gov/rest/json/cves/2.0".to_string(),
            api_key: None,
            results_per_page: 10,
            request_timeout_secs: 5,
            lookup_budget_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortScanConfig {
    pub ports: String,
    pub connect_timeout_ms: u64,
    pub concurrency: usize,
}

impl Default for PortScanConfig {
    fn default() -> Self {
        Self { ports: "1-1024".to_string(), connect_timeout_ms: 500, concurrency: 64 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Also write to a log file in the per-user data directory.
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), file: false }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration source error: {0}")]
    Source(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Loads `config/default`, then `config/local`, then `VANGUARD__*`
    /// environment variables, later sources overriding earlier ones.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("assessment.enabled_probes"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.assessment.default_suffix.trim().trim_start_matches('.').is_empty() {
            return invalid("assessment.default_suffix must not be empty");
        }
        if self.assessment.probe_timeout_secs == 0 {
            return invalid("assessment.probe_timeout_secs must be > 0");
        }
        if self.assessment.worker_pool_size == 0 {
            return invalid("assessment.worker_pool_size must be > 0");
        }
        if self.assessment.enabled_probes.is_empty() {
            return invalid("assessment.enabled_probes must name at least one probe");
        }
        if self.rate_limit.window_secs == 0 || self.rate_limit.max_requests == 0 {
            return invalid("rate_limit.window_secs and rate_limit.max_requests must be > 0");
        }
        if self.server.max_batch_size == 0 || self.server.batch_concurrency == 0 {
            return invalid("server.max_batch_size and server.batch_concurrency must be > 0");
        }
        // Sub-steps end before the runner's own timeout fires.
        let probe_timeout = self.assessment.probe_timeout();
        if self.assessment.stage_timeout_ms == 0 || self.assessment.stage_timeout() * 2 >= probe_timeout {
            return invalid("assessment.stage_timeout_ms must be > 0 and under half of probe_timeout_secs");
        }
        if self.vulnerability_db.request_timeout_secs == 0
            || self.vulnerability_db.request_timeout_secs >= self.assessment.probe_timeout_secs
        {
            return invalid("vulnerability_db.request_timeout_secs must be > 0 and below probe_timeout_secs");
        }
        if self.vulnerability_db.lookup_budget_ms == 0 || self.vulnerability_db.lookup_budget() >= probe_timeout {
            return invalid("vulnerability_db.lookup_budget_ms must be > 0 and below probe_timeout_secs");
        }
        if self.port_scan.connect_timeout_ms == 0 || self.port_scan.concurrency == 0 {
            return invalid("port_scan.connect_timeout_ms and port_scan.concurrency must be > 0");
        }
        self.port_scan.ports.parse::<PortRange>().map_err(ConfigError::Invalid)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.assessment.enabled_probes.len(), 6);
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn rejects_zero_values_and_bad_ports() {
        let mut config = Config::default();
        config.assessment.probe_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.port_scan.ports = "80-20".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.assessment.default_suffix = " . ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn sub_step_timeouts_must_fit_inside_the_probe_timeout() {
        let mut config = Config::default();
        config.vulnerability_db.request_timeout_secs = config.assessment.probe_timeout_secs;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.vulnerability_db.lookup_budget_ms = config.assessment.probe_timeout_secs * 1000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.assessment.stage_timeout_ms = 5000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.assessment.probe_timeout_secs = 30;
        config.assessment.stage_timeout_ms = 5000;
        config.vulnerability_db.request_timeout_secs = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sources_fall_back_to_defaults() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [assessment]
                default_suffix = "com"
                enabled_probes = ["http_headers", "port_scan"]

                [rate_limit]
                max_requests = 3
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: Config = settings.try_deserialize().unwrap();

        assert_eq!(config.assessment.default_suffix, "com");
        assert_eq!(config.assessment.enabled_probes, vec![ProbeKind::HttpHeaders, ProbeKind::PortScan]);
        assert_eq!(config.assessment.probe_timeout_secs, 10);
        assert_eq!(config.rate_limit.max_requests, 3);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.server.port, 5000);
        assert!(!config.server.trust_forwarded_for);
        assert_eq!(config.vulnerability_db.lookup_budget(), Duration::from_millis(8000));
    }
}
