//! Configuration loading: defaults -> optional TOML file -> recognized
//! environment variables -> CLI flags (spec §6 "Recognized configuration
//! options", expanded in SPEC_FULL.md §10.2).
//!
//! Layering order and the human-friendly duration parsing follow the
//! donor's `Config::load` (`apply_env_overrides` / `apply_cli_overrides`
//! / `parse_duration_to_secs`), generalized from HTTP server settings to
//! Snowflake profile/catalog/lineage/health/circuit-breaker settings.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub profile: ProfileConfig,
    pub catalog: CatalogConfig,
    pub lineage: LineageConfig,
    pub health: HealthConfig,
    pub resources: ResourceConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub name: String,
    pub credentials_path: String,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub role: Option<String>,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            credentials_path: "credentials.toml".to_string(),
            warehouse: None,
            database: None,
            schema: None,
            role: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub output_dir: String,
    pub max_concurrency: usize,
    pub full_refresh_threshold_days: i64,
    pub account_usage_safety_margin_hours: i64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            output_dir: "./catalog".to_string(),
            max_concurrency: 4,
            full_refresh_threshold_days: 7,
            account_usage_safety_margin_hours: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LineageConfig {
    pub cache_dir: Option<String>,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self { cache_dir: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub cache_ttl_secs: u64,
    pub cortex_enabled: bool,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 60, cortex_enabled: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,snowflake_mcp=debug".to_string(), file: None }
    }
}

/// Command line arguments for configuration overrides.
#[derive(Parser, Debug, Clone)]
#[command(name = "snowflake-mcp")]
#[command(version, about = "Snowflake metadata and data-operations MCP server")]
pub struct CommandLineArgs {
    /// Path to a TOML configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Credential profile name (overrides config file / SNOWFLAKE_PROFILE).
    #[arg(long, value_name = "NAME")]
    pub profile: Option<String>,

    /// Catalog output directory (overrides config file / CATALOG_DIR).
    #[arg(long, value_name = "PATH")]
    pub catalog_dir: Option<String>,

    /// Logging level (overrides config file / env, e.g. "info,snowflake_mcp=debug").
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with CLI, environment variable, and file support.
    ///
    /// Loading order (priority from lowest to highest):
    /// 1. Default values
    /// 2. Configuration file (TOML)
    /// 3. Recognized environment variables (spec §6 table)
    /// 4. Command line arguments
    pub fn load() -> Result<Self, anyhow::Error> {
        let _ = dotenvy::dotenv();
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(path) = config_path {
            Self::from_toml(&path)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply overrides from the recognized environment variables (spec §6).
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SNOWFLAKE_PROFILE") {
            self.profile.name = v;
        }
        if let Ok(v) = std::env::var("SNOWFLAKE_CREDENTIALS_PATH") {
            self.profile.credentials_path = v;
        }
        if let Ok(v) = std::env::var("SNOWFLAKE_WAREHOUSE") {
            self.profile.warehouse = Some(v);
        }
        if let Ok(v) = std::env::var("SNOWFLAKE_DATABASE") {
            self.profile.database = Some(v);
        }
        if let Ok(v) = std::env::var("SNOWFLAKE_SCHEMA") {
            self.profile.schema = Some(v);
        }
        if let Ok(v) = std::env::var("SNOWFLAKE_ROLE") {
            self.profile.role = Some(v);
        }
        if let Ok(v) = std::env::var("CATALOG_DIR") {
            self.catalog.output_dir = v;
        }
        if let Ok(v) = std::env::var("LINEAGE_DIR") {
            self.lineage.cache_dir = Some(v);
        }
        if let Ok(v) = std::env::var("HEALTH_CACHE_TTL") {
            match parse_duration_to_secs(&v) {
                Ok(secs) => self.health.cache_ttl_secs = secs,
                Err(e) => tracing::warn!("invalid HEALTH_CACHE_TTL '{}': {}", v, e),
            }
        }
        if let Ok(v) = std::env::var("RESOURCE_CACHE_TTL") {
            match parse_duration_to_secs(&v) {
                Ok(secs) => self.resources.cache_ttl_secs = secs,
                Err(e) => tracing::warn!("invalid RESOURCE_CACHE_TTL '{}': {}", v, e),
            }
        }
        if let Ok(v) = std::env::var("CORTEX_SEARCH_ENABLED")
            && let Ok(b) = v.parse()
        {
            self.resources.cortex_enabled = b;
        }
        if let Ok(v) = std::env::var("CIRCUIT_FAILURE_THRESHOLD")
            && let Ok(n) = v.parse()
        {
            self.circuit_breaker.failure_threshold = n;
        }
        if let Ok(v) = std::env::var("CIRCUIT_RECOVERY_TIMEOUT") {
            match parse_duration_to_secs(&v) {
                Ok(secs) => self.circuit_breaker.recovery_timeout_secs = secs,
                Err(e) => tracing::warn!("invalid CIRCUIT_RECOVERY_TIMEOUT '{}': {}", v, e),
            }
        }
        if let Ok(v) = std::env::var("MAX_CONCURRENCY")
            && let Ok(n) = v.parse()
        {
            self.catalog.max_concurrency = n;
        }
        if let Ok(v) = std::env::var("ACCOUNT_USAGE_SAFETY_MARGIN")
            && let Ok(n) = v.parse()
        {
            self.catalog.account_usage_safety_margin_hours = n;
        }
        if let Ok(v) = std::env::var("FULL_REFRESH_THRESHOLD")
            && let Ok(n) = v.parse()
        {
            self.catalog.full_refresh_threshold_days = n;
        }
        if let Ok(v) = std::env::var("RUST_LOG") {
            self.logging.level = v;
        }
    }

    /// Apply command line argument overrides (highest priority).
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(v) = &args.profile {
            self.profile.name = v.clone();
        }
        if let Some(v) = &args.catalog_dir {
            self.catalog.output_dir = v.clone();
        }
        if let Some(v) = &args.log_level {
            self.logging.level = v.clone();
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.profile.name.trim().is_empty() {
            anyhow::bail!("profile.name cannot be empty");
        }
        if self.catalog.max_concurrency == 0 {
            anyhow::bail!("catalog.max_concurrency must be >= 1");
        }
        if self.catalog.output_dir.trim().is_empty() {
            anyhow::bail!("catalog.output_dir cannot be empty");
        }
        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths = ["snowflake-mcp.toml", "./snowflake-mcp.toml", "conf/snowflake-mcp.toml"];
        possible_paths.iter().find(|p| Path::new(p).exists()).map(|p| p.to_string())
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {}", path, e))?;
        Ok(config)
    }
}

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }
    let s = input.trim().to_lowercase();
    let split = s.chars().take_while(|c| c.is_ascii_digit()).count();
    let (num_str, unit) = s.split_at(split);
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        "d" | "day" | "days" => Ok(n * 60 * 60 * 24),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '5m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        assert_eq!(config.health.cache_ttl_secs, 30);
        assert_eq!(config.resources.cache_ttl_secs, 60);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.recovery_timeout_secs, 30);
        assert_eq!(config.catalog.max_concurrency, 4);
        assert_eq!(config.catalog.account_usage_safety_margin_hours, 3);
        assert_eq!(config.catalog.full_refresh_threshold_days, 7);
    }

    #[test]
    fn duration_parsing_accepts_units() {
        assert_eq!(parse_duration_to_secs("30").unwrap(), 30);
        assert_eq!(parse_duration_to_secs("5m").unwrap(), 300);
        assert_eq!(parse_duration_to_secs("1h").unwrap(), 3600);
        assert!(parse_duration_to_secs("bogus").is_err());
    }
}
