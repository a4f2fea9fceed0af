//! Snowflake metadata and data-operations MCP server.
//!
//! Exposes catalog harvesting, lineage analysis, and gated query execution
//! against Snowflake as a set of tools over a JSON-RPC 2.0 stdio
//! transport. The module layout mirrors the component table: each C-number
//! in module doc comments below refers to its counterpart there.

use std::path::PathBuf;
use std::sync::Arc;

pub mod backend;
pub mod catalog;
pub mod circuit_breaker;
pub mod config;
pub mod executor;
pub mod health;
pub mod lineage;
pub mod profile;
pub mod query_service;
pub mod resources;
pub mod rpc;
pub mod safety;
pub mod tools;
pub mod utils;

pub use config::Config;
pub use utils::{ApiError, ApiResult};

use backend::SnowflakeBackend;
use catalog::CatalogBuilder;
use circuit_breaker::CircuitBreaker;
use executor::rest::RestExecutor;
use health::HealthMonitor;
use lineage::LineageEngine;
use profile::ProfileValidator;
use query_service::QueryService;
use resources::ResourceSupervisor;
use tools::ToolRegistry;
use utils::clock::{Clock, SystemClock};

/// Application shared state. Rust's type system is the DI container: every
/// component is constructed once in `AppState::init` and handed to the
/// Tool Registry as `Arc`s for cheap cloning across concurrent tool calls.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tools: Arc<ToolRegistry>,
    pub health_monitor: Arc<HealthMonitor>,
}

impl AppState {
    /// Wires every component per the static dependency order spec §2
    /// implies: C1 (executor) → C2 (breaker) → C4/C5/C6 (validators and
    /// supervisors) → C8/C9/C10 (services) → C11 (registry).
    pub fn init(config: Config) -> ApiResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let profile_name = config.profile.name.clone();

        let profile_validator = Arc::new(ProfileValidator::new(
            PathBuf::from(&config.profile.credentials_path),
            config.health.cache_ttl_secs,
            clock.clone(),
        ));

        let profile = profile_validator.load_profile(&profile_name).unwrap_or_else(|| profile::Profile {
            name: profile_name.clone(),
            account: String::new(),
            user: String::new(),
            auth_kind: profile::AuthKind::Password,
            private_key_path: None,
            warehouse: None,
            database: None,
            schema: None,
            role: None,
        });
        let private_key_pem = profile
            .private_key_path
            .as_deref()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .unwrap_or_default();

        let resolved_warehouse = config.profile.warehouse.clone().or_else(|| profile.warehouse.clone());
        let resolved_database = config.profile.database.clone().or_else(|| profile.database.clone());
        let resolved_schema = config.profile.schema.clone().or_else(|| profile.schema.clone());
        let resolved_role = config.profile.role.clone().or_else(|| profile.role.clone());

        let executor: Arc<dyn executor::SnowflakeExecutor> = Arc::new(
            RestExecutor::new(profile.account.clone(), profile.user.clone(), private_key_pem, profile_name.clone()).with_defaults(
                resolved_warehouse.clone(),
                resolved_database.clone(),
                resolved_schema,
                resolved_role.clone(),
            ),
        );
        let breaker = Arc::new(CircuitBreaker::new(
            executor.backend_key().to_string(),
            config.circuit_breaker.failure_threshold,
            config.circuit_breaker.recovery_timeout_secs,
            clock.clone(),
        ));
        let backend = Arc::new(SnowflakeBackend::new(executor, breaker));

        let resource_supervisor = Arc::new(
            ResourceSupervisor::new(
                profile_validator.clone(),
                PathBuf::from(&config.catalog.output_dir),
                config.resources.cortex_enabled,
                config.resources.cache_ttl_secs,
                clock.clone(),
            )
            .with_profile_name(profile_name.clone()),
        );

        let health_monitor = Arc::new(HealthMonitor::new(
            profile_name.clone(),
            profile_validator.clone(),
            resource_supervisor.clone(),
            Some(backend.clone()),
            config.health.cache_ttl_secs,
            clock.clone(),
        ));

        let query_service = Arc::new(QueryService::new((*backend).clone()));
        let catalog_builder = Arc::new(CatalogBuilder::new(
            (*backend).clone(),
            config.catalog.max_concurrency,
            chrono::Duration::days(config.catalog.full_refresh_threshold_days as i64),
            chrono::Duration::hours(config.catalog.account_usage_safety_margin_hours as i64),
            clock.clone(),
        ));
        let lineage_engine = Arc::new(LineageEngine::new());

        let tools = Arc::new(ToolRegistry {
            query_service,
            catalog_builder,
            lineage_engine,
            resource_supervisor,
            health_monitor: health_monitor.clone(),
            profile_validator,
            backend,
            profile_name,
            account: profile.account,
            warehouse: resolved_warehouse,
            database: resolved_database,
            role: resolved_role,
            default_catalog_dir: PathBuf::from(&config.catalog.output_dir),
        });

        Ok(Self { config: Arc::new(config), tools, health_monitor })
    }
}
