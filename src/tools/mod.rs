//! Tool Registry (C11): static tool-name → handler dispatch, consulting
//! the Resource Supervisor before doing work and translating every error
//! through the taxonomy into the wire envelope (spec §4.11).

use crate::backend::SnowflakeBackend;
use crate::catalog::{store, BuildRequest, CatalogBuilder, ObjectKind};
use crate::executor::ExecContext;
use crate::health::HealthMonitor;
use crate::lineage::query::{query_lineage, render_scoped_dot, scoped_subgraph, Direction, OutputFormat};
use crate::lineage::LineageEngine;
use crate::profile::ProfileValidator;
use crate::query_service::{ContextOverrides, QueryService};
use crate::resources::ResourceSupervisor;
use crate::utils::{ApiError, ApiResult};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

pub struct ToolRegistry {
    pub query_service: Arc<QueryService>,
    pub catalog_builder: Arc<CatalogBuilder>,
    pub lineage_engine: Arc<LineageEngine>,
    pub resource_supervisor: Arc<ResourceSupervisor>,
    pub health_monitor: Arc<HealthMonitor>,
    pub profile_validator: Arc<ProfileValidator>,
    pub backend: Arc<SnowflakeBackend>,
    pub profile_name: String,
    pub account: String,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub role: Option<String>,
    pub default_catalog_dir: PathBuf,
}

/// Required resource per tool, consulted before the handler runs (spec
/// §4.11 step 2). `execute_query`/`preview_table`/`test_connection` go
/// straight through C2's circuit breaker instead — they have no entry in
/// the Resource Supervisor's DAG (spec §4.6 names only catalog, lineage,
/// dependency_graph, cortex_search).
fn resource_gate_for(tool: &str) -> Option<&'static str> {
    match tool {
        "build_catalog" | "get_catalog_summary" => Some("catalog"),
        "query_lineage" | "build_dependency_graph" => Some("lineage"),
        _ => None,
    }
}

impl ToolRegistry {
    pub async fn dispatch(&self, tool: &str, args: Value) -> ApiResult<Value> {
        if let Some(resource) = resource_gate_for(tool) {
            let status = self.resource_supervisor.get_resource_status(Some(resource));
            let entry = &status[resource];
            if !entry.available {
                return Err(ApiError::resource_unavailable(
                    format!("resource '{resource}' is not available for tool '{tool}'"),
                    entry.blocking_issues.clone(),
                    entry.blocking_issues.clone(),
                ));
            }
        }

        match tool {
            "execute_query" => self.execute_query(args).await,
            "preview_table" => self.preview_table(args).await,
            "build_catalog" => self.build_catalog(args).await,
            "get_catalog_summary" => self.get_catalog_summary(args).await,
            "query_lineage" => self.query_lineage(args).await,
            "build_dependency_graph" => self.build_dependency_graph(args).await,
            "test_connection" => self.test_connection().await,
            "health_check" => self.health_check().await,
            "check_profile_config" => self.check_profile_config().await,
            "get_resource_status" => self.get_resource_status(args).await,
            "check_resource_dependencies" => self.check_resource_dependencies(args).await,
            other => Err(ApiError::invalid_arguments(format!("unknown tool '{other}'"), "tool")),
        }
    }

    async fn execute_query(&self, args: Value) -> ApiResult<Value> {
        #[derive(Deserialize)]
        struct Args {
            statement: String,
            warehouse: Option<String>,
            database: Option<String>,
            schema: Option<String>,
            role: Option<String>,
            timeout_seconds: Option<u64>,
        }
        let args: Args = parse_args(args)?;
        let overrides = ContextOverrides { warehouse: args.warehouse, database: args.database, schema: args.schema, role: args.role };
        let result = self.query_service.execute_query(&args.statement, overrides, args.timeout_seconds).await?;
        Ok(serde_json::to_value(result).expect("QueryResult always serializes"))
    }

    async fn preview_table(&self, args: Value) -> ApiResult<Value> {
        #[derive(Deserialize)]
        struct Args {
            table_name: String,
            limit: Option<u32>,
            warehouse: Option<String>,
            database: Option<String>,
            schema: Option<String>,
            role: Option<String>,
        }
        let args: Args = parse_args(args)?;
        let overrides = ContextOverrides { warehouse: args.warehouse, database: args.database, schema: args.schema, role: args.role };
        let result = self.query_service.preview_table(&args.table_name, args.limit, overrides).await?;
        Ok(serde_json::to_value(result).expect("QueryResult always serializes"))
    }

    async fn build_catalog(&self, args: Value) -> ApiResult<Value> {
        #[derive(Deserialize, Default)]
        struct Args {
            output_dir: Option<PathBuf>,
            database: Option<String>,
            include_ddl: Option<bool>,
            force_full: Option<bool>,
        }
        let args: Args = parse_args_or_default(args)?;
        let request = BuildRequest {
            output_dir: args.output_dir.unwrap_or_else(|| self.default_catalog_dir.clone()),
            database: args.database,
            force_full: args.force_full.unwrap_or(false),
            include_ddl: args.include_ddl.unwrap_or(false),
        };
        let result = self.catalog_builder.build(request).await?;
        Ok(serde_json::to_value(result).expect("IncrementalBuildResult always serializes"))
    }

    async fn get_catalog_summary(&self, args: Value) -> ApiResult<Value> {
        #[derive(Deserialize, Default)]
        struct Args {
            catalog_dir: Option<PathBuf>,
        }
        let args: Args = parse_args_or_default(args)?;
        let catalog_dir = args.catalog_dir.unwrap_or_else(|| self.default_catalog_dir.clone());
        let metadata = store::read_metadata(&catalog_dir)
            .ok_or_else(|| ApiError::resource_unavailable("no catalog has been built yet", vec!["catalog".to_string()], vec![]))?;

        let mut counts = serde_json::Map::new();
        let mut column_count = 0usize;
        for kind in ObjectKind::ALL {
            let entries: Vec<crate::catalog::CatalogEntry> = store::read_jsonl(&catalog_dir, kind)?;
            column_count += entries.iter().map(|e| e.columns.len()).sum::<usize>();
            counts.insert(kind.file_stem().to_string(), json!(entries.len()));
        }

        Ok(json!({
            "databases": metadata.databases,
            "schemas": metadata.schema_count,
            "tables": metadata.table_count,
            "views": counts.get("views").cloned().unwrap_or(json!(0)),
            "columns": column_count,
            "last_build": metadata.last_build,
            "last_full_refresh": metadata.last_full_refresh,
            "by_kind": counts,
        }))
    }

    async fn query_lineage(&self, args: Value) -> ApiResult<Value> {
        #[derive(Deserialize)]
        struct Args {
            object_name: String,
            direction: Option<String>,
            depth: Option<usize>,
            format: Option<String>,
            catalog_dir: Option<PathBuf>,
        }
        let args: Args = parse_args(args)?;
        let catalog_dir = args.catalog_dir.unwrap_or_else(|| self.default_catalog_dir.clone());
        let direction = match args.direction.as_deref() {
            Some("upstream") | None => Direction::Upstream,
            Some("downstream") => Direction::Downstream,
            Some("both") => Direction::Both,
            Some(other) => return Err(ApiError::invalid_arguments(format!("unknown direction '{other}'"), "direction")),
        };
        let depth = match args.depth {
            None => 3,
            Some(d) if d == 0 || d > 10 => {
                return Err(ApiError::invalid_arguments("depth must be in 1..=10", "depth"));
            }
            Some(d) => d,
        };
        let format = match args.format.as_deref() {
            Some("text") => OutputFormat::Text,
            Some("json") | None => OutputFormat::Json,
            Some(other) => return Err(ApiError::invalid_arguments(format!("unknown format '{other}'"), "format")),
        };

        let graph = self.lineage_engine.get_or_build(&catalog_dir)?;
        let result = query_lineage(&graph, &args.object_name, direction, depth, format)?;
        Ok(serde_json::to_value(result).expect("LineageQueryResult always serializes"))
    }

    async fn build_dependency_graph(&self, args: Value) -> ApiResult<Value> {
        #[derive(Deserialize, Default)]
        struct Args {
            database: Option<String>,
            schema: Option<String>,
            format: Option<String>,
            catalog_dir: Option<PathBuf>,
        }
        let args: Args = parse_args_or_default(args)?;
        let catalog_dir = args.catalog_dir.unwrap_or_else(|| self.default_catalog_dir.clone());
        let scope = match (&args.database, &args.schema) {
            (Some(db), Some(schema)) => Some(format!("{db}.{schema}")),
            (Some(db), None) => Some(db.clone()),
            _ => None,
        };

        let graph = self.lineage_engine.get_or_build(&catalog_dir)?;
        match args.format.as_deref() {
            Some("dot") => Ok(json!({ "format": "dot", "graph": render_scoped_dot(&graph, scope.as_deref()) })),
            Some("json") | None => {
                let (nodes, edges) = scoped_subgraph(&graph, scope.as_deref());
                Ok(json!({ "format": "json", "nodes": nodes, "edges": edges }))
            }
            Some(other) => Err(ApiError::invalid_arguments(format!("unknown format '{other}'"), "format")),
        }
    }

    /// Full C7 (n/a here) → C2 → C1 round trip through `SELECT
    /// CURRENT_VERSION()`, per SPEC_FULL §11's detailed contract.
    async fn test_connection(&self) -> ApiResult<Value> {
        let started = Instant::now();
        let rows = self.backend.run("SELECT CURRENT_VERSION()", &ExecContext::default()).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let version = rows.rows.first().and_then(|r| r.first()).map(|v| v.to_json()).unwrap_or(Value::Null);

        Ok(json!({
            "status": "ok",
            "profile": self.profile_name,
            "account": self.account,
            "warehouse": self.warehouse,
            "database": self.database,
            "role": self.role,
            "snowflake_version": version,
            "response_time_ms": elapsed_ms,
        }))
    }

    async fn health_check(&self) -> ApiResult<Value> {
        let report = self.health_monitor.health_check().await;
        Ok(serde_json::to_value(report).expect("HealthReport always serializes"))
    }

    async fn check_profile_config(&self) -> ApiResult<Value> {
        let validation = self.profile_validator.validate(&self.profile_name);
        Ok(serde_json::to_value(validation).expect("ProfileValidation always serializes"))
    }

    async fn get_resource_status(&self, args: Value) -> ApiResult<Value> {
        #[derive(Deserialize, Default)]
        struct Args {
            resource_name: Option<String>,
        }
        let args: Args = parse_args_or_default(args)?;
        let status = self.resource_supervisor.get_resource_status(args.resource_name.as_deref());
        Ok(serde_json::to_value(status).expect("resource status always serializes"))
    }

    async fn check_resource_dependencies(&self, args: Value) -> ApiResult<Value> {
        #[derive(Deserialize, Default)]
        struct Args {
            resource_name: Option<String>,
        }
        let args: Args = parse_args_or_default(args)?;
        let deps = self.resource_supervisor.check_resource_dependencies(args.resource_name.as_deref());
        Ok(serde_json::to_value(deps).expect("dependency health always serializes"))
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(value: Value) -> ApiResult<T> {
    serde_json::from_value(value).map_err(|e| ApiError::invalid_arguments(format!("argument validation failed: {e}"), path_from_serde_error(&e)))
}

fn parse_args_or_default<T: for<'de> Deserialize<'de> + Default>(value: Value) -> ApiResult<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    parse_args(value)
}

fn path_from_serde_error(e: &serde_json::Error) -> String {
    // serde_json's Display includes "at line N column N"; the field name,
    // when available, is the first token before " at".
    let msg = e.to_string();
    msg.split(" at ").next().unwrap_or(&msg).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::executor::mock::MockSnowflakeExecutor;
    use crate::executor::{Rows, RowValue};
    use crate::utils::clock::FixedClock;
    use crate::utils::clock::Clock;
    use chrono::Utc;

    fn registry_with(executor: Arc<MockSnowflakeExecutor>) -> (ToolRegistry, tempfile::TempDir, tempfile::NamedTempFile) {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let breaker = Arc::new(CircuitBreaker::new("test", 5, 30, clock.clone()));
        let backend = Arc::new(SnowflakeBackend::new(executor, breaker));
        let catalog_dir = tempfile::tempdir().unwrap();

        use std::io::Write;
        let mut profile_file = tempfile::NamedTempFile::new().unwrap();
        write!(profile_file, "[default]\nname = \"default\"\naccount = \"acme\"\nuser = \"bob\"\nauth_kind = \"password\"\n").unwrap();
        let profile_validator = Arc::new(ProfileValidator::new(profile_file.path().to_path_buf(), 30, clock.clone()));
        let resource_supervisor =
            Arc::new(ResourceSupervisor::new(profile_validator.clone(), catalog_dir.path().to_path_buf(), false, 60, clock.clone()));
        resource_supervisor.record_connection_result(true);
        let health_monitor =
            Arc::new(HealthMonitor::new("default", profile_validator.clone(), resource_supervisor.clone(), Some(backend.clone()), 30, clock.clone()));
        let query_service = Arc::new(QueryService::new((*backend).clone()));
        let catalog_builder =
            Arc::new(CatalogBuilder::new((*backend).clone(), 2, chrono::Duration::days(7), chrono::Duration::hours(3), clock.clone()));
        let lineage_engine = Arc::new(LineageEngine::new());

        let registry = ToolRegistry {
            query_service,
            catalog_builder,
            lineage_engine,
            resource_supervisor,
            health_monitor,
            profile_validator,
            backend,
            profile_name: "default".to_string(),
            account: "acme".to_string(),
            warehouse: None,
            database: None,
            role: None,
            default_catalog_dir: catalog_dir.path().to_path_buf(),
        };
        (registry, catalog_dir, profile_file)
    }

    #[tokio::test]
    async fn execute_query_round_trips_through_dispatch() {
        let executor = Arc::new(MockSnowflakeExecutor::new("test"));
        executor.push_response(Ok(Rows { columns: vec!["ID".to_string()], rows: vec![vec![RowValue::Integer(1)]] }));
        let (registry, _dir, _profile) = registry_with(executor);
        let result = registry.dispatch("execute_query", json!({ "statement": "SELECT 1" })).await.unwrap();
        assert_eq!(result["row_count"], 1);
    }

    #[tokio::test]
    async fn catalog_tools_are_gated_without_a_built_catalog() {
        let executor = Arc::new(MockSnowflakeExecutor::new("test"));
        let (registry, _dir, _profile) = registry_with(executor);
        let result = registry.dispatch("get_catalog_summary", Value::Null).await;
        assert!(matches!(result, Err(ApiError::ResourceUnavailable { .. })));
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_arguments() {
        let executor = Arc::new(MockSnowflakeExecutor::new("test"));
        let (registry, _dir, _profile) = registry_with(executor);
        let result = registry.dispatch("not_a_real_tool", Value::Null).await;
        assert!(matches!(result, Err(ApiError::InvalidArguments { .. })));
    }

    #[tokio::test]
    async fn test_connection_reports_status_ok() {
        let executor = Arc::new(MockSnowflakeExecutor::new("test"));
        executor.push_response(Ok(Rows { columns: vec!["CURRENT_VERSION()".to_string()], rows: vec![vec![RowValue::Text("8.1.0".to_string())]] }));
        let (registry, _dir, _profile) = registry_with(executor);
        let result = registry.dispatch("test_connection", Value::Null).await.unwrap();
        assert_eq!(result["status"], "ok");
    }
}
