//! JSON-RPC 2.0 stdio transport (spec §6, SPEC_FULL §10.1): request/response
//! envelope types, the static tool schema table for `tools/list`, and the
//! per-line dispatcher `main`'s read loop calls.

use crate::tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    fn err(id: Value, error: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(error) }
    }

    fn parse_error() -> Self {
        Self::err(Value::Null, json!({ "code": -32700, "message": "parse error" }))
    }
}

/// One entry per tool in spec §6's "Tool surface" table. `tools/list`
/// serves this verbatim; argument names and required-ness mirror the
/// `Args` structs in `tools::ToolRegistry` exactly.
fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "execute_query",
            "description": "Run a single SQL statement through the safety gate and circuit breaker.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "statement": { "type": "string" },
                    "warehouse": { "type": "string" },
                    "database": { "type": "string" },
                    "schema": { "type": "string" },
                    "role": { "type": "string" },
                    "timeout_seconds": { "type": "integer", "minimum": 1, "maximum": 3600 },
                    "verbose_errors": { "type": "boolean" },
                },
                "required": ["statement"],
            },
        }),
        json!({
            "name": "preview_table",
            "description": "SELECT * FROM <table> LIMIT <n>, bound-checked and delegated to execute_query.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "table_name": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 1000 },
                    "warehouse": { "type": "string" },
                    "database": { "type": "string" },
                    "schema": { "type": "string" },
                    "role": { "type": "string" },
                },
                "required": ["table_name"],
            },
        }),
        json!({
            "name": "build_catalog",
            "description": "Harvest catalog metadata, full or incremental, into a catalog directory.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "output_dir": { "type": "string" },
                    "database": { "type": "string" },
                    "include_ddl": { "type": "boolean" },
                    "force_full": { "type": "boolean" },
                },
            },
        }),
        json!({
            "name": "get_catalog_summary",
            "description": "Summarize a built catalog's object and column counts.",
            "inputSchema": {
                "type": "object",
                "properties": { "catalog_dir": { "type": "string" } },
            },
        }),
        json!({
            "name": "query_lineage",
            "description": "BFS lineage traversal from an object, upstream/downstream/both.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "object_name": { "type": "string" },
                    "direction": { "type": "string", "enum": ["upstream", "downstream", "both"] },
                    "depth": { "type": "integer", "minimum": 1, "maximum": 10 },
                    "format": { "type": "string", "enum": ["text", "json"] },
                    "catalog_dir": { "type": "string" },
                },
                "required": ["object_name"],
            },
        }),
        json!({
            "name": "build_dependency_graph",
            "description": "Whole-graph lineage view, optionally scoped to a database/schema.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "database": { "type": "string" },
                    "schema": { "type": "string" },
                    "format": { "type": "string", "enum": ["json", "dot"] },
                    "catalog_dir": { "type": "string" },
                },
            },
        }),
        json!({
            "name": "test_connection",
            "description": "Round-trips SELECT CURRENT_VERSION() through the circuit breaker.",
            "inputSchema": { "type": "object", "properties": {} },
        }),
        json!({
            "name": "health_check",
            "description": "Composite TTL-cached health across profile, connection, and resources.",
            "inputSchema": { "type": "object", "properties": {} },
        }),
        json!({
            "name": "check_profile_config",
            "description": "Validate the active credential profile.",
            "inputSchema": { "type": "object", "properties": {} },
        }),
        json!({
            "name": "get_resource_status",
            "description": "Per-resource availability and blocking issues.",
            "inputSchema": {
                "type": "object",
                "properties": { "resource_name": { "type": "string" } },
            },
        }),
        json!({
            "name": "check_resource_dependencies",
            "description": "Dependency health for one resource or all tracked resources.",
            "inputSchema": {
                "type": "object",
                "properties": { "resource_name": { "type": "string" } },
            },
        }),
    ]
}

/// Dispatches a single decoded request to its handler, per MCP's
/// `initialize` / `tools/list` / `tools/call` surface over this transport.
async fn handle_request(tools: &ToolRegistry, request: JsonRpcRequest) -> JsonRpcResponse {
    match request.method.as_str() {
        "initialize" => JsonRpcResponse::ok(
            request.id,
            json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": { "name": "snowflake-mcp", "version": env!("CARGO_PKG_VERSION") },
                "capabilities": { "tools": {} },
            }),
        ),
        "tools/list" => JsonRpcResponse::ok(request.id, json!({ "tools": tool_definitions() })),
        "tools/call" => {
            let Some(name) = request.params.get("name").and_then(Value::as_str) else {
                return JsonRpcResponse::err(request.id, json!({ "code": -32602, "message": "missing 'name'" }));
            };
            let args = request.params.get("arguments").cloned().unwrap_or(Value::Null);
            match tools.dispatch(name, args).await {
                Ok(result) => JsonRpcResponse::ok(request.id, json!({ "content": result })),
                Err(e) => JsonRpcResponse::err(request.id, e.to_rpc_error()),
            }
        }
        other => JsonRpcResponse::err(request.id, json!({ "code": -32601, "message": format!("method not found: {other}") })),
    }
}

/// Parses and dispatches one line of stdio input. Malformed JSON yields a
/// `-32700 Parse error` response instead of propagating, so a single bad
/// line never terminates the read loop (spec SPEC_FULL §10.1).
pub async fn handle_line(tools: &ToolRegistry, line: &str) -> JsonRpcResponse {
    match serde_json::from_str::<JsonRpcRequest>(line) {
        Ok(request) => handle_request(tools, request).await,
        Err(e) => {
            tracing::warn!("failed to parse JSON-RPC request: {e}");
            JsonRpcResponse::parse_error()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SnowflakeBackend;
    use crate::catalog::CatalogBuilder;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::executor::mock::MockSnowflakeExecutor;
    use crate::health::HealthMonitor;
    use crate::lineage::LineageEngine;
    use crate::profile::ProfileValidator;
    use crate::query_service::QueryService;
    use crate::resources::ResourceSupervisor;
    use crate::utils::clock::{Clock, FixedClock};
    use std::io::Write;
    use std::sync::Arc;

    fn test_registry() -> (ToolRegistry, tempfile::TempDir, tempfile::NamedTempFile) {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(chrono::Utc::now()));
        let executor = Arc::new(MockSnowflakeExecutor::new("test"));
        let breaker = Arc::new(CircuitBreaker::new("test", 5, 30, clock.clone()));
        let backend = Arc::new(SnowflakeBackend::new(executor, breaker));
        let catalog_dir = tempfile::tempdir().unwrap();
        let mut profile_file = tempfile::NamedTempFile::new().unwrap();
        write!(profile_file, "[default]\nname = \"default\"\naccount = \"acme\"\nuser = \"bob\"\nauth_kind = \"password\"\n").unwrap();
        let profile_validator = Arc::new(ProfileValidator::new(profile_file.path().to_path_buf(), 30, clock.clone()));
        let resource_supervisor =
            Arc::new(ResourceSupervisor::new(profile_validator.clone(), catalog_dir.path().to_path_buf(), false, 60, clock.clone()));
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
    async fn malformed_json_yields_parse_error() {
        let (tools, _dir, _profile) = test_registry();
        let response = handle_line(&tools, "{not json").await;
        assert_eq!(response.error.unwrap()["code"], -32700);
    }

    #[tokio::test]
    async fn tools_list_enumerates_the_eleven_tools() {
        let (tools, _dir, _profile) = test_registry();
        let response = handle_line(&tools, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).await;
        let result = response.result.unwrap();
        assert_eq!(result["tools"].as_array().unwrap().len(), 11);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let (tools, _dir, _profile) = test_registry();
        let response = handle_line(&tools, r#"{"jsonrpc":"2.0","id":1,"method":"nope"}"#).await;
        assert_eq!(response.error.unwrap()["code"], -32601);
    }

    #[tokio::test]
    async fn tools_call_dispatches_to_registry() {
        let (tools, _dir, _profile) = test_registry();
        let response = handle_line(
            &tools,
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"check_profile_config","arguments":{}}}"#,
        )
        .await;
        assert!(response.error.is_none());
    }
}
