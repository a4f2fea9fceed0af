//! Query Service (C8): orchestrates Safety Gate → Circuit Breaker →
//! Executor for the public `execute_query` and `preview_table`
//! operations (spec §4.8).

use crate::backend::SnowflakeBackend;
use crate::executor::ExecContext;
use crate::safety::evaluate;
use crate::utils::{ApiError, ApiResult};
use serde::Serialize;
use std::time::{Duration, Instant};

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_TIMEOUT_SECS: u64 = 3600;
const MAX_PREVIEW_LIMIT: u32 = 1000;
const DEFAULT_PREVIEW_LIMIT: u32 = 100;

#[derive(Debug, Clone, Default)]
pub struct ContextOverrides {
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub role: Option<String>,
}

impl From<ContextOverrides> for ExecContext {
    fn from(overrides: ContextOverrides) -> Self {
        ExecContext {
            warehouse: overrides.warehouse,
            database: overrides.database,
            schema: overrides.schema,
            role: overrides.role,
            timeout: None,
            statement_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    pub row_count: usize,
    pub elapsed_ms: u64,
}

pub struct QueryService {
    backend: SnowflakeBackend,
}

impl QueryService {
    pub fn new(backend: SnowflakeBackend) -> Self {
        Self { backend }
    }

    /// Contract per spec §4.8: gate via C7, execute via C2→C1 with a
    /// bounded timeout, cancel on deadline expiry.
    pub async fn execute_query(
        &self,
        statement: &str,
        ctx_overrides: ContextOverrides,
        timeout_s: Option<u64>,
    ) -> ApiResult<QueryResult> {
        let statement = statement.trim();
        if statement.is_empty() {
            return Err(ApiError::invalid_arguments("statement must not be empty", "statement"));
        }

        let timeout_s = timeout_s.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_s == 0 || timeout_s > MAX_TIMEOUT_SECS {
            return Err(ApiError::invalid_arguments(
                format!("timeout_seconds must be in 1..={MAX_TIMEOUT_SECS}"),
                "timeout_seconds",
            ));
        }

        let verdict = evaluate(statement);
        if !verdict.allowed {
            return Err(ApiError::sql_safety_denied(
                format!("statement denied: {}", verdict.reason),
                format!("{:?}", verdict.category),
                verdict.alternatives,
            )
            .with_context(crate::utils::ErrorContext::new().with_sql_preview(statement)));
        }

        let mut ctx: ExecContext = ctx_overrides.into();
        let timeout = Duration::from_secs(timeout_s);
        ctx.timeout = Some(timeout);
        let statement_id = uuid::Uuid::new_v4().to_string();
        ctx.statement_id = Some(statement_id.clone());

        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.backend.run(statement, &ctx)).await;

        let rows = match result {
            Ok(inner) => inner?,
            Err(_) => {
                tracing::warn!(statement_preview = %preview(statement), "query exceeded deadline, cancelling");
                if let Err(e) = self.backend.cancel(&statement_id).await {
                    tracing::warn!(error = %e, statement_id = %statement_id, "failed to cancel timed-out statement");
                }
                return Err(ApiError::timeout("query execution deadline exceeded", timeout_s)
                    .with_context(crate::utils::ErrorContext::new().with_sql_preview(statement)));
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let row_count = rows.row_count();
        let rows_json = rows.rows.iter().map(|row| serde_json::Value::Array(row.iter().map(|v| v.to_json()).collect())).collect();

        Ok(QueryResult { columns: rows.columns, rows: rows_json, row_count, elapsed_ms })
    }

    /// `preview_table(table, limit ≤ 1000)` — constructs a bound-checked
    /// `SELECT * FROM <fqn> LIMIT <n>` and delegates to `execute_query`.
    pub async fn preview_table(
        &self,
        table: &str,
        limit: Option<u32>,
        ctx_overrides: ContextOverrides,
    ) -> ApiResult<QueryResult> {
        let limit = limit.unwrap_or(DEFAULT_PREVIEW_LIMIT);
        if limit == 0 || limit > MAX_PREVIEW_LIMIT {
            return Err(ApiError::invalid_arguments(format!("limit must be in 1..={MAX_PREVIEW_LIMIT}"), "limit"));
        }
        if table.trim().is_empty() {
            return Err(ApiError::invalid_arguments("table_name must not be empty", "table_name"));
        }

        let statement = format!("SELECT * FROM {table} LIMIT {limit}");
        self.execute_query(&statement, ctx_overrides, None).await
    }
}

fn preview(statement: &str) -> String {
    const MAX: usize = 200;
    if statement.len() > MAX { format!("{}...", &statement[..MAX]) } else { statement.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::executor::mock::MockSnowflakeExecutor;
    use crate::executor::{Rows, RowValue};
    use crate::utils::clock::FixedClock;
    use std::sync::Arc;

    fn service_with(executor: Arc<MockSnowflakeExecutor>) -> QueryService {
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let breaker = Arc::new(CircuitBreaker::new("test", 5, 30, clock));
        QueryService::new(SnowflakeBackend::new(executor, breaker))
    }

    #[tokio::test]
    async fn executes_select_and_shapes_result() {
        let executor = Arc::new(MockSnowflakeExecutor::new("test"));
        executor.push_response(Ok(Rows {
            columns: vec!["ID".to_string()],
            rows: vec![vec![RowValue::Integer(1)]],
        }));
        let service = service_with(executor);
        let result = service.execute_query("SELECT 1", ContextOverrides::default(), None).await.unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.columns, vec!["ID".to_string()]);
    }

    #[tokio::test]
    async fn denies_destructive_statement_before_calling_backend() {
        let executor = Arc::new(MockSnowflakeExecutor::new("test"));
        let service = service_with(executor.clone());
        let result = service.execute_query("DROP TABLE orders", ContextOverrides::default(), None).await;
        assert!(matches!(result, Err(ApiError::SqlSafety { .. })));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn rejects_zero_timeout() {
        let executor = Arc::new(MockSnowflakeExecutor::new("test"));
        let service = service_with(executor);
        let result = service.execute_query("SELECT 1", ContextOverrides::default(), Some(0)).await;
        assert!(matches!(result, Err(ApiError::InvalidArguments { .. })));
    }

    #[tokio::test]
    async fn rejects_oversized_preview_limit() {
        let executor = Arc::new(MockSnowflakeExecutor::new("test"));
        let service = service_with(executor);
        let result = service.preview_table("ORDERS", Some(1001), ContextOverrides::default()).await;
        assert!(matches!(result, Err(ApiError::InvalidArguments { .. })));
    }

    #[tokio::test]
    async fn preview_table_delegates_to_execute_query() {
        let executor = Arc::new(MockSnowflakeExecutor::new("test"));
        executor.push_response(Ok(Rows { columns: vec!["X".to_string()], rows: vec![] }));
        let service = service_with(executor.clone());
        let _ = service.preview_table("ORDERS", Some(10), ContextOverrides::default()).await.unwrap();
        assert_eq!(executor.calls(), vec!["SELECT * FROM ORDERS LIMIT 10".to_string()]);
    }
}
