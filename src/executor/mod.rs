//! Abstract Snowflake call surface (C1).
//!
//! Mirrors the donor's `ClusterAdapter` trait (`services/cluster_adapter/mod.rs`):
//! a single async trait any conforming backend implements, with a factory
//! function selecting the concrete type. Here the only axis is "live REST
//! connector vs. test fake" rather than "StarRocks vs. Doris".

pub mod rest;
pub mod value;

use crate::utils::ApiResult;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub use value::RowValue;

/// Per-call session context overrides (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub role: Option<String>,
    pub timeout: Option<Duration>,
    /// Caller-assigned statement handle, set before the call so the caller
    /// can `cancel()` it if the call times out without waiting on `run`'s
    /// return value (spec §4.8, §5).
    pub statement_id: Option<String>,
}

impl ExecContext {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Columns plus materialized rows. The executor drains the backend's row
/// iterator internally and hands back an owned, bounded result — spec §4.1
/// requires the iterator be drained or closed before `run` returns.
#[derive(Debug, Clone, Default)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RowValue>>,
}

impl Rows {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Render as `{columns, rows, row_count}` JSON ready for the wire shape
    /// in spec §6 (`elapsed_ms` is attached by the caller, who owns timing).
    pub fn to_json(&self) -> Value {
        let rows: Vec<Value> =
            self.rows.iter().map(|row| Value::Array(row.iter().map(|v| v.to_json()).collect())).collect();
        serde_json::json!({
            "columns": self.columns,
            "rows": rows,
            "row_count": self.rows.len(),
        })
    }
}

/// Any conforming backend — live connector or test fake — must honor
/// per-call context overrides and release session overrides on return.
#[async_trait]
pub trait SnowflakeExecutor: Send + Sync {
    /// Run a single statement to completion, draining its rows.
    async fn run(&self, statement: &str, ctx: &ExecContext) -> ApiResult<Rows>;

    /// Best-effort cancellation of an in-flight statement, used by the
    /// query service when a deadline expires (spec §5).
    async fn cancel(&self, statement_handle: &str) -> ApiResult<()>;

    /// Identifies the profile/account this executor is bound to, used as
    /// the circuit breaker's per-backend key (spec §5: "process-wide per
    /// logical backend (profile)").
    fn backend_key(&self) -> &str;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Scripted fake conforming to `SnowflakeExecutor`, used across circuit
    /// breaker, query service, and safety gate tests (spec §10.4).
    pub struct MockSnowflakeExecutor {
        backend_key: String,
        script: Mutex<Vec<ApiResult<Rows>>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockSnowflakeExecutor {
        pub fn new(backend_key: impl Into<String>) -> Self {
            Self { backend_key: backend_key.into(), script: Mutex::new(Vec::new()), calls: Mutex::new(Vec::new()) }
        }

        /// Responses are consumed front-to-back; once exhausted, the mock
        /// returns a fixed "unknown" error.
        pub fn push_response(&self, response: ApiResult<Rows>) {
            self.script.lock().unwrap().push(response);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SnowflakeExecutor for MockSnowflakeExecutor {
        async fn run(&self, statement: &str, _ctx: &ExecContext) -> ApiResult<Rows> {
            self.calls.lock().unwrap().push(statement.to_string());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Err(crate::utils::ApiError::unknown("mock script exhausted"));
            }
            script.remove(0)
        }

        async fn cancel(&self, _statement_handle: &str) -> ApiResult<()> {
            Ok(())
        }

        fn backend_key(&self) -> &str {
            &self.backend_key
        }
    }
}
