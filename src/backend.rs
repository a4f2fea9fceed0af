//! Binds one `SnowflakeExecutor` (C1) to its `CircuitBreaker` (C2) as the
//! single call surface every higher layer (query service, health monitor,
//! resource supervisor, `test_connection`) goes through — the concrete
//! "C2 wraps C1" composition named in spec §2.

use crate::circuit_breaker::CircuitBreaker;
use crate::executor::{ExecContext, Rows, SnowflakeExecutor};
use crate::utils::ApiResult;
use std::sync::Arc;

#[derive(Clone)]
pub struct SnowflakeBackend {
    executor: Arc<dyn SnowflakeExecutor>,
    breaker: Arc<CircuitBreaker>,
}

impl SnowflakeBackend {
    pub fn new(executor: Arc<dyn SnowflakeExecutor>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { executor, breaker }
    }

    pub async fn run(&self, statement: &str, ctx: &ExecContext) -> ApiResult<Rows> {
        let executor = self.executor.clone();
        let statement = statement.to_string();
        let ctx = ctx.clone();
        self.breaker.call(move || async move { executor.run(&statement, &ctx).await }).await
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Best-effort cancellation of an in-flight statement (spec §4.8, §5).
    /// Bypasses the circuit breaker: a failed cancel attempt is not itself
    /// evidence the backend is down, and must never mask the timeout it
    /// was issued to clean up after.
    pub async fn cancel(&self, statement_handle: &str) -> ApiResult<()> {
        self.executor.cancel(statement_handle).await
    }

    pub fn backend_key(&self) -> &str {
        self.executor.backend_key()
    }
}
