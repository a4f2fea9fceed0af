//! Error taxonomy (spec §4.3, §7) and JSON-RPC error-envelope mapping (§6).
//!
//! Grounded on the donor's `ApiError` (constructors like `invalid_sql`,
//! `sql_safety_violation`, `forbidden` appear throughout
//! `services/system_function_service.rs` and friends); generalized here
//! into the full taxonomy the spec names and wired to stable JSON-RPC
//! codes instead of HTTP statuses.

use serde::Serialize;
use serde_json::{json, Value};

pub type ApiResult<T> = Result<T, ApiError>;

/// Structured context attached to every error, per spec §4.3.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorContext {
    pub operation: Option<String>,
    pub object: Option<String>,
    pub profile: Option<String>,
    pub sql_preview: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation(mut self, op: impl Into<String>) -> Self {
        self.operation = Some(op.into());
        self
    }

    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_sql_preview(mut self, sql: &str) -> Self {
        const MAX: usize = 200;
        let preview = if sql.len() > MAX { format!("{}...", &sql[..MAX]) } else { sql.to_string() };
        self.sql_preview = Some(preview);
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }
}

/// The error taxonomy from spec §4.3 and §7, plus the gating/lookup kinds
/// named in §6's tool surface.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("configuration error: {message}")]
    Configuration { message: String, context: ErrorContext },

    #[error("connection error: {message}")]
    Connection { message: String, context: ErrorContext },

    #[error("authentication error: {message}")]
    Authentication { message: String, context: ErrorContext },

    #[error("permission error: {message}")]
    Permission { message: String, context: ErrorContext },

    #[error("profile error: {message}")]
    Profile { message: String, available_profiles: Vec<String>, context: ErrorContext },

    #[error("timeout after {elapsed_s}s: {message}")]
    Timeout { message: String, elapsed_s: u64, context: ErrorContext },

    #[error("resource unavailable: {message}")]
    ResourceUnavailable {
        message: String,
        missing_dependencies: Vec<String>,
        blocking_issues: Vec<String>,
        context: ErrorContext,
    },

    #[error("resource busy: {message}")]
    ResourceBusy { message: String, context: ErrorContext },

    #[error("sql denied: {message}")]
    SqlSafety { message: String, reason: String, alternatives: Vec<String>, context: ErrorContext },

    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String, path: String, context: ErrorContext },

    #[error("not found: {message}")]
    NotFound { message: String, candidates: Vec<String>, context: ErrorContext },

    #[error("ambiguous reference: {message}")]
    Ambiguous { message: String, candidates: Vec<String>, context: ErrorContext },

    #[error("unknown error: {message}")]
    Unknown { message: String, context: ErrorContext },
}

impl ApiError {
    /// Stable JSON-RPC error code, per spec §6.
    pub fn code(&self) -> i32 {
        match self {
            ApiError::Configuration { .. } => -32001,
            ApiError::Connection { .. } => -32002,
            ApiError::Authentication { .. } => -32003,
            ApiError::Profile { .. } => -32004,
            ApiError::ResourceUnavailable { .. } | ApiError::ResourceBusy { .. } => -32005,
            ApiError::SqlSafety { .. } => -32010,
            ApiError::InvalidArguments { .. } => -32011,
            ApiError::Timeout { .. } => -32012,
            ApiError::NotFound { .. } | ApiError::Ambiguous { .. } => -32013,
            ApiError::Permission { .. } | ApiError::Unknown { .. } => -32099,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            ApiError::Configuration { context, .. }
            | ApiError::Connection { context, .. }
            | ApiError::Authentication { context, .. }
            | ApiError::Permission { context, .. }
            | ApiError::Profile { context, .. }
            | ApiError::Timeout { context, .. }
            | ApiError::ResourceUnavailable { context, .. }
            | ApiError::ResourceBusy { context, .. }
            | ApiError::SqlSafety { context, .. }
            | ApiError::InvalidArguments { context, .. }
            | ApiError::NotFound { context, .. }
            | ApiError::Ambiguous { context, .. }
            | ApiError::Unknown { context, .. } => context,
        }
    }

    /// Whether the circuit breaker should count this failure (spec §4.2:
    /// "only expected exceptions... count toward failures").
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(self, ApiError::Connection { .. } | ApiError::Timeout { .. })
    }

    /// Render as the JSON-RPC `error` object (`code`, `message`, `data`).
    pub fn to_rpc_error(&self) -> Value {
        let mut data = serde_json::to_value(self.context()).unwrap_or(Value::Null);
        if let Value::Object(ref mut map) = data {
            match self {
                ApiError::Profile { available_profiles, .. } => {
                    map.insert("available_profiles".into(), json!(available_profiles));
                }
                ApiError::ResourceUnavailable { missing_dependencies, blocking_issues, .. } => {
                    map.insert("missing_dependencies".into(), json!(missing_dependencies));
                    map.insert("blocking_issues".into(), json!(blocking_issues));
                }
                ApiError::SqlSafety { reason, alternatives, .. } => {
                    map.insert("reason".into(), json!(reason));
                    map.insert("alternatives".into(), json!(alternatives));
                }
                ApiError::InvalidArguments { path, .. } => {
                    map.insert("path".into(), json!(path));
                }
                ApiError::NotFound { candidates, .. } | ApiError::Ambiguous { candidates, .. } => {
                    map.insert("candidates".into(), json!(candidates));
                }
                _ => {}
            }
        }
        json!({
            "code": self.code(),
            "message": self.to_string(),
            "data": data,
        })
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ApiError::Configuration { message: message.into(), context: ErrorContext::new() }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        ApiError::Connection { message: message.into(), context: ErrorContext::new() }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        ApiError::Authentication { message: message.into(), context: ErrorContext::new() }
    }

    pub fn permission(message: impl Into<String>) -> Self {
        ApiError::Permission { message: message.into(), context: ErrorContext::new() }
    }

    pub fn profile(message: impl Into<String>, available_profiles: Vec<String>) -> Self {
        ApiError::Profile { message: message.into(), available_profiles, context: ErrorContext::new() }
    }

    pub fn timeout(message: impl Into<String>, elapsed_s: u64) -> Self {
        ApiError::Timeout { message: message.into(), elapsed_s, context: ErrorContext::new() }
    }

    pub fn resource_unavailable(
        message: impl Into<String>,
        missing_dependencies: Vec<String>,
        blocking_issues: Vec<String>,
    ) -> Self {
        ApiError::ResourceUnavailable {
            message: message.into(),
            missing_dependencies,
            blocking_issues,
            context: ErrorContext::new(),
        }
    }

    pub fn resource_busy(message: impl Into<String>) -> Self {
        ApiError::ResourceBusy { message: message.into(), context: ErrorContext::new() }
    }

    pub fn sql_safety_denied(
        message: impl Into<String>,
        reason: impl Into<String>,
        alternatives: Vec<String>,
    ) -> Self {
        ApiError::SqlSafety {
            message: message.into(),
            reason: reason.into(),
            alternatives,
            context: ErrorContext::new(),
        }
    }

    pub fn invalid_arguments(message: impl Into<String>, path: impl Into<String>) -> Self {
        ApiError::InvalidArguments { message: message.into(), path: path.into(), context: ErrorContext::new() }
    }

    pub fn not_found(message: impl Into<String>, candidates: Vec<String>) -> Self {
        ApiError::NotFound { message: message.into(), candidates, context: ErrorContext::new() }
    }

    pub fn ambiguous(message: impl Into<String>, candidates: Vec<String>) -> Self {
        ApiError::Ambiguous { message: message.into(), candidates, context: ErrorContext::new() }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        ApiError::Unknown { message: message.into(), context: ErrorContext::new() }
    }

    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        match &mut self {
            ApiError::Configuration { context, .. }
            | ApiError::Connection { context, .. }
            | ApiError::Authentication { context, .. }
            | ApiError::Permission { context, .. }
            | ApiError::Profile { context, .. }
            | ApiError::Timeout { context, .. }
            | ApiError::ResourceUnavailable { context, .. }
            | ApiError::ResourceBusy { context, .. }
            | ApiError::SqlSafety { context, .. }
            | ApiError::InvalidArguments { context, .. }
            | ApiError::NotFound { context, .. }
            | ApiError::Ambiguous { context, .. }
            | ApiError::Unknown { context, .. } => *context = ctx,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_spec_table() {
        assert_eq!(ApiError::configuration("x").code(), -32001);
        assert_eq!(ApiError::connection("x").code(), -32002);
        assert_eq!(ApiError::authentication("x").code(), -32003);
        assert_eq!(ApiError::profile("x", vec![]).code(), -32004);
        assert_eq!(ApiError::resource_unavailable("x", vec![], vec![]).code(), -32005);
        assert_eq!(ApiError::sql_safety_denied("x", "ddl", vec![]).code(), -32010);
        assert_eq!(ApiError::invalid_arguments("x", "y").code(), -32011);
        assert_eq!(ApiError::timeout("x", 1).code(), -32012);
        assert_eq!(ApiError::not_found("x", vec![]).code(), -32013);
    }

    #[test]
    fn breaker_counts_only_connection_and_timeout() {
        assert!(ApiError::connection("x").counts_as_breaker_failure());
        assert!(ApiError::timeout("x", 1).counts_as_breaker_failure());
        assert!(!ApiError::authentication("x").counts_as_breaker_failure());
        assert!(!ApiError::permission("x").counts_as_breaker_failure());
    }

    #[test]
    fn rpc_error_carries_alternatives() {
        let err = ApiError::sql_safety_denied("DROP denied", "ddl", vec!["CREATE OR REPLACE".into()]);
        let rendered = err.to_rpc_error();
        assert_eq!(rendered["code"], -32010);
        assert_eq!(rendered["data"]["alternatives"][0], "CREATE OR REPLACE");
    }
}
