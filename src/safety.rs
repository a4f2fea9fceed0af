//! SQL Safety Gate (C7): classifies an incoming SQL statement and denies
//! destructive or suspicious categories (spec §4.7).
//!
//! The "abstract parser capability" named in spec §9 is `sqlparser`
//! (the only SQL-AST crate in the example pack, see
//! `examples/other_examples/manifests/maxBogovick-rustmemodb/Cargo.toml`);
//! this module never mutates the statement, only classifies it.

use regex::Regex;
use serde::Serialize;
use sqlparser::ast::Statement;
use sqlparser::dialect::SnowflakeDialect;
use sqlparser::parser::Parser;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlCategory {
    Select,
    Show,
    Describe,
    Explain,
    Cte,
    Ddl,
    Dml,
    Multi,
    InjectionSuspected,
}

#[derive(Debug, Clone, Serialize)]
pub struct SqlVerdict {
    pub allowed: bool,
    pub category: SqlCategory,
    pub reason: String,
    pub alternatives: Vec<String>,
}

fn injection_tail_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)--[^\n]*\n\s*(select|insert|update|delete|drop|alter|create|merge|truncate)\b")
            .expect("static regex is valid")
    })
}

fn alternatives_for(keyword: &str) -> Vec<String> {
    match keyword.to_ascii_uppercase().as_str() {
        "DROP" => vec!["CREATE OR REPLACE".to_string()],
        "DELETE" => vec!["soft-delete via UPDATE ... SET deleted_at = CURRENT_TIMESTAMP()".to_string()],
        "TRUNCATE" => vec!["CREATE OR REPLACE TABLE ... AS SELECT * FROM ... WHERE 1=0".to_string()],
        "ALTER" => vec!["CREATE OR REPLACE".to_string()],
        "INSERT" | "UPDATE" | "MERGE" => {
            vec!["use execute_query for reads only; writes are out of scope for this server".to_string()]
        }
        _ => vec![],
    }
}

/// Classify and gate one SQL statement. Never mutates `statement`.
pub fn evaluate(statement: &str) -> SqlVerdict {
    if injection_tail_pattern().is_match(statement) {
        return SqlVerdict {
            allowed: false,
            category: SqlCategory::InjectionSuspected,
            reason: "comment-terminated tail followed by another statement keyword".to_string(),
            alternatives: vec![],
        };
    }

    let dialect = SnowflakeDialect {};
    let parsed = Parser::parse_sql(&dialect, statement);

    let statements = match parsed {
        Ok(s) => s,
        Err(e) => {
            return SqlVerdict {
                allowed: false,
                category: SqlCategory::InjectionSuspected,
                reason: format!("statement could not be parsed: {e}"),
                alternatives: vec![],
            };
        }
    };

    if statements.len() > 1 {
        return SqlVerdict {
            allowed: false,
            category: SqlCategory::Multi,
            reason: "multiple top-level statements (stacked queries) are not permitted".to_string(),
            alternatives: vec![],
        };
    }

    let Some(top_level) = statements.into_iter().next() else {
        return SqlVerdict {
            allowed: false,
            category: SqlCategory::InjectionSuspected,
            reason: "empty statement".to_string(),
            alternatives: vec![],
        };
    };

    classify(top_level)
}

/// Classifies by the statement's own rendered leading keyword rather than
/// matching every `Statement` enum variant by name — the AST's variant
/// set shifts across `sqlparser` releases, but `Statement`'s `Display`
/// impl reliably re-renders the original keyword first.
fn classify(statement: Statement) -> SqlVerdict {
    let rendered = statement.to_string();
    let leading_keyword = rendered.split_whitespace().next().unwrap_or("").to_ascii_uppercase();

    if matches!(statement, Statement::Query(_)) {
        let category = if leading_keyword == "WITH" { SqlCategory::Cte } else { SqlCategory::Select };
        return SqlVerdict {
            allowed: true,
            category,
            reason: "read-only query".to_string(),
            alternatives: vec![],
        };
    }

    match leading_keyword.as_str() {
        "EXPLAIN" => SqlVerdict {
            allowed: true,
            category: SqlCategory::Explain,
            reason: "explain plan is read-only".to_string(),
            alternatives: vec![],
        },
        "SHOW" => SqlVerdict {
            allowed: true,
            category: SqlCategory::Show,
            reason: "introspection statement is read-only".to_string(),
            alternatives: vec![],
        },
        "DESC" | "DESCRIBE" => SqlVerdict {
            allowed: true,
            category: SqlCategory::Describe,
            reason: "describe statement is read-only".to_string(),
            alternatives: vec![],
        },
        "DROP" => deny("DROP", SqlCategory::Ddl, "destructive DDL"),
        "TRUNCATE" => deny("TRUNCATE", SqlCategory::Ddl, "destructive DDL"),
        "ALTER" => deny("ALTER", SqlCategory::Ddl, "schema-mutating DDL"),
        "CREATE" => deny("CREATE", SqlCategory::Ddl, "object-creating DDL"),
        "INSERT" => deny("INSERT", SqlCategory::Dml, "write DML"),
        "UPDATE" => deny("UPDATE", SqlCategory::Dml, "write DML"),
        "DELETE" => deny("DELETE", SqlCategory::Dml, "write DML"),
        "MERGE" => deny("MERGE", SqlCategory::Dml, "write DML"),
        _ => SqlVerdict {
            allowed: false,
            category: SqlCategory::InjectionSuspected,
            reason: format!("statement kind not in the allowed surface: {leading_keyword}"),
            alternatives: vec![],
        },
    }
}

fn deny(keyword: &str, category: SqlCategory, reason: &str) -> SqlVerdict {
    SqlVerdict { allowed: false, category, reason: reason.to_string(), alternatives: alternatives_for(keyword) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_plain_select() {
        let verdict = evaluate("SELECT * FROM orders");
        assert!(verdict.allowed);
        assert_eq!(verdict.category, SqlCategory::Select);
    }

    #[test]
    fn allows_cte_over_select() {
        let verdict = evaluate("WITH recent AS (SELECT * FROM orders) SELECT * FROM recent");
        assert!(verdict.allowed);
        assert_eq!(verdict.category, SqlCategory::Cte);
    }

    #[test]
    fn denies_drop_with_create_or_replace_alternative() {
        let verdict = evaluate("DROP TABLE orders");
        assert!(!verdict.allowed);
        assert_eq!(verdict.category, SqlCategory::Ddl);
        assert!(verdict.alternatives.iter().any(|a| a.contains("CREATE OR REPLACE")));
    }

    #[test]
    fn denies_stacked_queries_as_multi() {
        let verdict = evaluate("SELECT 1; DROP TABLE orders");
        assert!(!verdict.allowed);
        assert_eq!(verdict.category, SqlCategory::Multi);
    }

    #[test]
    fn denies_comment_terminated_injection() {
        let verdict = evaluate("SELECT 1 -- \nDROP TABLE orders");
        assert!(!verdict.allowed);
        assert_eq!(verdict.category, SqlCategory::InjectionSuspected);
    }

    #[test]
    fn denies_unparseable_statement() {
        let verdict = evaluate("this is not sql at all (((");
        assert!(!verdict.allowed);
    }

    #[test]
    fn denies_delete_with_soft_delete_alternative() {
        let verdict = evaluate("DELETE FROM orders WHERE id = 1");
        assert!(!verdict.allowed);
        assert_eq!(verdict.category, SqlCategory::Dml);
        assert!(verdict.alternatives.iter().any(|a| a.contains("soft-delete")));
    }
}
