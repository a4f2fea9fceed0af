//! Catalog Builder (C9): the data model shared by `builder` (harvest
//! logic) and `store` (file I/O), per spec §3 and §4.9.

pub mod builder;
pub mod store;

pub use builder::{BuildRequest, CatalogBuilder};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Table,
    View,
    MaterializedView,
    DynamicTable,
    ExternalTable,
    Stage,
    Function,
    Procedure,
    Task,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 9] = [
        ObjectKind::Table,
        ObjectKind::View,
        ObjectKind::MaterializedView,
        ObjectKind::DynamicTable,
        ObjectKind::ExternalTable,
        ObjectKind::Stage,
        ObjectKind::Function,
        ObjectKind::Procedure,
        ObjectKind::Task,
    ];

    /// File stem under `output_dir` for this kind's record-oriented jsonl
    /// file (spec §4.9 persisted layout).
    pub fn file_stem(&self) -> &'static str {
        match self {
            ObjectKind::Table => "tables",
            ObjectKind::View => "views",
            ObjectKind::MaterializedView => "materialized_views",
            ObjectKind::DynamicTable => "dynamic_tables",
            ObjectKind::ExternalTable => "external_tables",
            ObjectKind::Stage => "stages",
            ObjectKind::Function => "functions",
            ObjectKind::Procedure => "procedures",
            ObjectKind::Task => "tasks",
        }
    }

    /// Whether this kind's definition carries SQL text the Lineage Engine
    /// can parse (spec §4.10: "views, materialized views, dynamic
    /// tables, procedures, tasks").
    pub fn carries_sql(&self) -> bool {
        matches!(
            self,
            ObjectKind::View
                | ObjectKind::MaterializedView
                | ObjectKind::DynamicTable
                | ObjectKind::Procedure
                | ObjectKind::Task
        )
    }

    /// The object-type keyword Snowflake's `GET_DDL` expects.
    pub fn ddl_type_name(&self) -> &'static str {
        match self {
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::MaterializedView => "MATERIALIZED_VIEW",
            ObjectKind::DynamicTable => "DYNAMIC_TABLE",
            ObjectKind::ExternalTable => "TABLE",
            ObjectKind::Stage => "STAGE",
            ObjectKind::Function => "FUNCTION",
            ObjectKind::Procedure => "PROCEDURE",
            ObjectKind::Task => "TASK",
        }
    }
}

/// Fully qualified Snowflake object reference (spec §3). Case-insensitive
/// equality; canonical form is uppercase.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub database: String,
    pub schema: String,
    pub name: String,
    pub object_kind: ObjectKind,
}

impl ObjectRef {
    pub fn new(database: impl Into<String>, schema: impl Into<String>, name: impl Into<String>, object_kind: ObjectKind) -> Self {
        Self {
            database: database.into().to_ascii_uppercase(),
            schema: schema.into().to_ascii_uppercase(),
            name: name.into().to_ascii_uppercase(),
            object_kind,
        }
    }

    pub fn fqn(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.name)
    }

    pub fn key(&self) -> (String, String, String, ObjectKind) {
        (self.database.clone(), self.schema.clone(), self.name.clone(), self.object_kind)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fqn())
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.database.eq_ignore_ascii_case(&other.database)
            && self.schema.eq_ignore_ascii_case(&other.schema)
            && self.name.eq_ignore_ascii_case(&other.name)
            && self.object_kind == other.object_kind
    }
}

impl std::hash::Hash for ObjectRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.database.to_ascii_uppercase().hash(state);
        self.schema.to_ascii_uppercase().hash(state);
        self.name.to_ascii_uppercase().hash(state);
        self.object_kind.hash(state);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub comment: Option<String>,
}

/// Per-object metadata (spec §3). Invariant: every entry has at least an
/// `ObjectRef`; missing DDL is permitted and degrades lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub object_ref: ObjectRef,
    pub columns: Vec<ColumnInfo>,
    pub ddl: Option<String>,
    pub last_ddl: Option<chrono::DateTime<chrono::Utc>>,
    pub owner: Option<String>,
    pub comment: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogMetadata {
    pub last_build: chrono::DateTime<chrono::Utc>,
    pub last_full_refresh: chrono::DateTime<chrono::Utc>,
    pub databases: Vec<String>,
    pub total_objects: usize,
    pub version: u32,
    pub schema_count: usize,
    pub table_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    UpToDate,
    IncrementalUpdate,
    FullRefresh,
}

/// Result of `build_catalog` (spec §3). `warnings` is a SPEC_FULL
/// supplement (§11) carrying one entry per degraded probe or per-object
/// fetch failure collected during the build.
#[derive(Debug, Clone, Serialize)]
pub struct IncrementalBuildResult {
    pub status: BuildStatus,
    pub last_build: chrono::DateTime<chrono::Utc>,
    pub changes: usize,
    pub changed_objects: Vec<String>,
    pub metadata: CatalogMetadata,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ref_equality_is_case_insensitive() {
        let a = ObjectRef::new("db", "schema", "name", ObjectKind::Table);
        let b = ObjectRef::new("DB", "SCHEMA", "NAME", ObjectKind::Table);
        assert_eq!(a, b);
    }

    #[test]
    fn fqn_is_uppercased() {
        let r = ObjectRef::new("analytics", "public", "orders", ObjectKind::Table);
        assert_eq!(r.fqn(), "ANALYTICS.PUBLIC.ORDERS");
    }
}
