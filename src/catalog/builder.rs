//! Full-refresh and incremental catalog harvesting (spec §4.9). Bounded
//! concurrency via `tokio::sync::Semaphore` gates simultaneous outstanding
//! Snowflake calls — the donor has no direct worker-pool precedent, so
//! this follows the semaphore-gated pattern spec §9's design notes name
//! explicitly ("a bounded worker pool with a semaphore gating Snowflake
//! calls").

use super::store;
use super::{BuildStatus, CatalogEntry, CatalogMetadata, ColumnInfo, IncrementalBuildResult, ObjectKind, ObjectRef};
use crate::backend::SnowflakeBackend;
use crate::executor::{ExecContext, RowValue};
use crate::utils::clock::Clock;
use crate::utils::{ApiError, ApiResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub output_dir: PathBuf,
    pub database: Option<String>,
    pub force_full: bool,
    pub include_ddl: bool,
}

pub struct CatalogBuilder {
    backend: SnowflakeBackend,
    max_concurrency: usize,
    full_refresh_threshold: ChronoDuration,
    account_usage_safety_margin: ChronoDuration,
    clock: Arc<dyn Clock>,
    /// Checked between objects during a full refresh so a caller can
    /// cooperatively cancel (spec §5): in-flight objects finish, but the
    /// builder exits before writing `_catalog_metadata.json`.
    cancelled: Arc<AtomicBool>,
}

impl CatalogBuilder {
    pub fn new(
        backend: SnowflakeBackend,
        max_concurrency: usize,
        full_refresh_threshold: ChronoDuration,
        account_usage_safety_margin: ChronoDuration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            max_concurrency: max_concurrency.max(1),
            full_refresh_threshold,
            account_usage_safety_margin,
            clock,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancellation_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub async fn build(&self, request: BuildRequest) -> ApiResult<IncrementalBuildResult> {
        let _lock = store::acquire_lock(&request.output_dir)?;
        let existing_metadata = store::read_metadata(&request.output_dir);

        let decision = self.decide(&existing_metadata, request.force_full);
        match decision {
            Decision::FullRefresh => self.full_refresh(&request, existing_metadata).await,
            Decision::Incremental(metadata) => match self.incremental_update(&request, &metadata).await {
                Ok(result) => Ok(result),
                Err(IncrementalFailure::FallBackToFull) => self.full_refresh(&request, Some(metadata)).await,
                Err(IncrementalFailure::Hard(e)) => Err(e),
            },
        }
    }

    fn decide(&self, existing: &Option<CatalogMetadata>, force_full: bool) -> Decision {
        if force_full {
            return Decision::FullRefresh;
        }
        match existing {
            None => Decision::FullRefresh,
            Some(metadata) => {
                let age = self.clock.now() - metadata.last_full_refresh;
                if age > self.full_refresh_threshold {
                    Decision::FullRefresh
                } else {
                    Decision::Incremental(metadata.clone())
                }
            }
        }
    }

    // ===== Full refresh =====

    async fn full_refresh(&self, request: &BuildRequest, previous: Option<CatalogMetadata>) -> ApiResult<IncrementalBuildResult> {
        let now = self.clock.now();
        let databases = self.list_databases(request).await?;

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let warnings: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let object_count = Arc::new(AtomicUsize::new(0));
        let schema_count = Arc::new(AtomicUsize::new(0));

        let mut entries_by_kind: HashMap<ObjectKind, Vec<CatalogEntry>> = HashMap::new();
        for kind in ObjectKind::ALL {
            entries_by_kind.insert(kind, Vec::new());
        }

        for database in &databases {
            if self.cancelled.load(Ordering::SeqCst) {
                tracing::info!(database, "catalog build cancelled before completion, prior snapshot preserved");
                return Err(ApiError::resource_busy("catalog build was cancelled"));
            }
            let schemas = self.list_schemas(database).await.unwrap_or_else(|e| {
                warnings.lock().unwrap().push(format!("listing schemas in {database} failed: {e}"));
                Vec::new()
            });
            schema_count.fetch_add(schemas.len(), Ordering::Relaxed);

            for schema in &schemas {
                for kind in ObjectKind::ALL {
                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                    let harvested = self.harvest_objects(database, schema, kind, request.include_ddl).await;
                    drop(permit);
                    match harvested {
                        Ok(objects) => {
                            object_count.fetch_add(objects.len(), Ordering::Relaxed);
                            if request.include_ddl {
                                for entry in &objects {
                                    if let Err(e) = store::write_ddl(&request.output_dir, entry) {
                                        warnings.lock().unwrap().push(format!("writing ddl for {}: {e}", entry.object_ref.fqn()));
                                    }
                                }
                            }
                            entries_by_kind.get_mut(&kind).expect("all kinds seeded above").extend(objects);
                        }
                        Err(e) => {
                            warnings.lock().unwrap().push(format!("harvesting {kind:?} in {database}.{schema} failed: {e}"));
                        }
                    }
                }
            }
        }

        let total_objects = object_count.load(Ordering::Relaxed);
        let metadata = CatalogMetadata {
            last_build: now,
            last_full_refresh: now,
            databases: databases.clone(),
            total_objects,
            version: previous.map(|p| p.version + 1).unwrap_or(1),
            schema_count: schema_count.load(Ordering::Relaxed),
            table_count: entries_by_kind[&ObjectKind::Table].len(),
        };
        store::write_full_refresh(&request.output_dir, &entries_by_kind, &databases, &metadata)?;

        Ok(IncrementalBuildResult {
            status: BuildStatus::FullRefresh,
            last_build: now,
            changes: total_objects,
            changed_objects: entries_by_kind.values().flatten().map(|e| e.object_ref.fqn()).collect(),
            metadata,
            warnings: warnings.lock().unwrap().clone(),
        })
    }

    // ===== Incremental update =====

    async fn incremental_update(&self, request: &BuildRequest, metadata: &CatalogMetadata) -> Result<IncrementalBuildResult, IncrementalFailure> {
        let now = self.clock.now();
        let mut warnings = Vec::new();

        let primary = self.primary_change_set(&metadata.databases, metadata.last_build).await;
        let primary_changes = match primary {
            Ok(changes) => changes,
            Err(e) if matches!(e, ApiError::Permission { .. } | ApiError::Configuration { .. }) => {
                warnings.push(format!("primary change-detection probe degraded: {e}"));
                return Err(IncrementalFailure::FallBackToFull);
            }
            Err(e) => return Err(IncrementalFailure::Hard(e)),
        };

        let safety_margin_start = metadata.last_build - self.account_usage_safety_margin;
        let safety_changes = match self.account_usage_change_set(&metadata.databases, safety_margin_start, metadata.last_build).await {
            Ok(changes) => changes,
            Err(e) if matches!(e, ApiError::Permission { .. } | ApiError::Configuration { .. }) => {
                warnings.push(format!("ACCOUNT_USAGE safety-margin probe unavailable, proceeding with primary probe only: {e}"));
                Vec::new()
            }
            Err(e) => return Err(IncrementalFailure::Hard(e)),
        };

        let mut change_set: HashMap<String, ObjectRef> = HashMap::new();
        for obj_ref in primary_changes.into_iter().chain(safety_changes) {
            change_set.insert(obj_ref.fqn(), obj_ref);
        }

        if change_set.is_empty() {
            let refreshed = CatalogMetadata { last_build: now, ..metadata.clone() };
            store::write_metadata(&request.output_dir, &refreshed).map_err(IncrementalFailure::Hard)?;
            return Ok(IncrementalBuildResult {
                status: BuildStatus::UpToDate,
                last_build: now,
                changes: 0,
                changed_objects: vec![],
                metadata: refreshed,
                warnings,
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut refreshed_entries = Vec::new();
        for obj_ref in change_set.values() {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let entry = self
                .harvest_one(obj_ref, request.include_ddl)
                .await
                .map_err(|e| warnings.push(format!("re-harvesting {} failed: {e}", obj_ref.fqn())))
                .ok();
            drop(permit);
            if let Some(entry) = entry {
                refreshed_entries.push(entry);
            }
        }

        for kind in ObjectKind::ALL {
            let mut existing: Vec<CatalogEntry> = store::read_jsonl(&request.output_dir, kind).map_err(IncrementalFailure::Hard)?;
            let upserted: Vec<&CatalogEntry> = refreshed_entries.iter().filter(|e| e.object_ref.object_kind == kind).collect();
            if upserted.is_empty() {
                continue;
            }
            for entry in upserted {
                if let Some(slot) = existing.iter_mut().find(|e| e.object_ref == entry.object_ref) {
                    *slot = entry.clone();
                } else {
                    existing.push(entry.clone());
                }
                if request.include_ddl {
                    store::write_ddl(&request.output_dir, entry).map_err(IncrementalFailure::Hard)?;
                }
            }
            store::write_jsonl(&request.output_dir, kind, &existing).map_err(IncrementalFailure::Hard)?;
        }

        let total_objects: usize = ObjectKind::ALL
            .iter()
            .map(|k| store::read_jsonl::<CatalogEntry>(&request.output_dir, *k).map(|v| v.len()).unwrap_or(0))
            .sum();
        let table_count = store::read_jsonl::<CatalogEntry>(&request.output_dir, ObjectKind::Table).map(|v| v.len()).unwrap_or(0);

        let new_metadata = CatalogMetadata {
            last_build: now,
            last_full_refresh: metadata.last_full_refresh,
            databases: metadata.databases.clone(),
            total_objects,
            version: metadata.version + 1,
            schema_count: metadata.schema_count,
            table_count,
        };
        store::write_metadata(&request.output_dir, &new_metadata).map_err(IncrementalFailure::Hard)?;

        Ok(IncrementalBuildResult {
            status: BuildStatus::IncrementalUpdate,
            last_build: now,
            changes: change_set.len(),
            changed_objects: change_set.keys().cloned().collect(),
            metadata: new_metadata,
            warnings,
        })
    }

    // ===== Snowflake probes =====

    async fn list_databases(&self, request: &BuildRequest) -> ApiResult<Vec<String>> {
        if let Some(db) = &request.database {
            return Ok(vec![db.to_ascii_uppercase()]);
        }
        let rows = self.backend.run("SELECT DATABASE_NAME FROM INFORMATION_SCHEMA.DATABASES", &ExecContext::default()).await?;
        Ok(rows.rows.iter().filter_map(|r| r.first()).filter_map(text_value).collect())
    }

    async fn list_schemas(&self, database: &str) -> ApiResult<Vec<String>> {
        let sql = format!("SELECT SCHEMA_NAME FROM {database}.INFORMATION_SCHEMA.SCHEMATA");
        let rows = self.backend.run(&sql, &ExecContext::default()).await?;
        Ok(rows.rows.iter().filter_map(|r| r.first()).filter_map(text_value).collect())
    }

    async fn harvest_objects(&self, database: &str, schema: &str, kind: ObjectKind, include_ddl: bool) -> ApiResult<Vec<CatalogEntry>> {
        let sql = list_objects_sql(database, schema, kind);
        let rows = self.backend.run(&sql, &ExecContext::default()).await?;
        let mut entries = Vec::with_capacity(rows.rows.len());
        for row in &rows.rows {
            let Some(name) = row.first().and_then(text_value) else { continue };
            let object_ref = ObjectRef::new(database, schema, &name, kind);
            let columns = self.fetch_columns(&object_ref).await.unwrap_or_default();
            let ddl = if include_ddl && kind.carries_sql() {
                self.fetch_ddl(&object_ref).await.ok()
            } else {
                None
            };
            entries.push(CatalogEntry {
                object_ref,
                columns,
                ddl,
                last_ddl: None,
                owner: None,
                comment: None,
                tags: vec![],
            });
        }
        Ok(entries)
    }

    async fn harvest_one(&self, object_ref: &ObjectRef, include_ddl: bool) -> ApiResult<CatalogEntry> {
        let columns = self.fetch_columns(object_ref).await.unwrap_or_default();
        let ddl = if include_ddl && object_ref.object_kind.carries_sql() { self.fetch_ddl(object_ref).await.ok() } else { None };
        Ok(CatalogEntry {
            object_ref: object_ref.clone(),
            columns,
            ddl,
            last_ddl: None,
            owner: None,
            comment: None,
            tags: vec![],
        })
    }

    async fn fetch_columns(&self, object_ref: &ObjectRef) -> ApiResult<Vec<ColumnInfo>> {
        let sql = format!(
            "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COMMENT FROM {}.INFORMATION_SCHEMA.COLUMNS WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}'",
            object_ref.database, object_ref.schema, object_ref.name
        );
        let rows = self.backend.run(&sql, &ExecContext::default()).await?;
        Ok(rows
            .rows
            .iter()
            .filter_map(|r| {
                let name = text_value(r.first()?)?;
                let data_type = text_value(r.get(1)?)?;
                let nullable = text_value(r.get(2)?).map(|v| v.eq_ignore_ascii_case("YES")).unwrap_or(true);
                let comment = r.get(3).and_then(text_value);
                Some(ColumnInfo { name, data_type, nullable, comment })
            })
            .collect())
    }

    async fn fetch_ddl(&self, object_ref: &ObjectRef) -> ApiResult<String> {
        let sql = format!("SELECT GET_DDL('{}', '{}')", object_ref.object_kind.ddl_type_name(), object_ref.fqn());
        let rows = self.backend.run(&sql, &ExecContext::default()).await?;
        rows.rows
            .first()
            .and_then(|r| r.first())
            .and_then(text_value)
            .ok_or_else(|| ApiError::not_found(format!("GET_DDL returned no rows for {}", object_ref.fqn()), vec![]))
    }

    async fn primary_change_set(&self, databases: &[String], last_build: DateTime<Utc>) -> ApiResult<Vec<ObjectRef>> {
        let mut changed = Vec::new();
        for database in databases {
            let sql = format!(
                "SELECT TABLE_SCHEMA, TABLE_NAME FROM {database}.INFORMATION_SCHEMA.TABLES WHERE LAST_DDL > '{}'",
                last_build.to_rfc3339()
            );
            let rows = self.backend.run(&sql, &ExecContext::default()).await?;
            for row in &rows.rows {
                if let (Some(schema), Some(name)) = (row.first().and_then(text_value), row.get(1).and_then(text_value)) {
                    changed.push(ObjectRef::new(database, &schema, &name, ObjectKind::Table));
                }
            }
        }
        Ok(changed)
    }

    async fn account_usage_change_set(
        &self,
        databases: &[String],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> ApiResult<Vec<ObjectRef>> {
        let mut changed = Vec::new();
        for database in databases {
            let sql = format!(
                "SELECT TABLE_SCHEMA, TABLE_NAME FROM SNOWFLAKE.ACCOUNT_USAGE.TABLES WHERE TABLE_CATALOG = '{database}' AND LAST_ALTERED > '{}' AND LAST_ALTERED <= '{}' AND DELETED IS NULL",
                window_start.to_rfc3339(),
                window_end.to_rfc3339()
            );
            let rows = self.backend.run(&sql, &ExecContext::default()).await?;
            for row in &rows.rows {
                if let (Some(schema), Some(name)) = (row.first().and_then(text_value), row.get(1).and_then(text_value)) {
                    changed.push(ObjectRef::new(database, &schema, &name, ObjectKind::Table));
                }
            }
        }
        Ok(changed)
    }
}

fn text_value(v: &RowValue) -> Option<String> {
    match v {
        RowValue::Text(s) => Some(s.clone()),
        RowValue::Integer(i) => Some(i.to_string()),
        _ => None,
    }
}

fn list_objects_sql(database: &str, schema: &str, kind: ObjectKind) -> String {
    match kind {
        ObjectKind::Table => format!("SHOW TABLES IN SCHEMA {database}.{schema}"),
        ObjectKind::View => format!("SHOW VIEWS IN SCHEMA {database}.{schema}"),
        ObjectKind::MaterializedView => format!("SHOW MATERIALIZED VIEWS IN SCHEMA {database}.{schema}"),
        ObjectKind::DynamicTable => format!("SHOW DYNAMIC TABLES IN SCHEMA {database}.{schema}"),
        ObjectKind::ExternalTable => format!("SHOW EXTERNAL TABLES IN SCHEMA {database}.{schema}"),
        ObjectKind::Stage => format!("SHOW STAGES IN SCHEMA {database}.{schema}"),
        ObjectKind::Function => format!("SHOW USER FUNCTIONS IN SCHEMA {database}.{schema}"),
        ObjectKind::Procedure => format!("SHOW PROCEDURES IN SCHEMA {database}.{schema}"),
        ObjectKind::Task => format!("SHOW TASKS IN SCHEMA {database}.{schema}"),
    }
}

enum Decision {
    FullRefresh,
    Incremental(CatalogMetadata),
}

enum IncrementalFailure {
    FallBackToFull,
    Hard(ApiError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::executor::mock::MockSnowflakeExecutor;
    use crate::executor::Rows;
    use crate::utils::clock::FixedClock;

    fn builder_with(executor: Arc<MockSnowflakeExecutor>) -> CatalogBuilder {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let breaker = Arc::new(CircuitBreaker::new("test", 5, 30, clock.clone()));
        CatalogBuilder::new(SnowflakeBackend::new(executor, breaker), 2, ChronoDuration::days(7), ChronoDuration::hours(3), clock)
    }

    #[tokio::test]
    async fn full_refresh_on_first_build() {
        let executor = Arc::new(MockSnowflakeExecutor::new("test"));
        // list_databases
        executor.push_response(Ok(Rows { columns: vec!["DATABASE_NAME".into()], rows: vec![vec![RowValue::Text("ANALYTICS".into())]] }));
        // list_schemas
        executor.push_response(Ok(Rows { columns: vec!["SCHEMA_NAME".into()], rows: vec![vec![RowValue::Text("PUBLIC".into())]] }));
        // one harvest_objects call per ObjectKind (9 kinds), each empty
        for _ in 0..ObjectKind::ALL.len() {
            executor.push_response(Ok(Rows { columns: vec!["NAME".into()], rows: vec![] }));
        }
        let builder = builder_with(executor);
        let dir = tempfile::tempdir().unwrap();
        let result = builder
            .build(BuildRequest { output_dir: dir.path().to_path_buf(), database: Some("analytics".into()), force_full: false, include_ddl: false })
            .await
            .unwrap();
        assert_eq!(result.status, BuildStatus::FullRefresh);
        assert!(store::read_metadata(dir.path()).is_some());
    }

    #[tokio::test]
    async fn second_build_with_no_changes_is_up_to_date() {
        let executor = Arc::new(MockSnowflakeExecutor::new("test"));
        executor.push_response(Ok(Rows { columns: vec!["DATABASE_NAME".into()], rows: vec![vec![RowValue::Text("ANALYTICS".into())]] }));
        executor.push_response(Ok(Rows { columns: vec!["SCHEMA_NAME".into()], rows: vec![] }));
        let builder = builder_with(executor.clone());
        let dir = tempfile::tempdir().unwrap();
        builder
            .build(BuildRequest { output_dir: dir.path().to_path_buf(), database: Some("analytics".into()), force_full: false, include_ddl: false })
            .await
            .unwrap();

        // primary + safety-margin probes both empty
        executor.push_response(Ok(Rows { columns: vec![], rows: vec![] }));
        executor.push_response(Ok(Rows { columns: vec![], rows: vec![] }));
        let second = builder
            .build(BuildRequest { output_dir: dir.path().to_path_buf(), database: Some("analytics".into()), force_full: false, include_ddl: false })
            .await
            .unwrap();
        assert_eq!(second.status, BuildStatus::UpToDate);
    }

    #[tokio::test]
    async fn concurrent_build_attempt_is_busy() {
        let executor = Arc::new(MockSnowflakeExecutor::new("test"));
        let dir = tempfile::tempdir().unwrap();
        let _lock = store::acquire_lock(dir.path()).unwrap();
        let builder = builder_with(executor);
        let result = builder
            .build(BuildRequest { output_dir: dir.path().to_path_buf(), database: Some("analytics".into()), force_full: false, include_ddl: false })
            .await;
        assert!(matches!(result, Err(ApiError::ResourceBusy { .. })));
    }
}
