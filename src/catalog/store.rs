//! Catalog persistence: jsonl/json file I/O with write-temp-then-rename
//! atomicity and a filesystem lock file enforcing single-writer access to
//! an `output_dir` (spec §4.9, §5).

use super::{CatalogEntry, CatalogMetadata, ObjectKind};
use crate::utils::{ApiError, ApiResult};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const METADATA_FILE: &str = "_catalog_metadata.json";
const LOCK_FILE: &str = "_catalog.lock";

/// Held for the lifetime of one build. Dropping removes the lock file,
/// so a panicked or cancelled build never leaves the directory wedged.
pub struct BuildLock {
    path: PathBuf,
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Enforces "at most one Catalog Builder may run per `output_dir`" (spec
/// §5). A concurrent attempt fails fast with `ResourceBusy`.
pub fn acquire_lock(output_dir: &Path) -> ApiResult<BuildLock> {
    fs::create_dir_all(output_dir)
        .map_err(|e| ApiError::configuration(format!("cannot create output_dir {}: {e}", output_dir.display())))?;
    let path = output_dir.join(LOCK_FILE);
    match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(_) => Ok(BuildLock { path }),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(ApiError::resource_busy(format!("a catalog build is already in progress for {}", output_dir.display())))
        }
        Err(e) => Err(ApiError::configuration(format!("cannot acquire catalog lock: {e}"))),
    }
}

fn write_atomic(path: &Path, contents: &str) -> ApiResult<()> {
    let tmp = path.with_extension(format!("{}.tmp", path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")));
    let mut file = File::create(&tmp).map_err(|e| ApiError::configuration(format!("write {}: {e}", tmp.display())))?;
    file.write_all(contents.as_bytes()).map_err(|e| ApiError::configuration(format!("write {}: {e}", tmp.display())))?;
    file.sync_all().ok();
    fs::rename(&tmp, path).map_err(|e| ApiError::configuration(format!("rename {} -> {}: {e}", tmp.display(), path.display())))?;
    Ok(())
}

pub fn read_metadata(output_dir: &Path) -> Option<CatalogMetadata> {
    let path = output_dir.join(METADATA_FILE);
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

pub fn write_metadata(output_dir: &Path, metadata: &CatalogMetadata) -> ApiResult<()> {
    let json = serde_json::to_string_pretty(metadata).map_err(|e| ApiError::unknown(format!("serialize metadata: {e}")))?;
    write_atomic(&output_dir.join(METADATA_FILE), &json)
}

/// Reads a record-oriented file (spec §4.9 "one JSON object per line").
/// Missing file reads as empty, matching a never-yet-built catalog.
pub fn read_jsonl<T: DeserializeOwned>(output_dir: &Path, kind: ObjectKind) -> ApiResult<Vec<T>> {
    let path = output_dir.join(format!("{}.jsonl", kind.file_stem()));
    let Ok(file) = File::open(&path) else {
        return Ok(Vec::new());
    };
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| ApiError::configuration(format!("read {}: {e}", path.display())))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: T = serde_json::from_str(&line)
            .map_err(|e| ApiError::configuration(format!("malformed record in {}: {e}", path.display())))?;
        records.push(record);
    }
    Ok(records)
}

pub fn write_jsonl<T: Serialize>(output_dir: &Path, kind: ObjectKind, records: &[T]) -> ApiResult<()> {
    let mut body = String::new();
    for record in records {
        let line = serde_json::to_string(record).map_err(|e| ApiError::unknown(format!("serialize record: {e}")))?;
        body.push_str(&line);
        body.push('\n');
    }
    write_atomic(&output_dir.join(format!("{}.jsonl", kind.file_stem())), &body)
}

pub fn write_databases(output_dir: &Path, databases: &[String]) -> ApiResult<()> {
    let json = serde_json::to_string_pretty(databases).map_err(|e| ApiError::unknown(format!("serialize databases: {e}")))?;
    write_atomic(&output_dir.join("databases.json"), &json)
}

const STAGING_DIR: &str = ".staging";

/// Stages an entire full-refresh's output (every kind's jsonl, `databases.json`,
/// `_catalog_metadata.json`) in an isolated subdirectory, then commits it onto
/// `output_dir` with a sequence of same-filesystem renames ending in the
/// metadata file — so a crash mid-commit leaves either the old snapshot
/// (metadata still points at it) or the fully-staged new one, never a mix
/// that a reader could observe as internally inconsistent (spec §4.9).
pub fn write_full_refresh(
    output_dir: &Path,
    entries_by_kind: &HashMap<ObjectKind, Vec<CatalogEntry>>,
    databases: &[String],
    metadata: &CatalogMetadata,
) -> ApiResult<()> {
    let staging = output_dir.join(STAGING_DIR);
    let _ = fs::remove_dir_all(&staging);
    fs::create_dir_all(&staging).map_err(|e| ApiError::configuration(format!("mkdir {}: {e}", staging.display())))?;

    for kind in ObjectKind::ALL {
        write_jsonl(&staging, kind, &entries_by_kind[&kind])?;
    }
    write_databases(&staging, databases)?;
    write_metadata(&staging, metadata)?;

    for kind in ObjectKind::ALL {
        let name = format!("{}.jsonl", kind.file_stem());
        fs::rename(staging.join(&name), output_dir.join(&name))
            .map_err(|e| ApiError::configuration(format!("commit {name}: {e}")))?;
    }
    fs::rename(staging.join("databases.json"), output_dir.join("databases.json"))
        .map_err(|e| ApiError::configuration(format!("commit databases.json: {e}")))?;
    // Metadata commits last: it is the file every reader consults to decide
    // what state the catalog is in, so it must never point at data that
    // hasn't fully landed yet.
    fs::rename(staging.join(METADATA_FILE), output_dir.join(METADATA_FILE))
        .map_err(|e| ApiError::configuration(format!("commit {METADATA_FILE}: {e}")))?;

    let _ = fs::remove_dir_all(&staging);
    Ok(())
}

pub fn ddl_path(output_dir: &Path, entry: &CatalogEntry) -> PathBuf {
    output_dir
        .join("ddl")
        .join(&entry.object_ref.database)
        .join(&entry.object_ref.schema)
        .join(format!("{}.sql", entry.object_ref.name))
}

pub fn write_ddl(output_dir: &Path, entry: &CatalogEntry) -> ApiResult<()> {
    let Some(ddl) = &entry.ddl else { return Ok(()) };
    let path = ddl_path(output_dir, entry);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ApiError::configuration(format!("mkdir {}: {e}", parent.display())))?;
    }
    write_atomic(&path, ddl)
}

/// Reads every record file for every kind, used by the Lineage Engine and
/// by `get_catalog_summary`.
pub fn read_all_entries(output_dir: &Path) -> ApiResult<Vec<CatalogEntry>> {
    let mut all = Vec::new();
    for kind in ObjectKind::ALL {
        all.extend(read_jsonl::<CatalogEntry>(output_dir, kind)?);
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BuildStatus, CatalogMetadata};
    use chrono::Utc;

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let lock = acquire_lock(dir.path()).unwrap();
        assert!(acquire_lock(dir.path()).is_err());
        drop(lock);
        assert!(acquire_lock(dir.path()).is_ok());
    }

    #[test]
    fn metadata_round_trips_through_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = CatalogMetadata {
            last_build: Utc::now(),
            last_full_refresh: Utc::now(),
            databases: vec!["ANALYTICS".to_string()],
            total_objects: 3,
            version: 1,
            schema_count: 1,
            table_count: 2,
        };
        write_metadata(dir.path(), &metadata).unwrap();
        let read_back = read_metadata(dir.path()).unwrap();
        assert_eq!(read_back.total_objects, 3);
        assert_eq!(read_back.databases, vec!["ANALYTICS".to_string()]);
    }

    #[test]
    fn missing_metadata_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_metadata(dir.path()).is_none());
    }

    #[test]
    fn jsonl_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let entry = CatalogEntry {
            object_ref: super::super::ObjectRef::new("db", "schema", "t1", ObjectKind::Table),
            columns: vec![],
            ddl: None,
            last_ddl: None,
            owner: None,
            comment: None,
            tags: vec![],
        };
        write_jsonl(dir.path(), ObjectKind::Table, &[entry]).unwrap();
        let read_back: Vec<CatalogEntry> = read_jsonl(dir.path(), ObjectKind::Table).unwrap();
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back[0].object_ref.name, "T1");
        let _ = BuildStatus::UpToDate;
    }
}
