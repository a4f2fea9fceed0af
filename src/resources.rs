//! Resource Supervisor (C6): a static dependency DAG over
//! {profile, connection, catalog, cortex_enabled}, gating tool
//! availability (spec §3 "get_resource_status", §4.6).
//!
//! Resource gating must never contact Snowflake (spec §8 property 6), so
//! "connection" health here is read from a cache this supervisor owns and
//! the Health Monitor populates after its own probe
//! (`HealthMonitor::check_connection`) — the supervisor itself never
//! probes the backend.

use crate::profile::ProfileValidator;
use crate::utils::clock::Clock;
use crate::utils::TtlCache;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Ready,
    Initializing,
    Degraded,
    Unavailable,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
    pub available: bool,
    pub status: ResourceState,
    pub dependencies_met: bool,
    pub blocking_issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyHealth {
    pub name: String,
    pub healthy: bool,
    pub detail: Option<String>,
}

const RESOURCE_NAMES: [&str; 4] = ["catalog", "lineage", "dependency_graph", "cortex_search"];

pub struct ResourceSupervisor {
    profile_name: String,
    profile_validator: Arc<ProfileValidator>,
    connection_cache: TtlCache<&'static str, bool>,
    cortex_enabled: bool,
}

impl ResourceSupervisor {
    pub fn new(
        profile_validator: Arc<ProfileValidator>,
        _catalog_dir: PathBuf,
        cortex_enabled: bool,
        connection_ttl_secs: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            profile_name: "default".to_string(),
            profile_validator,
            connection_cache: TtlCache::new(connection_ttl_secs, clock),
            cortex_enabled,
        }
    }

    pub fn with_profile_name(mut self, name: impl Into<String>) -> Self {
        self.profile_name = name.into();
        self
    }

    /// Called by the Health Monitor after it probes the backend, so
    /// gating never needs to contact Snowflake itself.
    pub fn record_connection_result(&self, healthy: bool) {
        self.connection_cache.insert("connection", healthy);
    }

    fn profile_healthy(&self) -> (bool, Option<String>) {
        let validation = self.profile_validator.validate(&self.profile_name);
        if validation.valid {
            (true, None)
        } else {
            (false, validation.errors.first().cloned())
        }
    }

    fn connection_healthy(&self) -> (bool, Option<String>) {
        match self.connection_cache.get(&"connection") {
            Some(true) => (true, None),
            Some(false) => (false, Some("last connection probe failed".to_string())),
            None => (false, Some("connection health unknown; no probe run yet".to_string())),
        }
    }

    fn dependencies_for(&self, resource: &str) -> Vec<&'static str> {
        match resource {
            "catalog" => vec!["profile", "connection"],
            "lineage" => vec!["profile", "connection", "catalog"],
            "dependency_graph" => vec!["profile", "connection"],
            "cortex_search" => vec!["profile", "connection", "cortex_enabled"],
            _ => vec![],
        }
    }

    fn dependency_health(&self, dependency: &str) -> DependencyHealth {
        match dependency {
            "profile" => {
                let (healthy, detail) = self.profile_healthy();
                DependencyHealth { name: "profile".to_string(), healthy, detail }
            }
            "connection" => {
                let (healthy, detail) = self.connection_healthy();
                DependencyHealth { name: "connection".to_string(), healthy, detail }
            }
            "catalog" => {
                let status = self.resource_status("catalog");
                DependencyHealth {
                    name: "catalog".to_string(),
                    healthy: status.available,
                    detail: status.blocking_issues.first().cloned(),
                }
            }
            "cortex_enabled" => DependencyHealth {
                name: "cortex_enabled".to_string(),
                healthy: self.cortex_enabled,
                detail: (!self.cortex_enabled).then(|| "cortex search disabled in configuration".to_string()),
            },
            other => DependencyHealth { name: other.to_string(), healthy: false, detail: Some("unknown dependency".to_string()) },
        }
    }

    fn resource_status(&self, resource: &str) -> ResourceStatus {
        let deps = self.dependencies_for(resource);
        let health: Vec<DependencyHealth> = deps.iter().map(|d| self.dependency_health(d)).collect();
        let blocking_issues: Vec<String> =
            health.iter().filter(|h| !h.healthy).map(|h| h.detail.clone().unwrap_or_else(|| format!("{} unhealthy", h.name))).collect();
        let dependencies_met = blocking_issues.is_empty();

        let status = if dependencies_met {
            ResourceState::Ready
        } else if health.iter().any(|h| h.healthy) {
            ResourceState::Degraded
        } else {
            ResourceState::Unavailable
        };

        ResourceStatus { available: dependencies_met, status, dependencies_met, blocking_issues }
    }

    /// Per spec §4.6: status for one resource, or all if `name` is `None`.
    pub fn get_resource_status(&self, name: Option<&str>) -> HashMap<String, ResourceStatus> {
        match name {
            Some(n) => {
                let mut map = HashMap::new();
                map.insert(n.to_string(), self.resource_status(n));
                map
            }
            None => RESOURCE_NAMES.iter().map(|n| (n.to_string(), self.resource_status(n))).collect(),
        }
    }

    /// Supplemented operation (SPEC_FULL §11): the dependency list and
    /// each dependency's current health, for one resource or all.
    pub fn check_resource_dependencies(&self, name: Option<&str>) -> HashMap<String, Vec<DependencyHealth>> {
        let names: Vec<&str> = match name {
            Some(n) => vec![n],
            None => RESOURCE_NAMES.to_vec(),
        };
        names
            .into_iter()
            .map(|n| (n.to_string(), self.dependencies_for(n).iter().map(|d| self.dependency_health(d)).collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::FixedClock;
    use chrono::Utc;

    fn supervisor_with_valid_profile() -> (ResourceSupervisor, tempfile::NamedTempFile) {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [default]
            name = "default"
            account = "acme"
            user = "bob"
            auth_kind = "password"
            "#
        )
        .unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let validator = Arc::new(ProfileValidator::new(file.path().to_path_buf(), 30, clock.clone()));
        (ResourceSupervisor::new(validator, PathBuf::from("/nonexistent"), false, 60, clock), file)
    }

    #[test]
    fn catalog_unavailable_without_connection_probe() {
        let (supervisor, _file) = supervisor_with_valid_profile();
        let status = supervisor.get_resource_status(Some("catalog"));
        let catalog = &status["catalog"];
        assert!(!catalog.available);
        assert_eq!(catalog.status, ResourceState::Degraded);
    }

    #[test]
    fn catalog_ready_once_profile_and_connection_are_healthy() {
        let (supervisor, _file) = supervisor_with_valid_profile();
        supervisor.record_connection_result(true);
        let status = supervisor.get_resource_status(Some("catalog"));
        assert!(status["catalog"].available);
        assert_eq!(status["catalog"].status, ResourceState::Ready);
    }

    #[test]
    fn lineage_depends_transitively_on_catalog() {
        let (supervisor, _file) = supervisor_with_valid_profile();
        supervisor.record_connection_result(true);
        let status = supervisor.get_resource_status(Some("lineage"));
        assert!(status["lineage"].available);
    }

    #[test]
    fn cortex_search_unavailable_when_disabled() {
        let (supervisor, _file) = supervisor_with_valid_profile();
        supervisor.record_connection_result(true);
        let status = supervisor.get_resource_status(Some("cortex_search"));
        assert!(!status["cortex_search"].available);
        assert!(status["cortex_search"].blocking_issues.iter().any(|i| i.contains("disabled")));
    }

    #[test]
    fn check_resource_dependencies_reports_each_dependency() {
        let (supervisor, _file) = supervisor_with_valid_profile();
        supervisor.record_connection_result(true);
        let deps = supervisor.check_resource_dependencies(Some("catalog"));
        let catalog_deps = &deps["catalog"];
        assert_eq!(catalog_deps.len(), 2);
        assert!(catalog_deps.iter().all(|d| d.healthy));
    }
}
