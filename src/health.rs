//! Health Monitor (C5): composite TTL-cached status across
//! {profile, connection, resources} (spec §3 "HealthReport", §4.5).
//!
//! Follows the donor's "never blocks the request path" philosophy
//! (`services/baseline_service.rs`): a stale-but-present result is
//! preferred over waiting, and a timed-out probe degrades rather than
//! propagating an error.

use crate::backend::SnowflakeBackend;
use crate::executor::ExecContext;
use crate::profile::ProfileValidator;
use crate::resources::ResourceSupervisor;
use crate::utils::clock::Clock;
use crate::utils::TtlCache;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    // Ordered worst-to-best so `min` in the healthy>degraded>unhealthy
    // lattice (spec §4.5) is `Ord::min` over this enum directly.
    Unhealthy,
    Degraded,
    Healthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall: ComponentStatus,
    pub components: ComponentStatuses,
    pub timestamp: DateTime<Utc>,
    pub server_uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatuses {
    pub profile: ComponentStatus,
    pub connection: ComponentStatus,
    pub resources: ComponentStatus,
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HealthMonitor {
    profile_name: String,
    profile_validator: Arc<ProfileValidator>,
    resource_supervisor: Arc<ResourceSupervisor>,
    backend: Option<Arc<SnowflakeBackend>>,
    cache: TtlCache<&'static str, ComponentStatus>,
    clock: Arc<dyn Clock>,
    started_at: DateTime<Utc>,
}

impl HealthMonitor {
    pub fn new(
        profile_name: impl Into<String>,
        profile_validator: Arc<ProfileValidator>,
        resource_supervisor: Arc<ResourceSupervisor>,
        backend: Option<Arc<SnowflakeBackend>>,
        ttl_secs: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let started_at = clock.now();
        Self {
            profile_name: profile_name.into(),
            profile_validator,
            resource_supervisor,
            backend,
            cache: TtlCache::new(ttl_secs, clock.clone()),
            clock,
            started_at,
        }
    }

    /// Never blocks beyond `PROBE_TIMEOUT` per component (spec §4.5).
    pub async fn health_check(&self) -> HealthReport {
        let profile = self.check_profile();
        let connection = self.check_connection().await;
        let resources = self.check_resources();

        let overall = profile.min(connection).min(resources);

        HealthReport {
            overall,
            components: ComponentStatuses { profile, connection, resources },
            timestamp: self.clock.now(),
            server_uptime_secs: (self.clock.now() - self.started_at).num_seconds(),
        }
    }

    fn check_profile(&self) -> ComponentStatus {
        if let Some(cached) = self.cache.get(&"profile") {
            return cached;
        }
        let validation = self.profile_validator.validate(&self.profile_name);
        let status = if validation.valid { ComponentStatus::Healthy } else { ComponentStatus::Unhealthy };
        self.cache.insert("profile", status);
        status
    }

    async fn check_connection(&self) -> ComponentStatus {
        if let Some(cached) = self.cache.get(&"connection") {
            return cached;
        }

        let Some(backend) = &self.backend else {
            let status = ComponentStatus::Degraded;
            self.cache.insert("connection", status);
            return status;
        };

        let ctx = ExecContext::default().with_timeout(PROBE_TIMEOUT);
        let (status, healthy) = match tokio::time::timeout(PROBE_TIMEOUT, backend.run("SELECT 1", &ctx)).await {
            Ok(Ok(_)) => (ComponentStatus::Healthy, true),
            Ok(Err(_)) => (ComponentStatus::Degraded, false),
            Err(_) => {
                tracing::warn!("connection health probe timed out after {:?}", PROBE_TIMEOUT);
                (ComponentStatus::Degraded, false)
            }
        };
        self.resource_supervisor.record_connection_result(healthy);
        self.cache.insert("connection", status);
        status
    }

    fn check_resources(&self) -> ComponentStatus {
        let statuses = self.resource_supervisor.get_resource_status(None);
        if statuses.values().all(|s| s.available) {
            ComponentStatus::Healthy
        } else if statuses.values().any(|s| s.available) {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Unhealthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceSupervisor;
    use crate::utils::clock::FixedClock;
    use std::path::PathBuf;

    fn monitor_without_backend() -> HealthMonitor {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let profile_validator =
            Arc::new(ProfileValidator::new(PathBuf::from("/nonexistent"), 30, clock.clone()));
        let resource_supervisor = Arc::new(ResourceSupervisor::new(
            profile_validator.clone(),
            PathBuf::from("/nonexistent"),
            false,
            60,
            clock.clone(),
        ));
        HealthMonitor::new("default", profile_validator, resource_supervisor, None, 30, clock)
    }

    #[tokio::test]
    async fn degraded_without_backend_and_missing_profile() {
        let monitor = monitor_without_backend();
        let report = monitor.health_check().await;
        assert_eq!(report.components.connection, ComponentStatus::Degraded);
        assert_eq!(report.components.profile, ComponentStatus::Unhealthy);
        assert_eq!(report.overall, ComponentStatus::Unhealthy);
    }

    #[test]
    fn lattice_orders_unhealthy_below_degraded_below_healthy() {
        assert!(ComponentStatus::Unhealthy < ComponentStatus::Degraded);
        assert!(ComponentStatus::Degraded < ComponentStatus::Healthy);
    }
}
