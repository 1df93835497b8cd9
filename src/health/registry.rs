//! Named health check registrations and aggregated reports
//!
//! [`HealthChecksBuilder`] collects checks under unique names. The MQTT
//! shortcuts build one shared [`MqttHealthCheck`] per registration, so every
//! run of that registration reuses the same broker connection.
//!
//! [`HealthCheckRegistry`] runs the registered checks concurrently, enforces
//! per-check timeouts through the cancellation token handed to each check, and
//! folds the verdicts into a [`HealthReport`] whose status is the worst entry.

use crate::client::{
    DirectMqttClient, ManagedMqttClient, ManagedMqttClientOptions, MqttClientOptions,
};
use crate::error::{HealthError, HealthResult};
use crate::health::mqtt::MqttHealthCheck;
use crate::health::{HealthCheck, HealthCheckContext, HealthCheckResult, HealthStatus};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn, Instrument};

/// Registration name used by the MQTT shortcuts unless overridden
pub const DEFAULT_MQTT_CHECK_NAME: &str = "Mqtt";

/// How long a timed-out check may take to honor cancellation
const CANCELLATION_GRACE: Duration = Duration::from_millis(250);

const TIMED_OUT_REASON: &str = "Health check timed out";

/// Registration settings for the MQTT shortcuts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttCheckOptions {
    pub name: String,
    pub failure_status: HealthStatus,
    pub tags: BTreeSet<String>,
    pub timeout: Option<Duration>,
}

impl Default for MqttCheckOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_MQTT_CHECK_NAME.to_string(),
            failure_status: HealthStatus::Unhealthy,
            tags: BTreeSet::new(),
            timeout: None,
        }
    }
}

impl MqttCheckOptions {
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_failure_status(mut self, failure_status: HealthStatus) -> Self {
        self.failure_status = failure_status;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A check plus the settings it runs under
#[derive(Clone)]
pub struct HealthCheckRegistration {
    name: String,
    check: Arc<dyn HealthCheck>,
    failure_status: HealthStatus,
    tags: BTreeSet<String>,
    timeout: Option<Duration>,
}

impl HealthCheckRegistration {
    pub fn new<S: Into<String>>(name: S, check: Arc<dyn HealthCheck>) -> HealthResult<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            check,
            failure_status: HealthStatus::Unhealthy,
            tags: BTreeSet::new(),
            timeout: None,
        })
    }

    pub fn with_failure_status(mut self, failure_status: HealthStatus) -> Self {
        self.failure_status = failure_status;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn failure_status(&self) -> HealthStatus {
        self.failure_status
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn from_mqtt(options: MqttCheckOptions, check: Arc<dyn HealthCheck>) -> Self {
        Self {
            name: options.name,
            check,
            failure_status: options.failure_status,
            tags: options.tags,
            timeout: options.timeout,
        }
    }
}

impl fmt::Debug for HealthCheckRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthCheckRegistration")
            .field("name", &self.name)
            .field("failure_status", &self.failure_status)
            .field("tags", &self.tags)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn validate_name(name: &str) -> HealthResult<()> {
    if name.trim().is_empty() {
        return Err(HealthError::invalid_argument(
            "name",
            "must not be empty or whitespace",
        ));
    }
    Ok(())
}

/// Collects health check registrations
#[derive(Default)]
pub struct HealthChecksBuilder {
    registrations: Vec<HealthCheckRegistration>,
    mqtt_checks: Vec<Arc<MqttHealthCheck>>,
}

impl fmt::Debug for HealthChecksBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthChecksBuilder")
            .field("registrations", &self.registrations)
            .field("mqtt_checks", &self.mqtt_checks.len())
            .finish()
    }
}

impl HealthChecksBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an arbitrary check
    pub fn add_check(&mut self, registration: HealthCheckRegistration) -> HealthResult<&mut Self> {
        self.ensure_registrable(&registration.name, registration.timeout)?;
        debug!(name = %registration.name, "Registered health check");
        self.registrations.push(registration);
        Ok(self)
    }

    /// Register a broker check around a self-reconnecting client.
    ///
    /// Registration settings are validated before the client is touched; the
    /// client is started once, here, on a background task.
    pub fn add_mqtt_managed(
        &mut self,
        client: Arc<dyn ManagedMqttClient>,
        options: ManagedMqttClientOptions,
        check: MqttCheckOptions,
    ) -> HealthResult<&mut Self> {
        self.ensure_registrable(&check.name, check.timeout)?;
        let probe = Arc::new(MqttHealthCheck::managed(client, options)?);
        self.push_mqtt(check, probe);
        Ok(self)
    }

    /// Register a broker check around a directly-owned client.
    ///
    /// When `options` is present the client is connected once, in the
    /// background, and never reconnected by the check.
    pub fn add_mqtt_direct(
        &mut self,
        client: Arc<dyn DirectMqttClient>,
        options: Option<MqttClientOptions>,
        check: MqttCheckOptions,
    ) -> HealthResult<&mut Self> {
        self.ensure_registrable(&check.name, check.timeout)?;
        let probe = Arc::new(MqttHealthCheck::direct(client, options)?);
        self.push_mqtt(check, probe);
        Ok(self)
    }

    pub fn build(self) -> HealthCheckRegistry {
        HealthCheckRegistry {
            registrations: self.registrations,
            mqtt_checks: self.mqtt_checks,
        }
    }

    fn ensure_registrable(&self, name: &str, timeout: Option<Duration>) -> HealthResult<()> {
        validate_name(name)?;
        if self.registrations.iter().any(|r| r.name == name) {
            return Err(HealthError::invalid_argument(
                "name",
                format!("a health check named '{name}' is already registered"),
            ));
        }
        if timeout == Some(Duration::ZERO) {
            return Err(HealthError::invalid_argument(
                "timeout",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    fn push_mqtt(&mut self, options: MqttCheckOptions, probe: Arc<MqttHealthCheck>) {
        debug!(name = %options.name, mode = probe.mode().as_str(), "Registered MQTT health check");
        self.mqtt_checks.push(probe.clone());
        self.registrations
            .push(HealthCheckRegistration::from_mqtt(options, probe));
    }
}

/// Outcome of one registration within a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReportEntry {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Aggregated outcome of one registry run
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub total_duration_ms: u64,
    pub checked_at: DateTime<Utc>,
    pub entries: BTreeMap<String, HealthReportEntry>,
}

impl HealthReport {
    /// Build a report; the overall status is the worst entry, healthy if none
    pub fn from_entries(entries: BTreeMap<String, HealthReportEntry>, elapsed: Duration) -> Self {
        let status = entries
            .values()
            .map(|entry| entry.status)
            .min()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            total_duration_ms: elapsed.as_millis() as u64,
            checked_at: Utc::now(),
            entries,
        }
    }

    pub fn entry(&self, name: &str) -> Option<&HealthReportEntry> {
        self.entries.get(name)
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Runs registered checks and aggregates their verdicts
pub struct HealthCheckRegistry {
    registrations: Vec<HealthCheckRegistration>,
    mqtt_checks: Vec<Arc<MqttHealthCheck>>,
}

impl HealthCheckRegistry {
    pub fn builder() -> HealthChecksBuilder {
        HealthChecksBuilder::new()
    }

    pub fn registrations(&self) -> &[HealthCheckRegistration] {
        &self.registrations
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Run every registered check
    pub async fn check_health(&self) -> HealthReport {
        self.check_health_matching(|_| true).await
    }

    /// Run only the checks carrying `tag`
    pub async fn check_health_tagged(&self, tag: &str) -> HealthReport {
        self.check_health_matching(|registration| registration.tags.contains(tag))
            .await
    }

    pub async fn check_health_matching<F>(&self, predicate: F) -> HealthReport
    where
        F: Fn(&HealthCheckRegistration) -> bool,
    {
        let started = Instant::now();
        let runs = self
            .registrations
            .iter()
            .filter(|registration| predicate(registration))
            .cloned()
            .map(run_registration);

        let entries = join_all(runs).await.into_iter().collect();
        let report = HealthReport::from_entries(entries, started.elapsed());

        debug!(
            status = %report.status,
            checks = report.entries.len(),
            total_duration_ms = report.total_duration_ms,
            "Health report complete"
        );
        report
    }

    /// Stop or disconnect every broker client owned by an MQTT registration
    pub async fn shutdown(&self) {
        for check in &self.mqtt_checks {
            if let Err(e) = check.shutdown().await {
                warn!("Failed to shut down MQTT health check client: {}", e);
            }
        }
    }
}

async fn run_registration(registration: HealthCheckRegistration) -> (String, HealthReportEntry) {
    let span = crate::health_check_span!(check = %registration.name);

    async move {
        let started = Instant::now();
        let cancel = CancellationToken::new();
        let context = HealthCheckContext::new(registration.failure_status, cancel.clone());
        let failure_status = registration.failure_status;

        let check = registration.check.clone();
        // Dropping the run (e.g. an aborted HTTP request) aborts the check too
        let mut task = AbortOnDropHandle::new(tokio::spawn(async move {
            check.check_health(&context).await
        }));

        let result = match registration.timeout {
            None => joined(task.await, failure_status),
            Some(timeout) => match tokio::time::timeout(timeout, &mut task).await {
                Ok(outcome) => joined(outcome, failure_status),
                Err(_) => {
                    // Give the check a chance to report its own cancellation verdict
                    cancel.cancel();
                    match tokio::time::timeout(CANCELLATION_GRACE, &mut task).await {
                        Ok(outcome) => joined(outcome, failure_status),
                        Err(_) => {
                            task.abort();
                            warn!(
                                timeout_ms = timeout.as_millis() as u64,
                                "Health check timed out"
                            );
                            HealthCheckResult::failure(failure_status, TIMED_OUT_REASON)
                        }
                    }
                }
            },
        };

        let entry = HealthReportEntry {
            status: result.status,
            description: result.description,
            duration_ms: started.elapsed().as_millis() as u64,
            tags: registration.tags.iter().cloned().collect(),
        };
        (registration.name, entry)
    }
    .instrument(span)
    .await
}

fn joined(
    outcome: Result<HealthCheckResult, JoinError>,
    failure_status: HealthStatus,
) -> HealthCheckResult {
    match outcome {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            warn!("Health check panicked");
            HealthCheckResult::failure(failure_status, "Health check panicked")
        }
        Err(_) => HealthCheckResult::failure(failure_status, "Health check was cancelled"),
    }
}
