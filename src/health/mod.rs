//! Health check system
//!
//! Provides the health check trait, the tri-state verdict it returns, and the
//! per-invocation context handed in by the registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

pub mod mqtt;
pub mod registry;

pub use mqtt::{MqttHealthCheck, NOT_CONNECTED_REASON};
pub use registry::{
    HealthCheckRegistration, HealthCheckRegistry, HealthChecksBuilder, HealthReport,
    HealthReportEntry, MqttCheckOptions, DEFAULT_MQTT_CHECK_NAME,
};

/// Health status, ordered from worst to best
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unhealthy,
    Degraded,
    Healthy,
}

impl HealthStatus {
    /// Parse health status from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unhealthy" => Some(HealthStatus::Unhealthy),
            "degraded" => Some(HealthStatus::Degraded),
            "healthy" => Some(HealthStatus::Healthy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Healthy => "healthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of a single check invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl HealthCheckResult {
    pub fn new<S: Into<String>>(status: HealthStatus, description: Option<S>) -> Self {
        Self {
            status,
            description: description.map(Into::into),
        }
    }

    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            description: None,
        }
    }

    pub fn degraded<S: Into<String>>(description: S) -> Self {
        Self::new(HealthStatus::Degraded, Some(description))
    }

    pub fn unhealthy<S: Into<String>>(description: S) -> Self {
        Self::new(HealthStatus::Unhealthy, Some(description))
    }

    /// Failure verdict reported with the caller's configured severity
    pub fn failure<S: Into<String>>(failure_status: HealthStatus, description: S) -> Self {
        Self::new(failure_status, Some(description))
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Ambient data for one check invocation
#[derive(Debug, Clone)]
pub struct HealthCheckContext {
    /// Status to report when the check fails
    pub failure_status: HealthStatus,
    /// Fires when the caller stops waiting for the check
    pub cancellation: CancellationToken,
}

impl HealthCheckContext {
    pub fn new(failure_status: HealthStatus, cancellation: CancellationToken) -> Self {
        Self {
            failure_status,
            cancellation,
        }
    }
}

impl Default for HealthCheckContext {
    fn default() -> Self {
        Self::new(HealthStatus::Unhealthy, CancellationToken::new())
    }
}

/// Trait for components that can be health checked
///
/// Implementations report every failure through the returned verdict; a check
/// never errors out to its caller.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check_health(&self, context: &HealthCheckContext) -> HealthCheckResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering_worst_first() {
        assert!(HealthStatus::Unhealthy < HealthStatus::Degraded);
        assert!(HealthStatus::Degraded < HealthStatus::Healthy);
        assert_eq!(HealthStatus::default(), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_status_parse_case_insensitive() {
        assert_eq!(HealthStatus::parse("Healthy"), Some(HealthStatus::Healthy));
        assert_eq!(HealthStatus::parse("DEGRADED"), Some(HealthStatus::Degraded));
        assert_eq!(HealthStatus::parse("unhealthy"), Some(HealthStatus::Unhealthy));
        assert_eq!(HealthStatus::parse("unknown"), None);
        assert_eq!(HealthStatus::parse(""), None);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&HealthStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
        assert_eq!(HealthStatus::Healthy.to_string(), "healthy");
    }

    #[test]
    fn test_result_constructors() {
        assert!(HealthCheckResult::healthy().is_healthy());
        assert_eq!(HealthCheckResult::healthy().description, None);

        let degraded = HealthCheckResult::degraded("slow");
        assert_eq!(degraded.status, HealthStatus::Degraded);
        assert_eq!(degraded.description.as_deref(), Some("slow"));

        let failure = HealthCheckResult::failure(HealthStatus::Degraded, "down");
        assert_eq!(failure.status, HealthStatus::Degraded);
        assert!(!failure.is_healthy());
    }

    #[test]
    fn test_default_context_reports_unhealthy() {
        let context = HealthCheckContext::default();
        assert_eq!(context.failure_status, HealthStatus::Unhealthy);
        assert!(!context.cancellation.is_cancelled());
    }
}
