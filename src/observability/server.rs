//! Health report HTTP server for container orchestration
//!
//! - `GET /{path}` runs the registry and returns the report. Healthy and
//!   degraded reports answer 200, unhealthy ones 503.
//! - `GET /live` answers 200 as long as the process serves requests.
//! - `GET /` lists the endpoints.

use crate::health::{HealthCheckRegistry, HealthReport, HealthStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use warp::http::StatusCode;
use warp::path::FullPath;
use warp::Filter;

/// Path segment of the liveness endpoint
pub const LIVENESS_PATH: &str = "live";

/// HTTP health report server
pub struct HealthServer {
    registry: Arc<HealthCheckRegistry>,
    port: u16,
    path: String,
    tag: Option<String>,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: BTreeMap<String, String>,
}

impl HealthServer {
    pub fn new<S: Into<String>>(registry: Arc<HealthCheckRegistry>, port: u16, path: S) -> Self {
        Self {
            registry,
            port,
            path: path.into().trim_matches('/').to_string(),
            tag: None,
        }
    }

    /// Only run checks carrying `tag` on the report endpoint
    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn report_path(&self) -> String {
        format!("/{}", self.path)
    }

    /// Run the checks this server reports on
    pub async fn report(&self) -> HealthReport {
        match &self.tag {
            Some(tag) => self.registry.check_health_tagged(tag).await,
            None => self.registry.check_health().await,
        }
    }

    /// All routes served by [`HealthServer::start`]
    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let report_server = self.clone();
        let root_server = self;

        // GET /live - liveness probe
        let live_route = warp::path(LIVENESS_PATH)
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: Utc::now(),
                })
            });

        // GET /{path} - aggregated health report
        let report_route = warp::get()
            .and(warp::path::full())
            .and_then(move |full: FullPath| {
                let server = report_server.clone();
                async move {
                    if full.as_str() != server.report_path() {
                        return Err(warp::reject::not_found());
                    }
                    let report = server.report().await;
                    Ok(warp::reply::with_status(
                        warp::reply::json(&report),
                        status_code(report.status),
                    ))
                }
            });

        // GET / - endpoint listing
        let root_route = warp::path::end().and(warp::get()).and_then(move || {
            let server = root_server.clone();
            async move {
                let mut endpoints = BTreeMap::new();
                endpoints.insert(
                    server.report_path(),
                    "Aggregated health report".to_string(),
                );
                endpoints.insert(format!("/{LIVENESS_PATH}"), "Liveness probe".to_string());
                Ok::<_, Infallible>(warp::reply::json(&ApiDocumentationResponse { endpoints }))
            }
        });

        live_route.or(root_route).or(report_route)
    }

    /// Serve until `shutdown` resolves
    pub async fn start<F>(self: Arc<Self>, shutdown: F) -> Result<(), warp::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let report_path = self.report_path();

        let (bound, server) =
            warp::serve(self.routes()).try_bind_with_graceful_shutdown(addr, shutdown)?;
        info!("Health server listening on {} at {}", bound, report_path);
        server.await;

        info!("Health server stopped");
        Ok(())
    }
}

/// HTTP status for a report: only an unhealthy report fails the probe
pub fn status_code(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}
