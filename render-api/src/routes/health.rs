use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use diesel::prelude::*;
use std::sync::Arc;

use render_shared::clients::db::checkout;
use render_shared::{HealthCheck, HealthResponse, HealthStatus};

use crate::AppState;

fn probe_database(state: &AppState) -> HealthCheck {
    let outcome = checkout(&state.db).and_then(|mut conn| {
        diesel::sql_query("SELECT 1")
            .execute(&mut conn)
            .map_err(Into::into)
    });
    match outcome {
        Ok(_) => HealthCheck { name: "database".into(), status: HealthStatus::Healthy, message: None },
        Err(e) => {
            tracing::error!(error = %e, "database health check failed");
            HealthCheck { name: "database".into(), status: HealthStatus::Unhealthy, message: None }
        }
    }
}

/// The database is required. The enhancer only degrades the service since
/// everything except enhancement keeps working without it.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let database = probe_database(&state);

    let enhancer = match state.enhancer.health().await {
        Ok(()) => HealthCheck { name: "enhancer".into(), status: HealthStatus::Healthy, message: None },
        Err(e) => {
            tracing::warn!(error = %e, "enhancer health check failed");
            HealthCheck { name: "enhancer".into(), status: HealthStatus::Degraded, message: None }
        }
    };

    let response = HealthResponse::healthy("render-api", env!("CARGO_PKG_VERSION"))
        .with_checks(vec![database, enhancer]);

    let status = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(response)).into_response()
}

/// Returns Prometheus metrics.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
