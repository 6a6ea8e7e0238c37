//! Health and sync status endpoints.

use actix_web::{HttpResponse, get, web};
use chrono::Utc;
use serde::Serialize;

use crate::services::SharedSyncStatus;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

/// Health check endpoint.
///
/// Returns 200 if the service is running.
#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Outcome of the sync cycles run so far.
///
/// Returns 503 while the most recent cycle failed.
#[get("/status")]
pub async fn status(sync_status: web::Data<SharedSyncStatus>) -> HttpResponse {
    let snapshot = sync_status.read().await.clone();
    if snapshot.last_error.is_some() {
        HttpResponse::ServiceUnavailable().json(snapshot)
    } else {
        HttpResponse::Ok().json(snapshot)
    }
}

/// Configure health routes.
pub fn configure_health_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health).service(status);
}
