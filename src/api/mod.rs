//! API endpoints for the firewall control plane.
//!
//! This module maps the control surface onto HTTP: statistics and log reads,
//! rule list mutations, record ingestion from the request logger, and the
//! Prometheus scrape endpoint.

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder, ResponseError};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use crate::core::{FirewallControl, FirewallError};
use crate::models::TrafficRecord;

pub struct ApiState {
    pub control: Arc<FirewallControl>,
    pub metrics: Option<PrometheusHandle>,
}

/// API configuration function for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/health").route(web::get().to(health_check)))
            .service(web::resource("/stats").route(web::get().to(get_stats)))
            .service(
                web::resource("/logs")
                    .route(web::get().to(get_logs))
                    .route(web::post().to(append_log)),
            )
            .service(web::resource("/lists").route(web::get().to(get_lists)))
            .service(web::resource("/block_ip").route(web::post().to(block_ip)))
            .service(web::resource("/unblock_ip").route(web::post().to(unblock_ip)))
            .service(web::resource("/allow_ip").route(web::post().to(allow_ip)))
            .service(web::resource("/remove_allowed_ip").route(web::post().to(remove_allowed_ip)))
            .service(web::resource("/block_mac").route(web::post().to(block_mac)))
            .service(web::resource("/unblock_mac").route(web::post().to(unblock_mac))),
    )
    .service(web::resource("/metrics").route(web::get().to(render_metrics)));
}

/// Health check endpoint response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Error payload
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IpRequest {
    pub ip: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MacRequest {
    pub mac: String,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub minutes: Option<u64>,
}

impl ResponseError for FirewallError {
    fn status_code(&self) -> StatusCode {
        match self {
            FirewallError::InvalidEntry(_) | FirewallError::InvalidRecord(_) => StatusCode::BAD_REQUEST,
            FirewallError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FirewallError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        })
    }
}

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_stats(state: web::Data<ApiState>) -> Result<HttpResponse, FirewallError> {
    Ok(HttpResponse::Ok().json(state.control.get_stats().await?))
}

async fn get_logs(
    state: web::Data<ApiState>,
    query: web::Query<LogsQuery>,
) -> Result<HttpResponse, FirewallError> {
    Ok(HttpResponse::Ok().json(state.control.get_recent_logs(query.minutes).await?))
}

/// Ingest one record from the request-logging collaborator
async fn append_log(
    state: web::Data<ApiState>,
    record: web::Json<TrafficRecord>,
) -> Result<HttpResponse, FirewallError> {
    state.control.record_request(&record).await?;
    Ok(HttpResponse::Accepted().finish())
}

async fn get_lists(state: web::Data<ApiState>) -> Result<HttpResponse, FirewallError> {
    Ok(HttpResponse::Ok().json(state.control.get_lists().await?))
}

async fn block_ip(
    state: web::Data<ApiState>,
    req: web::Json<IpRequest>,
) -> Result<HttpResponse, FirewallError> {
    Ok(HttpResponse::Ok().json(state.control.block_ip(&req.ip).await?))
}

async fn unblock_ip(
    state: web::Data<ApiState>,
    req: web::Json<IpRequest>,
) -> Result<HttpResponse, FirewallError> {
    Ok(HttpResponse::Ok().json(state.control.unblock_ip(&req.ip).await?))
}

async fn allow_ip(
    state: web::Data<ApiState>,
    req: web::Json<IpRequest>,
) -> Result<HttpResponse, FirewallError> {
    Ok(HttpResponse::Ok().json(state.control.allow_ip(&req.ip).await?))
}

async fn remove_allowed_ip(
    state: web::Data<ApiState>,
    req: web::Json<IpRequest>,
) -> Result<HttpResponse, FirewallError> {
    Ok(HttpResponse::Ok().json(state.control.disallow_ip(&req.ip).await?))
}

async fn block_mac(
    state: web::Data<ApiState>,
    req: web::Json<MacRequest>,
) -> Result<HttpResponse, FirewallError> {
    Ok(HttpResponse::Ok().json(state.control.block_mac(&req.mac).await?))
}

async fn unblock_mac(
    state: web::Data<ApiState>,
    req: web::Json<MacRequest>,
) -> Result<HttpResponse, FirewallError> {
    Ok(HttpResponse::Ok().json(state.control.unblock_mac(&req.mac).await?))
}

/// Prometheus scrape endpoint
async fn render_metrics(state: web::Data<ApiState>) -> impl Responder {
    match &state.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}
