//! API endpoints for the security middleware.
//!
//! This module exposes the middleware over HTTP so request-handling code
//! outside the process can validate input, check rate limits and read the
//! security log.

use std::collections::HashMap;
use std::sync::Arc;
use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpResponse, Responder, ResponseError};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::{EventKind, InputKind, SecurityMiddleware, UploadedFile};
use crate::models::Config;

/// Errors returned by the API
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Metrics exporter not installed")]
    MetricsUnavailable,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MetricsUnavailable => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

pub struct ApiState {
    pub middleware: Arc<SecurityMiddleware>,
    pub config: Arc<Config>,
    pub prometheus: Option<PrometheusHandle>,
}

/// API configuration function for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/health").route(web::get().to(health_check)))
            .service(web::resource("/validate/input").route(web::post().to(validate_input)))
            .service(web::resource("/validate/file").route(web::post().to(validate_file)))
            .service(web::resource("/rate-limit").route(web::post().to(check_rate_limit)))
            .service(web::resource("/activity").route(web::post().to(detect_activity)))
            .service(
                web::resource("/events")
                    .route(web::get().to(recent_events))
                    .route(web::post().to(log_event)),
            )
            .service(web::resource("/metrics/security").route(web::get().to(security_metrics)))
            .service(web::resource("/blocked").route(web::get().to(blocked_identifiers)))
            .service(web::resource("/data").route(web::delete().to(clear_data))),
    )
    .service(web::resource("/metrics").route(web::get().to(prometheus_metrics)));
}

/// JSON extractor settings capped at the configured request size
pub fn json_config(max_request_size: u64) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(usize::try_from(max_request_size).unwrap_or(usize::MAX))
        .error_handler(|err, _req| ApiError::InvalidRequest(err.to_string()).into())
}

/// Health check endpoint response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Input validation request
#[derive(Debug, Serialize, Deserialize)]
pub struct InputRequest {
    pub input: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: InputKind,
}

/// Rate limit check request
#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitRequest {
    pub identifier: String,
    pub action: String,
}

/// Activity assessment request
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ActivityRequest {
    pub payload: Option<Value>,
    pub context: Option<String>,
}

/// Event logging request
#[derive(Debug, Serialize, Deserialize)]
pub struct LogEventRequest {
    pub kind: EventKind,
    pub message: String,
    pub source: String,
    pub details: Option<HashMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn validate_input(state: web::Data<ApiState>, req: web::Json<InputRequest>) -> impl Responder {
    HttpResponse::Ok().json(state.middleware.validate_input(req.input.as_deref(), req.kind))
}

async fn validate_file(state: web::Data<ApiState>, req: web::Json<UploadedFile>) -> impl Responder {
    HttpResponse::Ok().json(state.middleware.validate_file_upload(&req.into_inner()))
}

/// Rate limit check endpoint
pub async fn check_rate_limit(
    state: web::Data<ApiState>,
    req: web::Json<RateLimitRequest>,
) -> Result<HttpResponse, ApiError> {
    if req.identifier.trim().is_empty() || req.action.trim().is_empty() {
        return Err(ApiError::InvalidRequest("identifier and action are required".into()));
    }

    let result = state.middleware.check_rate_limit(&req.identifier, &req.action);
    if result.allowed {
        return Ok(HttpResponse::Ok().json(result));
    }

    let mut response = HttpResponse::TooManyRequests();
    if let Some(retry_after) = result.retry_after {
        response.insert_header((header::RETRY_AFTER, retry_after.to_string()));
    }
    Ok(response.json(result))
}

async fn detect_activity(state: web::Data<ApiState>, req: web::Json<ActivityRequest>) -> impl Responder {
    let result = state
        .middleware
        .detect_suspicious_activity(req.payload.as_ref(), req.context.as_deref());
    HttpResponse::Ok().json(result)
}

async fn log_event(state: web::Data<ApiState>, req: web::Json<LogEventRequest>) -> impl Responder {
    let req = req.into_inner();
    state
        .middleware
        .log_security_event(req.kind, &req.message, &req.source, req.details);
    HttpResponse::Accepted().finish()
}

async fn recent_events(state: web::Data<ApiState>, query: web::Query<EventsQuery>) -> impl Responder {
    let limit = query.limit.unwrap_or(state.config.monitoring.recent_events_default);
    HttpResponse::Ok().json(state.middleware.get_recent_events(limit))
}

async fn security_metrics(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.middleware.get_metrics())
}

async fn blocked_identifiers(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.middleware.get_blocked_identifiers())
}

async fn clear_data(state: web::Data<ApiState>) -> impl Responder {
    state.middleware.clear_data();
    HttpResponse::NoContent().finish()
}

async fn prometheus_metrics(state: web::Data<ApiState>) -> Result<HttpResponse, ApiError> {
    let handle = state.prometheus.as_ref().ok_or(ApiError::MetricsUnavailable)?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(handle.render()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use serde_json::json;
    use crate::core::{BlockedEntry, FileValidationResult, RateLimitResult, SecurityEvent, SecurityMetrics, ValidationResult};
    use crate::models::Profile;

    fn state() -> web::Data<ApiState> {
        let config = Config::for_profile(Profile::Test);
        web::Data::new(ApiState {
            middleware: Arc::new(SecurityMiddleware::new(config.security.clone())),
            config: Arc::new(config),
            prometheus: None,
        })
    }

    #[actix_web::test]
    async fn test_health_check() {
        let app = test::init_service(
            App::new()
                .app_data(state())
                .configure(config)
        ).await;

        let req = test::TestRequest::get().uri("/api/v1/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_rate_limit() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        for _ in 0..3 {
            let req = test::TestRequest::post()
                .uri("/api/v1/rate-limit")
                .set_json(RateLimitRequest {
                    identifier: "10.0.0.7".to_string(),
                    action: "login".to_string(),
                })
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let req = test::TestRequest::post()
            .uri("/api/v1/rate-limit")
            .set_json(RateLimitRequest {
                identifier: "10.0.0.7".to_string(),
                action: "login".to_string(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            resp.headers().get(header::RETRY_AFTER).and_then(|v| v.to_str().ok()),
            Some("2")
        );
        let body: RateLimitResult = test::read_body_json(resp).await;
        assert!(!body.allowed);

        let req = test::TestRequest::get().uri("/api/v1/blocked").to_request();
        let blocked: Vec<BlockedEntry> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].identifier, "10.0.0.7");

        let req = test::TestRequest::delete().uri("/api/v1/data").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get().uri("/api/v1/metrics/security").to_request();
        let metrics: SecurityMetrics = test::call_and_read_body_json(&app, req).await;
        assert_eq!(metrics, SecurityMetrics::default());
    }

    #[actix_web::test]
    async fn test_rate_limit_requires_identifier() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;
        let req = test::TestRequest::post()
            .uri("/api/v1/rate-limit")
            .set_json(json!({ "identifier": " ", "action": "login" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_validate_input() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/validate/input")
            .set_json(json!({ "input": "../../../etc/passwd" }))
            .to_request();
        let result: ValidationResult = test::call_and_read_body_json(&app, req).await;
        assert!(!result.valid);
        assert!(result.errors.contains(&"Path traversal detected".to_string()));

        let req = test::TestRequest::post()
            .uri("/api/v1/validate/input")
            .set_json(json!({ "input": null, "type": "email" }))
            .to_request();
        let result: ValidationResult = test::call_and_read_body_json(&app, req).await;
        assert_eq!(result.errors, vec!["Input cannot be null or undefined".to_string()]);
    }

    #[actix_web::test]
    async fn test_validate_file() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;
        let req = test::TestRequest::post()
            .uri("/api/v1/validate/file")
            .set_json(json!({ "name": "evidence.pdf", "type": "application/pdf", "size": 1024 }))
            .to_request();
        let result: FileValidationResult = test::call_and_read_body_json(&app, req).await;
        assert!(result.valid);
    }

    #[actix_web::test]
    async fn test_events_and_activity() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/events")
            .set_json(json!({ "kind": "error", "message": "Upload service unreachable", "source": "evidence_upload" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);

        let req = test::TestRequest::post()
            .uri("/api/v1/activity")
            .set_json(json!({ "payload": { "q": "<script>alert(1)</script>" }, "context": "search" }))
            .to_request();
        let result: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(result["suspicious"], json!(true));
        assert_eq!(result["risk"], json!("high"));

        let req = test::TestRequest::get().uri("/api/v1/events?limit=1").to_request();
        let events: Vec<SecurityEvent> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "search");

        let req = test::TestRequest::get().uri("/api/v1/metrics/security").to_request();
        let metrics: SecurityMetrics = test::call_and_read_body_json(&app, req).await;
        assert_eq!(metrics.suspicious_activities, 1);
        assert!(metrics.last_incident.is_some());
    }

    #[actix_web::test]
    async fn test_prometheus_without_exporter() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;
        let req = test::TestRequest::get().uri("/metrics").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}
