//! CMMC Security Middleware Service
//!
//! This is the main entry point for the security middleware service.
//! It loads configuration, builds the shared middleware, starts the
//! expired-entry sweep and serves the HTTP API.

use std::sync::Arc;
use std::time::Duration;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use log::{info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;
use cmmc_security_middleware::api::{self, ApiState};
use cmmc_security_middleware::config::{self, SharedSettings};
use cmmc_security_middleware::SecurityMiddleware;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting CMMC security middleware...");

    // Load configuration
    let config = config::load_config().context("Failed to load configuration")?;
    info!("Using {} profile", config.environment.as_str());
    let config = Arc::new(config);

    // Prometheus exporter is optional; the API reports 404 without it
    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus exporter not installed: {}", e);
            None
        }
    };

    // Build the shared middleware
    let settings = SharedSettings::new(config.security.clone());
    let middleware = Arc::new(SecurityMiddleware::new(settings));

    // Periodic sweep of expired rate-limit and block entries
    let sweep_period = Duration::from_secs(config.monitoring.cleanup_interval_seconds);
    actix_rt::spawn(middleware.clone().run_cleanup_loop(sweep_period));

    // Create API state
    let state = web::Data::new(ApiState {
        middleware,
        config: config.clone(),
        prometheus,
    });
    let max_request_size = config.security.api.max_request_size;

    // Start HTTP server
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(api::json_config(max_request_size))
            .configure(api::config)
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    Ok(())
}
