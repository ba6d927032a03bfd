//! Tollgate API Server Entry Point
//!
//! Loads and validates configuration, builds the governance collaborators
//! and serves the Axum router until ctrl-c.

use std::net::SocketAddr;

use axum::Router;
use tollgate_api::telemetry::{init_tracing, TelemetryConfig};
use tollgate_api::{create_router, ApiConfig, ApiError, ApiResult, Governance};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::from_env()?;
    init_tracing(&telemetry_config)?;

    let api_config = ApiConfig::from_env()?;
    let governance = Governance::from_config(&api_config)?;
    tracing::info!(
        service = %telemetry_config.service_name,
        environment = %api_config.environment,
        mode = ?governance.resolver().mode(),
        plan_order = ?governance.hierarchy().tiers(),
        trusted_proxy_hops = governance.trusted_proxy_hops(),
        counter_store = if api_config.store_url.is_some() { "rest" } else { "memory" },
        directory = if api_config.database.is_some() { "postgres" } else { "memory" },
        "Governance pipeline configured"
    );

    let app: Router = create_router(&governance);

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting Tollgate API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("TOLLGATE_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("TOLLGATE_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::bad_request(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::bad_request(format!("Invalid bind address {}: {}", addr, e)))
}
