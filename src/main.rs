//! Storegate - Authentication and request-admission core for storefront services

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storegate::{
    api::{self, AppState},
    config::{Config, Secrets},
    limiter::{RateLimitBackend, RateLimiter, RedisBackend},
    services::{CsrfGuard, SessionManager, TokenManager},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storegate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting storegate security core...");

    // Load configuration; secret validation is fatal here, never per-request
    let config = Config::load(Path::new("config.yml"))?;
    let secrets = Secrets::from_env()?;
    tracing::info!("Configuration loaded");

    // Connect the shared store; failure is tolerated and admission starts on
    // the local store until a probe finds the shared one healthy
    let op_timeout = Duration::from_millis(config.store.op_timeout_ms);
    let shared = match &config.store.redis_url {
        Some(url) => match RedisBackend::connect(url, op_timeout).await {
            Ok(backend) => {
                tracing::info!("Shared rate-limit store connected");
                Some(backend)
            }
            Err(e) => {
                tracing::warn!(
                    "Shared rate-limit store unavailable at startup: {e:#}; \
                     admission control starts on the local store"
                );
                None
            }
        },
        None => {
            tracing::info!("No shared store configured; admission control is process-local");
            None
        }
    };

    let limiter = Arc::new(RateLimiter::new(
        shared.map(|backend| Box::new(backend) as Box<dyn RateLimitBackend>),
    ));
    limiter.start_sweeper();

    let sessions = Arc::new(SessionManager::new(
        TokenManager::new(&secrets.jwt_secret),
        config.server.production,
    ));
    let csrf = Arc::new(CsrfGuard::new(
        &secrets.csrf_secret,
        config.server.production,
    ));

    let state = AppState {
        sessions,
        csrf,
        limiter: limiter.clone(),
        rate_limit: config.rate_limit,
    };

    // Build router
    let app = api::build_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    limiter.shutdown();
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
    }
}
