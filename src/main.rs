//! # Interview Gateway - Main Application Entry Point
//!
//! Realtime gateway for AI mock interviews. Browsers hold one websocket per
//! tab; the gateway relays their speech to a streaming recognizer, turns
//! their answers into interviewer replies with a generative model, and
//! scores the finished interview.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, config file, environment)
//! - **state**: Shared state, metrics and collaborators
//! - **auth**: Candidate credentials on the websocket handshake
//! - **websocket**: The per-connection gateway actor
//! - **stt**: Speech-to-text relay and its upstream connector
//! - **interview**: Turn engine, finalizer and the operations tying them to
//!   the stores
//! - **llm**: Generative model client
//! - **store**: Session cache and durable records
//! - **rooms**: Connection registry grouped by candidate
//! - **health**, **handlers**, **middleware**: HTTP surface

mod auth;
mod config;
mod error;
mod handlers;
mod health;
mod interview;
mod llm;
mod middleware;
mod rooms;
mod state;
mod store;
mod stt;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once a termination signal arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting interview-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    warn_on_missing_secrets(&config);

    let app_state = AppState::new(config.clone())?;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    spawn_cache_purge(app_state.clone());
    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .route("/ws/interview", web::get().to(websocket::interview_socket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route(
                        "/interviews/{session_id}",
                        web::put().to(handlers::upsert_interview),
                    )
                    .route(
                        "/interviews/{session_id}/start",
                        web::post().to(handlers::start_interview),
                    )
                    .route(
                        "/candidates/{candidate_id}",
                        web::put().to(handlers::upsert_candidate),
                    )
                    .route("/results/{result_id}", web::get().to(handlers::get_result)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "interview_gateway=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

fn warn_on_missing_secrets(config: &AppConfig) {
    if config.auth.jwt_secret.is_empty() {
        warn!("JWT_SECRET is not set; every candidate token will be rejected");
    }
    if config.stt.api_key.is_empty() {
        warn!("SARVAM_API_KEY is not set; speech recognition will be rejected upstream");
    }
    if config.llm.api_key.is_empty() {
        warn!("AI_API_KEY is not set; interviewer replies fall back to apologies");
    }
}

/// Drop expired cache entries so abandoned sessions don't accumulate.
fn spawn_cache_purge(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CACHE_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = state.cache.purge_expired().await;
            if purged > 0 {
                debug!(purged, "Expired cache entries removed");
            }
        }
    });
}

/// Set the shutdown flag on SIGTERM or SIGINT.
fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                        _ = sigint.recv() => info!("Received SIGINT"),
                    }
                }
                _ => {
                    warn!("Failed to install unix signal handlers, falling back to ctrl-c");
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for ctrl-c: {}", e);
                        return;
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
                return;
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
