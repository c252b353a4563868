//! # Clinic Sim Backend - Main Application Entry Point
//!
//! Actix-web server relaying duplex simulation sessions and serving the
//! patient document store.
//!
//! ## Application Architecture:
//! - **config**: configuration layering (TOML file + environment variables)
//! - **state**: shared application state, metrics, and wiring of the blob
//!   backend, document store, and engine factory
//! - **storage**: blob adapter + patient document store
//! - **session**: session state machine, engine seam, bridge, scripted engine
//! - **websocket**: the duplex session protocol actor and its endpoints
//! - **handlers**: the document management HTTP API
//! - **health / middleware / error**: operational surface, request
//!   telemetry, typed HTTP errors

mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod session;
mod state;
mod storage;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set by the signal handler task and polled by the
/// main select loop.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting clinic-sim-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{} (storage: {:?})",
        config.server.host, config.server.port, config.storage.backend
    );

    let app_state = AppState::initialize(config.clone())?;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::RequestTelemetry)
            // Duplex session endpoints, one per variant
            .route("/ws/transcriber", web::get().to(websocket::transcriber_session))
            .route(
                "/ws/simulation/audio",
                web::get().to(websocket::playback_session),
            )
            // Document management API
            .service(
                web::scope("/api")
                    .route(
                        "/get-patient-file",
                        web::post().to(handlers::get_patient_file),
                    )
                    .service(
                        web::scope("/admin")
                            .route(
                                "/list-files/{pid}",
                                web::get().to(handlers::list_patient_files),
                            )
                            .route("/save-file", web::post().to(handlers::save_patient_file))
                            .route(
                                "/delete-file",
                                web::delete().to(handlers::delete_patient_file),
                            )
                            .route("/list-patients", web::get().to(handlers::list_patients))
                            .route("/create-patient", web::post().to(handlers::create_patient))
                            .route(
                                "/delete-patient",
                                web::delete().to(handlers::delete_patient),
                            ),
                    ),
            )
            // Operational surface
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Race the server against the shutdown signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
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

/// Set up structured logging. `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clinic_sim_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag without busy-waiting.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
