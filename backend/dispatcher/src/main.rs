//! FoodBridge dispatcher: entry point.
//!
//! Starts the tracking simulator as a background task that nudges every
//! in-transit volunteer toward its destination, and exposes the Axum REST
//! API the donor, volunteer and requester apps talk to. Both share one
//! [`LifecycleManager`] over the SQLite store.

mod api;
mod config;
mod db;
mod errors;
mod oracle_client;
mod simulator;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use foodbridge_core::oracle::{Geocoder, ImageVerifier, RouteOracle, Unconfigured};
use foodbridge_core::LifecycleManager;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use db::SqliteStore;
use oracle_client::HttpOracle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;
    let store = Arc::new(SqliteStore::new(pool));

    // ─── Oracles ──────────────────────────────────────────
    let (verifier, geocoder, router): (
        Arc<dyn ImageVerifier>,
        Arc<dyn Geocoder>,
        Arc<dyn RouteOracle>,
    ) = match &config.oracle_url {
        Some(url) => {
            let oracle = Arc::new(HttpOracle::new(
                url,
                config.oracle_api_key.clone(),
                Duration::from_secs(config.oracle_timeout_secs),
            )?);
            info!("Oracle endpoint: {url}");
            (oracle.clone(), oracle.clone(), oracle)
        }
        None => {
            warn!("ORACLE_URL not set; verification, geocoding and routing are unavailable");
            (
                Arc::new(Unconfigured),
                Arc::new(Unconfigured),
                Arc::new(Unconfigured),
            )
        }
    };
    info!("Verification policy: {:?}", config.verification_policy);

    let manager = Arc::new(
        LifecycleManager::new(store)
            .with_verifier(verifier)
            .with_router(router.clone())
            .with_policy(config.verification_policy)
            .with_retry_limit(config.update_retry_limit),
    );

    // ─── Background simulator ─────────────────────────────
    let shutdown = CancellationToken::new();
    let simulator = tokio::spawn(simulator::run(
        manager.clone(),
        Duration::from_millis(config.tick_interval_ms),
        shutdown.clone(),
    ));

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState {
        manager,
        geocoder,
        router,
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/users", post(api::register_user))
        .route("/users/:id", get(api::get_user))
        .route(
            "/users/:id/favorites/:requester_id",
            post(api::toggle_favorite),
        )
        .route("/users/:id/notifications", get(api::list_notifications))
        .route("/users/:id/unread", get(api::unread_counts))
        .route("/notifications/:id/read", post(api::mark_notification_read))
        .route(
            "/postings",
            get(api::list_postings).post(api::create_posting),
        )
        .route("/postings/:id", get(api::get_posting))
        .route("/postings/:id/request", post(api::request_posting))
        .route("/postings/:id/accept", post(api::accept_posting))
        .route("/postings/:id/interest", post(api::register_interest))
        .route("/postings/:id/assign", post(api::assign_volunteer))
        .route("/postings/:id/pickup", post(api::verify_pickup))
        .route("/postings/:id/deliver", post(api::verify_delivery))
        .route("/postings/:id/confirm", post(api::confirm_delivery))
        .route("/postings/:id/rate", post(api::rate_posting))
        .route("/postings/:id/location", post(api::report_location))
        .route("/postings/:id/events", get(api::posting_events))
        .route(
            "/postings/:id/messages",
            get(api::list_messages).post(api::send_message),
        )
        .route("/postings/:id/messages/read", post(api::mark_messages_read))
        .route("/events", get(api::all_events))
        .route("/geocode/reverse", get(api::reverse_geocode))
        .route("/route", post(api::optimize_route))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            stop.cancel();
        })
        .await?;

    shutdown.cancel();
    simulator.await?;
    Ok(())
}
