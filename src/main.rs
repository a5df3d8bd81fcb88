use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pollrooms::{
    identity::IdentityConfig,
    service::{self, PollService},
    store::{MemoryStore, PollStore},
    tally,
};

const DEFAULT_PORT: u16 = 8000;

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pollrooms=debug,tower_http=debug,axum=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting pollrooms...");

    // The hashing secret is required; refusing to start beats silently
    // producing guessable fingerprints.
    let identity = match IdentityConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let store: Arc<dyn PollStore> = Arc::new(MemoryStore::new());
    let service = Arc::new(PollService::new(store.clone(), identity));

    // Spawn the timer-driven tally producer for connected watchers
    tally::spawn_tally_refresher(store, service.hub());

    // Spawn the periodic sweep that reclaims stale rate-gate entries
    service::spawn_gate_sweeper(service.clone());

    let app = pollrooms::http::router(service)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
