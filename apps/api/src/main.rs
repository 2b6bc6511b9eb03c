use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::{AppointmentStore, InMemoryStore, PostgrestStore, SchedulingAgent, SchedulingRules};
use shared_config::{AppConfig, StorageBackend};
use shared_database::PostgrestClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic scheduling API server");

    // Load configuration
    let config = AppConfig::from_env();
    let store = build_store(&config)?;
    let agent = Arc::new(SchedulingAgent::new(store, SchedulingRules::from_config(&config)));

    info!(
        "Scheduling in {} with working hours {}-{}",
        config.clinic_timezone,
        config.working_hours_start.format("%H:%M"),
        config.working_hours_end.format("%H:%M")
    );

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(agent)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let listener = TcpListener::bind(config.bind_address.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    info!("Listening on {}", config.bind_address);

    axum::serve(listener, app).await.context("server terminated")?;
    Ok(())
}

fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn AppointmentStore>> {
    match config.storage_backend {
        StorageBackend::Postgrest => {
            let client = PostgrestClient::new(config).context("failed to build PostgREST client")?;
            info!("Using PostgREST storage at {}", client.base_url());
            Ok(Arc::new(PostgrestStore::new(Arc::new(client))))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; appointments are lost on restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}
