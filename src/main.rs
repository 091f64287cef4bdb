use axum::{routing::get, Router};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use modwheel::config::{LinkConfig, RotationConfig};
use modwheel::engine::{self, EngineLink};
use modwheel::scheduler::{self, VotingCycleScheduler};
use modwheel::state::RotationState;
use modwheel::{broadcast, ws};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modwheel=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting modwheel...");

    let rotation_config = RotationConfig::from_env();
    let link_config = LinkConfig::from_env();
    tracing::info!(?rotation_config, ?link_config, "configuration loaded");

    let (state, admin_rx) = RotationState::new(rotation_config);

    // Engine link: listener for unsolicited inbound, worker for outbound
    let link = EngineLink::new(&link_config);
    state.attach_link(link.clone()).await;
    engine::spawn_listener(link.clone(), state.clone());
    let (engine_tx, engine_rx) = mpsc::unbounded_channel();
    engine::spawn_sender_worker(link.clone(), state.clone(), engine_rx);

    // Ask the engine what is running; it may also announce on its own
    let _ = engine_tx.send(modwheel::protocol::EngineRequest::GameInfo { game: true });

    // The tick loop drives the whole rotation
    let scheduler = VotingCycleScheduler::new(state.clone(), admin_rx, engine_tx);
    scheduler::spawn_tick_loop(scheduler);

    // Periodic snapshots for overlays and consoles
    broadcast::spawn_snapshot_broadcaster(state.clone());

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], link_config.ws_port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            state.request_shutdown();
        })
        .await
        .unwrap();
}
