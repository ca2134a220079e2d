//! Huddle Server - call orchestration for the Huddle messenger
//!
//! This server handles:
//! - Call lifecycle (ring, accept, decline, leave, end, missed)
//! - Media join credential issuance
//! - Real-time lifecycle event fan-out over WebSocket
//! - Mirroring call outcomes into conversation history

use std::sync::Arc;
use axum::{
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use huddle_server::chatlog::ChatLogBridge;
use huddle_server::config::Config;
use huddle_server::controller::CallController;
use huddle_server::media::HmacMediaProvider;
use huddle_server::notify::{CallNotifier, WebSocketManager};
use huddle_server::storage::Storage;
use huddle_server::{handlers, AppState};

/// Huddle Server CLI
#[derive(Parser)]
#[command(name = "huddle-server")]
#[command(about = "Huddle messenger call orchestration server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server
    Run,

    /// Run one missed-call sweep pass and exit (for external schedulers)
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "huddle_server=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config).await?;
    let config = Arc::new(config);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            run_server(config).await?;
        }
        Commands::Sweep => {
            run_sweep(config).await?;
        }
    }

    Ok(())
}

fn build_state(config: Arc<Config>, storage: Arc<Storage>) -> AppState {
    let ws_manager = Arc::new(WebSocketManager::new());
    let media = Arc::new(HmacMediaProvider::new(
        config.media.clone(),
        Arc::clone(&storage),
    ));
    let notifier = CallNotifier::new(ws_manager.clone());
    let chatlog = Arc::new(ChatLogBridge::new(Arc::clone(&storage)));
    let controller = Arc::new(CallController::new(
        Arc::clone(&storage),
        media.clone(),
        notifier,
        chatlog,
    ));

    AppState {
        config,
        storage,
        ws_manager,
        media,
        controller,
    }
}

async fn run_sweep(config: Arc<Config>) -> anyhow::Result<()> {
    let storage = Arc::new(Storage::new(&config.storage.database_path).await?);
    let ring_timeout = config.calls.ring_timeout_seconds;
    let state = build_state(config, storage);

    let swept = state
        .controller
        .sweep_missed(ring_timeout)
        .await
        .map_err(|e| anyhow::anyhow!("Sweep failed: {}", e))?;

    println!("Swept {} unanswered call(s)", swept);

    Ok(())
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Starting Huddle Server v{}", env!("CARGO_PKG_VERSION"));

    let storage = Arc::new(Storage::new(&config.storage.database_path).await?);
    let state = build_state(config.clone(), storage);

    // Build routes
    let app = Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))

        // Call lifecycle
        .route("/api/v1/calls", post(handlers::calls::initiate_call))
        .route("/api/v1/calls/:call_id", get(handlers::calls::get_call))
        .route("/api/v1/calls/:call_id/accept", post(handlers::calls::accept_call))
        .route("/api/v1/calls/:call_id/decline", post(handlers::calls::decline_call))
        .route("/api/v1/calls/:call_id/leave", post(handlers::calls::leave_call))
        .route("/api/v1/calls/:call_id/end", post(handlers::calls::end_call))
        .route("/api/v1/calls/:call_id/missed", post(handlers::calls::miss_call))
        .route("/api/v1/calls/:call_id/media-flags", post(handlers::calls::update_media_flags))

        // Media plane queries
        .route("/api/v1/media/rooms", get(handlers::calls::list_active_rooms))

        // WebSocket for real-time lifecycle events
        .route("/ws", get(handlers::websocket::websocket_handler))

        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;

    // Periodic missed-call sweep; the controller never runs timers itself
    let sweep_controller = Arc::clone(&state.controller);
    let ring_timeout = config.calls.ring_timeout_seconds;
    let sweep_interval = config.calls.sweep_interval_seconds;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(
            std::time::Duration::from_secs(sweep_interval.max(1))
        );
        loop {
            interval.tick().await;
            match sweep_controller.sweep_missed(ring_timeout).await {
                Ok(swept) => {
                    if swept > 0 {
                        tracing::info!("Sweep: {} unanswered call(s) marked missed", swept);
                    }
                }
                Err(e) => {
                    tracing::error!("Sweep failed: {}", e);
                }
            }
        }
    });

    axum::serve(listener, app).await?;

    Ok(())
}
