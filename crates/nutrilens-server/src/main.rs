use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router, middleware,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use nutrilens_api::state::{AppState, AppStateInner};
use nutrilens_api::{auth, chat, images, users, vision};
use nutrilens_gateway::AiGateway;
use nutrilens_storage::ObjectStore;

/// 10 MB upload limit for food photos
const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nutrilens=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("NUTRILENS_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("NUTRILENS_DB_PATH").unwrap_or_else(|_| "nutrilens.db".into());
    let host = std::env::var("NUTRILENS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("NUTRILENS_PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()?;
    let storage_dir: PathBuf = std::env::var("NUTRILENS_STORAGE_DIR")
        .unwrap_or_else(|_| "./image-storage".into())
        .into();
    let bucket = std::env::var("NUTRILENS_BUCKET").unwrap_or_else(|_| "nutrilens".into());
    let ai_gateway_url =
        std::env::var("AI_GATEWAY_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".into());

    // Init database, object storage, and the AI gateway client
    let db = Arc::new(nutrilens_db::Database::open(&PathBuf::from(&db_path))?);
    let storage = Arc::new(ObjectStore::new(storage_dir, bucket).await?);
    let gateway = AiGateway::new(ai_gateway_url.clone());
    info!("AI gateway at {}", ai_gateway_url);

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        storage,
        gateway,
        jwt_secret,
    });

    // Routes
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/chat", post(chat::handle_chat))
        .route("/api/v1/images/{filename}", get(images::get_image))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/v1/chat/conversations", get(chat::list_conversations))
        .route(
            "/api/v1/chat/conversations/{conversation_id}",
            get(chat::get_conversation_detail),
        )
        .route("/api/v1/vision/analyze", post(vision::analyze))
        .route("/api/v1/user/me", get(users::get_me))
        .route("/api/v1/user/{user_id}", put(users::update_profile))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            nutrilens_api::middleware::require_auth,
        ))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("NutriLens server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "UP" }))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
