//! Manual assistant
//!
//! A support chat that answers questions about a single uploaded manual,
//! with a guided troubleshooting mode and a small user allowlist.

mod access;
mod api;
mod conversation;
mod db;
mod gateway;
mod llm;
mod manual;
mod state_machine;

use access::{AllowlistStore, DatabaseAllowlist, HttpAllowlistClient};
use api::{create_router, AppState};
use db::Database;
use gateway::{AiGateway, GatewayConfig, GeminiGateway};
use manual::{read_document, DocumentParser, DocxParser};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "manual_assist=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let db_path = std::env::var("MANUAL_ASSIST_DB_PATH").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.manual-assist/users.db")
    });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3001);

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %db_path, "Opening database");
    let db = Database::open(&db_path)?;

    // AI gateway
    let gemini = GeminiGateway::new(GatewayConfig::from_env());
    if gemini.config().api_key.is_none() {
        tracing::warn!("No AI credential configured. Set GEMINI_API_KEY.");
    } else {
        tracing::info!(model = %gemini.config().model, "AI gateway configured");
    }
    let gateway: Arc<dyn AiGateway> = Arc::new(gemini);

    // Allowlist: remote service when configured, local database otherwise
    let store: Arc<dyn AllowlistStore> = match std::env::var("ALLOWLIST_URL") {
        Ok(url) => {
            tracing::info!(url = %url, "Using remote allowlist");
            Arc::new(HttpAllowlistClient::new(&url)?)
        }
        Err(_) => Arc::new(DatabaseAllowlist::new(db.clone())),
    };

    let parser: Arc<dyn DocumentParser> = Arc::new(DocxParser);
    let state = AppState::new(gateway, store, parser.clone(), db);

    // Optional manual available before anyone uploads one
    if let Ok(path) = std::env::var("MANUAL_PATH") {
        match read_document(parser.as_ref(), Path::new(&path)) {
            Ok(content) => state.engine.load_manual(content)?,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Could not preload manual");
                state.engine.report_load_failure(&e)?;
            }
        }
    }

    let app = create_router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Manual assistant listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
