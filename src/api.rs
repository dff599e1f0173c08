//! HTTP API for the manual assistant
//!
//! Session and user management, manual upload, the conversation endpoints
//! and an SSE stream of conversation events. The allowlist REST API is
//! served from the same router.

mod handlers;
mod sse;
mod types;

pub use handlers::{allowlist_router, create_router};

use crate::access::{AccessController, AllowlistStore};
use crate::conversation::ConversationEngine;
use crate::db::Database;
use crate::gateway::AiGateway;
use crate::manual::DocumentParser;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConversationEngine<Arc<dyn AiGateway>>>,
    pub access: Arc<Mutex<AccessController<Arc<dyn AllowlistStore>>>>,
    pub parser: Arc<dyn DocumentParser>,
    pub db: Database,
}

impl AppState {
    pub fn new(
        gateway: Arc<dyn AiGateway>,
        store: Arc<dyn AllowlistStore>,
        parser: Arc<dyn DocumentParser>,
        db: Database,
    ) -> Self {
        Self {
            engine: Arc::new(ConversationEngine::new(gateway)),
            access: Arc::new(Mutex::new(AccessController::new(store))),
            parser,
            db,
        }
    }
}
