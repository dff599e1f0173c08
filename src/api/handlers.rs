//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    ChatRequest, ChatResponse, ErrorResponse, ManualQuery, ManualResponse, ModeRequest,
    ModeResponse, SessionResponse,
};
use super::AppState;
use crate::access::{AccessController, AccessError, AllowlistStore, LoginRequest, NewUser};
use crate::conversation::{ManualSummary, MessageOption, PendingTurn};
use crate::db::{Database, DbError, User};
use crate::state_machine::TransitionError;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use std::sync::Arc;

/// Uploaded manuals embed their images, so allow large bodies
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let db = state.db.clone();
    Router::new()
        // Session
        .route("/api/session", get(get_session))
        .route("/api/session/login", post(session_login))
        .route("/api/session/logout", post(session_logout))
        .route(
            "/api/session/users",
            get(session_list_users).post(session_add_user),
        )
        .route("/api/session/users/:id", delete(session_remove_user))
        // Manual upload
        .route(
            "/api/manual",
            post(upload_manual).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        // Conversation
        .route("/api/chat", get(get_chat).post(send_chat))
        .route("/api/chat/mode", put(set_mode))
        .route("/api/chat/option", post(choose_option))
        .route("/api/chat/stream", get(stream_chat))
        .with_state(state)
        .merge(allowlist_router(db))
}

/// The allowlist REST API, backed by the local database
pub fn allowlist_router(db: Database) -> Router {
    Router::new()
        .route("/api/users", get(list_users).post(add_user))
        .route("/api/users/:id", delete(remove_user))
        .route("/api/login", post(login))
        .with_state(db)
}

// ============================================================
// Allowlist API
// ============================================================

async fn list_users(State(db): State<Database>) -> Result<Json<Vec<User>>, AppError> {
    let users = db.list_users().map_err(|e| AppError::internal(e.to_string()))?;
    Ok(Json(users))
}

async fn login(
    State(db): State<Database>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<User>, AppError> {
    if req.id.is_empty() {
        return Err(AppError::BadRequest("User ID is required".to_string()));
    }

    match db.login(&req.id, req.name.as_deref()) {
        Ok(user) => Ok(Json(user)),
        Err(DbError::UserNotFound(_)) => Err(AppError::Forbidden(
            "Access denied. User not found".to_string(),
        )),
        Err(e) => Err(AppError::internal(e.to_string())),
    }
}

async fn add_user(
    State(db): State<Database>,
    Json(req): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), AppError> {
    match db.add_user(&req.id, req.name.as_deref(), req.role) {
        Ok(user) => Ok((StatusCode::CREATED, Json(user))),
        Err(DbError::DuplicateUser(id)) => Err(AppError::Internal {
            message: format!("User with ID {id} may already exist"),
            code: Some("duplicate_user"),
        }),
        Err(e) => Err(AppError::internal(e.to_string())),
    }
}

async fn remove_user(
    State(db): State<Database>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    db.remove_user(&id)
        .map_err(|e| AppError::internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Session
// ============================================================

fn session_response(access: &AccessController<Arc<dyn AllowlistStore>>) -> SessionResponse {
    SessionResponse {
        user: access.current_user().cloned(),
        can_upload: access.can_upload(),
        can_manage_users: access.can_manage_users(),
        grantable_roles: access.grantable_roles(),
    }
}

async fn get_session(State(state): State<AppState>) -> Json<SessionResponse> {
    let access = state.access.lock().await;
    Json(session_response(&access))
}

async fn session_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let mut access = state.access.lock().await;
    access.login(&req.id, req.name.as_deref()).await?;
    // A new sign-in starts from an empty session
    state.engine.reset();
    Ok(Json(session_response(&access)))
}

async fn session_logout(State(state): State<AppState>) -> StatusCode {
    state.access.lock().await.logout();
    state.engine.reset();
    StatusCode::NO_CONTENT
}

async fn session_list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, AppError> {
    let users = state.access.lock().await.list_users().await?;
    Ok(Json(users))
}

async fn session_add_user(
    State(state): State<AppState>,
    Json(req): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let user = state.access.lock().await.add_user(req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn session_remove_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.access.lock().await.remove_user(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Manual upload
// ============================================================

async fn upload_manual(
    State(state): State<AppState>,
    Query(query): Query<ManualQuery>,
    body: Bytes,
) -> Result<Json<ManualResponse>, AppError> {
    {
        let access = state.access.lock().await;
        if access.current_user().is_none() {
            return Err(AccessError::NotLoggedIn.into());
        }
        if !access.can_upload() {
            return Err(AppError::Forbidden(
                "Only administrators and super users can upload manuals".to_string(),
            ));
        }
    }
    if state.engine.is_busy() {
        return Err(TransitionError::Busy.into());
    }

    let parser = state.parser.clone();
    let file_name = query.file_name.clone();
    let parsed = tokio::task::spawn_blocking(move || parser.parse_document(&file_name, &body))
        .await
        .map_err(|e| AppError::internal(format!("Document parser failed: {e}")))?;

    match parsed {
        Ok(content) => {
            let manual = ManualSummary {
                file_name: content.file_name.clone(),
                image_count: content.image_count(),
            };
            state.engine.load_manual(content)?;
            Ok(Json(ManualResponse { manual }))
        }
        Err(e) => {
            state.engine.report_load_failure(&e)?;
            Err(AppError::Unprocessable(e.to_string()))
        }
    }
}

// ============================================================
// Conversation
// ============================================================

async fn require_user(state: &AppState) -> Result<(), AppError> {
    if state.access.lock().await.current_user().is_none() {
        return Err(AccessError::NotLoggedIn.into());
    }
    Ok(())
}

async fn get_chat(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.snapshot())
}

async fn set_mode(
    State(state): State<AppState>,
    Json(req): Json<ModeRequest>,
) -> Json<ModeResponse> {
    state.engine.set_mode(req.mode);
    Json(ModeResponse { mode: req.mode })
}

async fn send_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<(StatusCode, Json<ChatResponse>), AppError> {
    require_user(&state).await?;
    let mode = req.mode.unwrap_or_else(|| state.engine.mode());
    let turn = state.engine.begin_prompt(&req.text, mode)?;
    Ok(spawn_turn(&state, turn))
}

async fn choose_option(
    State(state): State<AppState>,
    Json(option): Json<MessageOption>,
) -> Result<(StatusCode, Json<ChatResponse>), AppError> {
    require_user(&state).await?;
    let turn = state.engine.begin_option(option)?;
    Ok(spawn_turn(&state, turn))
}

/// Run an admitted turn in the background
fn spawn_turn(
    state: &AppState,
    turn: Option<PendingTurn>,
) -> (StatusCode, Json<ChatResponse>) {
    match turn {
        Some(turn) => {
            let engine = state.engine.clone();
            tokio::spawn(async move { engine.run_turn(turn).await });
            (StatusCode::ACCEPTED, Json(ChatResponse { queued: true }))
        }
        None => (StatusCode::OK, Json(ChatResponse { queued: false })),
    }
}

async fn stream_chat(State(state): State<AppState>) -> impl IntoResponse {
    // Subscribe before taking the snapshot so no event falls in between
    let rx = state.engine.subscribe();
    sse_stream(state.engine.snapshot(), rx)
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    Unprocessable(String),
    Internal {
        message: String,
        code: Option<&'static str>,
    },
}

impl AppError {
    fn internal(message: impl Into<String>) -> Self {
        AppError::Internal {
            message: message.into(),
            code: None,
        }
    }
}

impl From<AccessError> for AppError {
    fn from(e: AccessError) -> Self {
        let message = e.to_string();
        match e {
            AccessError::NotLoggedIn => AppError::Unauthorized(message),
            AccessError::AccessDenied(_)
            | AccessError::Forbidden(_)
            | AccessError::ProtectedUser(_) => AppError::Forbidden(message),
            AccessError::MissingId => AppError::BadRequest(message),
            AccessError::DuplicateUser(_) => AppError::Conflict(message),
            AccessError::Store(_) => AppError::internal(message),
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(e: TransitionError) -> Self {
        let message = e.to_string();
        match e {
            TransitionError::Busy
            | TransitionError::AwaitingChoice
            | TransitionError::NotAwaitingChoice
            | TransitionError::InvalidTransition(_) => AppError::Conflict(message),
            TransitionError::UnknownOption(_)
            | TransitionError::WrongMode
            | TransitionError::EmptyPrompt => AppError::BadRequest(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::new(msg)),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, ErrorResponse::new(msg)),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, ErrorResponse::new(msg)),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ErrorResponse::new(msg)),
            AppError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, ErrorResponse::new(msg))
            }
            AppError::Internal { message, code } => {
                tracing::error!(error = %message, "Request failed");
                let body = ErrorResponse::new(message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    match code {
                        Some(code) => body.with_code(code),
                        None => body,
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
