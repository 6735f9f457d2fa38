//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/pages` | Create a page, queue it for indexing |
//! | `GET`  | `/pages` | List pages |
//! | `GET`  | `/pages/{page_id}` | Fetch one page by UUID |
//! | `POST` | `/users` | Create a user |
//! | `GET`  | `/users` | List users |
//! | `GET`  | `/user/{user_id}` | Fetch one user by UUID |
//! | `POST` | `/chat` | Answer a question from the indexed pages |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! The API routes are also served under the `/v1` and `/latest` prefixes.
//!
//! # Error Contract
//!
//! ```json
//! { "message": "Invalid input", "details": "name must not be empty" }
//! ```
//!
//! Validation failures and malformed ids are `422` (with `details`), unknown
//! ids `404`, model backend failures `503`. Anything else is `500` with
//! `"Server error occurred"`; the underlying error is logged, never echoed.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::embedding::{Embedder, OllamaEmbedder};
use crate::error::RagError;
use crate::generation::{Generator, OllamaGenerator};
use crate::indexer::{self, IndexSettings, Indexer};
use crate::migrate;
use crate::models::{NewPage, NewUser, Page, User};
use crate::prompt::PromptRenderer;
use crate::rag::RagPipeline;
use crate::store;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub rag: Arc<RagPipeline>,
    pub indexer: Indexer,
}

/// Build the application router for `state`.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/pages", post(handle_create_page).get(handle_list_pages))
        .route("/pages/{page_id}", get(handle_get_page))
        .route("/users", post(handle_create_user).get(handle_list_users))
        .route("/user/{user_id}", get(handle_get_user))
        .route("/chat", post(handle_chat));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/v1", api.clone())
        .nest("/latest", api.clone())
        .merge(api)
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server.
///
/// Opens the database, applies migrations, loads the prompt templates,
/// starts the indexing worker (queueing every page that is not yet indexed)
/// and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let config = Arc::new(config.clone());

    let pool = db::connect(&config.db).await?;
    migrate::run_migrations(&pool).await?;

    let prompts = Arc::new(PromptRenderer::load(&config.prompts.templates_dir)?);
    let names = prompts.template_names();
    tracing::info!(templates = ?names, "prompt templates loaded");
    if !prompts.has_template(&config.prompts.grounding_template) {
        tracing::warn!(
            template = %config.prompts.grounding_template,
            "grounding template is not registered; /chat will fail"
        );
    }

    let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(&config.ollama)?);
    let generator: Arc<dyn Generator> = Arc::new(OllamaGenerator::new(&config.ollama)?);

    let (indexer, _worker) = Indexer::spawn(
        pool.clone(),
        embedder.clone(),
        IndexSettings::from_config(&config),
    );
    let pending = indexer::pending_pages(&pool, embedder.as_ref()).await?;
    if !pending.is_empty() {
        tracing::info!(pages = pending.len(), "queueing pages for indexing");
    }
    for page_id in pending {
        indexer.enqueue(page_id);
    }

    let rag = RagPipeline::new(pool.clone(), embedder, generator, prompts, &config);
    let app = build_router(AppState {
        pool,
        rag: Arc::new(rag),
        indexer,
    });

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

impl AppError {
    fn validation(details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: "Invalid input".to_string(),
            details: Some(details.into()),
        }
    }

    fn server_error() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Server error occurred".to_string(),
            details: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        if err.is_client_error() {
            tracing::warn!(error = %err, "request rejected");
        } else {
            tracing::error!(error = %err, "request failed");
        }

        match err {
            RagError::InvalidInput(details) => AppError::validation(details),
            RagError::NotFound(message) => AppError {
                status: StatusCode::NOT_FOUND,
                message,
                details: None,
            },
            RagError::EmbeddingBackend(_) | RagError::GenerationBackend(_) => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: "Model backend unavailable".to_string(),
                details: None,
            },
            RagError::TemplateNotFound(_) | RagError::TemplateRender(_) | RagError::Storage(_) => {
                AppError::server_error()
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!(error = %rejection, "invalid request body");
        AppError::validation(rejection.body_text())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Pages ============

#[derive(Serialize)]
struct CreatedPage {
    page: Uuid,
}

#[derive(Serialize)]
struct PageList {
    pages: Vec<Page>,
}

#[derive(Serialize)]
struct PageEnvelope {
    page: Page,
}

/// Handler for `POST /pages`.
///
/// Stores the page and queues it for indexing; the response does not wait
/// for embeddings.
async fn handle_create_page(
    State(state): State<AppState>,
    payload: Result<Json<NewPage>, JsonRejection>,
) -> Result<Json<CreatedPage>, AppError> {
    let Json(payload) = payload?;
    tracing::info!(title = %payload.title, "creating page");

    let page = store::create_page(&state.pool, &payload).await?;
    state.indexer.enqueue(page.id);

    Ok(Json(CreatedPage { page: page.uuid }))
}

async fn handle_list_pages(State(state): State<AppState>) -> Result<Json<PageList>, AppError> {
    let pages = store::list_pages(&state.pool).await?;
    Ok(Json(PageList { pages }))
}

async fn handle_get_page(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
) -> Result<Json<PageEnvelope>, AppError> {
    let page = store::get_page(&state.pool, &page_id)
        .await?
        .into_result("Page", &page_id)?;
    Ok(Json(PageEnvelope { page }))
}

// ============ Users ============

#[derive(Serialize)]
struct CreatedUser {
    user: Uuid,
}

#[derive(Serialize)]
struct UserList {
    users: Vec<User>,
}

#[derive(Serialize)]
struct UserEnvelope {
    user: User,
}

async fn handle_create_user(
    State(state): State<AppState>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<Json<CreatedUser>, AppError> {
    let Json(payload) = payload?;
    tracing::info!("creating user");

    let user = store::create_user(&state.pool, &payload).await?;
    Ok(Json(CreatedUser { user: user.uuid }))
}

async fn handle_list_users(State(state): State<AppState>) -> Result<Json<UserList>, AppError> {
    let users = store::list_users(&state.pool).await?;
    Ok(Json(UserList { users }))
}

async fn handle_get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserEnvelope>, AppError> {
    let user = store::get_user(&state.pool, &user_id)
        .await?
        .into_result("User", &user_id)?;
    Ok(Json(UserEnvelope { user }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(payload) = payload?;
    tracing::info!(chars = payload.message.chars().count(), "answering chat message");

    let response = state.rag.answer(&payload.message).await?;
    Ok(Json(ChatResponse { response }))
}
