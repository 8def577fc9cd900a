//! HTTP surface: search, health, localized example prompts and the audio files.

use crate::config::Settings;
use crate::error::{AudioSearchError, Result};
use crate::pipeline::{PipelineError, SearchPipeline, SearchRequest, SearchResponse};
use crate::translation::TranslationOutcome;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            PipelineError::SearchFailed => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };
        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));
        (status, body).into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamplePrompt {
    pub category: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchTip {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExamplePrompts {
    #[serde(default)]
    pub prompts: Vec<ExamplePrompt>,
    #[serde(default)]
    pub search_tips: Vec<SearchTip>,
}

impl ExamplePrompts {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AudioSearchError::Config(format!("example prompts {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            AudioSearchError::Config(format!("example prompts {}: {e}", path.display()))
        })
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
}

#[derive(Debug, Deserialize)]
pub struct PromptsQuery {
    pub lang: Option<String>,
}

/// Shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SearchPipeline>,
    pub prompts: Arc<ExamplePrompts>,
}

impl AppState {
    pub fn new(pipeline: SearchPipeline, prompts: ExamplePrompts) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            prompts: Arc::new(prompts),
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model_loaded: state.pipeline.model_loaded(),
    })
}

async fn search(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SearchRequest>, JsonRejection>,
) -> std::result::Result<Json<SearchResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    Ok(Json(state.pipeline.search(request).await?))
}

/// Prompts are translated one by one; any failure returns the English list.
async fn example_prompts(
    State(state): State<AppState>,
    Query(params): Query<PromptsQuery>,
) -> Json<ExamplePrompts> {
    let lang = match params.lang.map(|l| l.trim().to_lowercase()) {
        Some(lang) if !lang.is_empty() && lang != "en" => lang,
        _ => return Json((*state.prompts).clone()),
    };

    let resolver = state.pipeline.resolver();
    let mut translated = Vec::with_capacity(state.prompts.prompts.len());
    for prompt in &state.prompts.prompts {
        match resolver.translate(&prompt.text, "en", &lang).await {
            TranslationOutcome::Translated(text) => translated.push(ExamplePrompt {
                category: prompt.category.clone(),
                text,
            }),
            TranslationOutcome::Failed(failure) => {
                warn!(lang = %lang, reason = ?failure, "Example prompt translation failed");
                return Json((*state.prompts).clone());
            }
        }
    }
    Json(ExamplePrompts {
        prompts: translated,
        search_tips: state.prompts.search_tips.clone(),
    })
}

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/search", post(search))
        .route("/api/health", get(health))
        .route("/api/example-prompts", get(example_prompts))
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|e| AudioSearchError::Config(format!("invalid CORS origin {o:?}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any))
}

/// The full application: API routes, `/audio` static files, CORS and tracing.
pub fn build_router(state: AppState, settings: &Settings) -> Result<Router> {
    Ok(api_routes()
        .nest_service("/audio", ServeDir::new(&settings.audio_dir))
        .layer(cors_layer(&settings.cors_origins)?)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

/// Load models and corpora, then serve until interrupted.
pub async fn serve(settings: Settings) -> Result<()> {
    let prompts = ExamplePrompts::load(&settings.example_prompts_path)?;
    let startup = settings.clone();
    let pipeline = tokio::task::spawn_blocking(move || SearchPipeline::from_settings(&startup))
        .await
        .map_err(|e| AudioSearchError::Model(format!("startup task failed: {e}")))??;
    info!(
        provider = pipeline.resolver().provider_name(),
        "Search pipeline ready"
    );

    let app = build_router(AppState::new(pipeline, prompts), &settings)?;
    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("audio-search listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
