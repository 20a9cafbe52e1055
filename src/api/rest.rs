// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::coordinator::{CoordinatorError, IndexCoordinator};
use crate::core::metadata_filter::FilterSpec;
use crate::core::types::{fields, ChunkInput, DocumentPage, DocumentView, Metadata, SearchHit};
use crate::embedding::EmbeddingError;
use crate::retriever::{RetrievalError, Retriever};
use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_KEY_PARAM: &str = "api_key";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub max_request_size: usize,
    pub timeout: Duration,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            max_request_size: 10 * 1024 * 1024, // 10MB
            timeout: Duration::from_secs(30),
            api_key: None,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<IndexCoordinator>,
    pub retriever: Retriever,
    pub api_key: Option<Arc<str>>,
    pub persist_on_write: bool,
}

impl AppState {
    pub fn new(retriever: Retriever) -> Self {
        Self {
            coordinator: retriever.coordinator().clone(),
            retriever,
            api_key: None,
            persist_on_write: false,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.map(Arc::from);
        self
    }

    pub fn with_persist_on_write(mut self, enabled: bool) -> Self {
        self.persist_on_write = enabled;
        self
    }
}

// Request/Response types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddChunk {
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
    /// Position of the chunk within its document.
    pub chunk_id: u64,
    /// Falls back to `metadata.doc_id`.
    #[serde(default)]
    pub doc_id: Option<String>,
}

impl AddChunk {
    fn into_input(self) -> Result<ChunkInput, ErrorResponse> {
        let doc_id = match self.doc_id {
            Some(doc_id) => doc_id,
            None => self
                .metadata
                .get(fields::DOC_ID)
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    ErrorResponse::bad_request(format!(
                        "Chunk {} has no doc_id (field or metadata.doc_id)",
                        self.chunk_id
                    ))
                })?,
        };

        Ok(ChunkInput::new(doc_id, self.chunk_id, self.text, self.embedding)
            .with_metadata(self.metadata))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRequest {
    pub chunks: Vec<AddChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchByEmbeddingRequest {
    pub embedding: Vec<f32>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub filters: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchByTextRequest {
    pub text: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub filters: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordSearchRequest {
    pub keywords: String,
    #[serde(default = "default_k")]
    pub limit: usize,
    #[serde(default)]
    pub filters: Option<JsonValue>,
}

fn default_k() -> usize {
    5
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total_matches: usize,
    pub query_time_ms: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddedIds {
    pub ids: Vec<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentData {
    pub document: DocumentView,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub filter: Option<String>,
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub index_type: String,
    pub vector_count: usize,
    pub live_vectors: usize,
    pub document_count: usize,
}

// Error handling
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip)]
    pub status_code: StatusCode,
}

impl ErrorResponse {
    pub fn new(error: String) -> Self {
        Self {
            error,
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request(error: String) -> Self {
        Self {
            error,
            status_code: StatusCode::BAD_REQUEST,
        }
    }

    pub fn with_status(status_code: StatusCode, error: String) -> Self {
        Self { error, status_code }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status_code, Json(self)).into_response()
    }
}

impl From<CoordinatorError> for ErrorResponse {
    fn from(err: CoordinatorError) -> Self {
        let status = match &err {
            CoordinatorError::Configuration(_)
            | CoordinatorError::DimensionMismatch { .. }
            | CoordinatorError::InvalidVector(_)
            | CoordinatorError::InvalidFilter(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::DuplicateChunk(_) => StatusCode::CONFLICT,
            CoordinatorError::Persistence(_)
            | CoordinatorError::Index(_)
            | CoordinatorError::Inconsistent(_) => {
                error!(error = %err, "Coordinator failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::with_status(status, err.to_string())
    }
}

impl From<RetrievalError> for ErrorResponse {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Coordinator(err) => err.into(),
            RetrievalError::EmbedderNotConfigured => Self::with_status(
                StatusCode::SERVICE_UNAVAILABLE,
                RetrievalError::EmbedderNotConfigured.to_string(),
            ),
            RetrievalError::Embedding(EmbeddingError::Unavailable(msg)) => Self::with_status(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Embedding service unavailable: {}", msg),
            ),
            RetrievalError::Embedding(err) => {
                Self::with_status(StatusCode::BAD_GATEWAY, err.to_string())
            }
        }
    }
}

pub fn create_app(state: AppState, config: &ApiConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/vectors/add", post(add_vectors))
        .route("/vectors/search", post(search_by_embedding))
        .route("/vectors/search/text", post(search_by_text))
        .route("/vectors/keyword-search", post(keyword_search))
        .route(
            "/vectors/document/:doc_id",
            get(get_document).delete(delete_document),
        )
        .route("/vectors/documents", get(list_documents))
        .route("/admin/persist", post(persist))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.timeout))
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(config.max_request_size))
        .with_state(state)
}

async fn require_api_key(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = state.api_key.as_deref() {
        let supplied = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .or_else(|| params.get(API_KEY_PARAM).map(String::as_str));

        if supplied != Some(expected) {
            warn!(path = %request.uri().path(), "Rejected request with missing or invalid API key");
            return ErrorResponse::with_status(StatusCode::UNAUTHORIZED, "Invalid API key".to_string())
                .into_response();
        }
    }
    next.run(request).await
}

fn parse_filters(filters: Option<&JsonValue>) -> Result<Option<FilterSpec>, ErrorResponse> {
    match filters {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => FilterSpec::from_json(value)
            .map(Some)
            .map_err(|e| ErrorResponse::from(CoordinatorError::InvalidFilter(e))),
    }
}

/// Persists after a successful write when configured to. The write itself
/// already succeeded, so a failed checkpoint is logged rather than returned.
async fn persist_after_write(state: &AppState) {
    if !state.persist_on_write {
        return;
    }
    if let Err(e) = state.coordinator.checkpoint().await {
        error!(error = %e, "Failed to persist after write");
    }
}

// Handler implementations
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.coordinator.stats().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "vector-store".to_string(),
        index_type: stats.kind.to_string(),
        vector_count: stats.index_size,
        live_vectors: stats.live_vectors,
        document_count: stats.documents,
    })
}

async fn add_vectors(
    State(state): State<AppState>,
    Json(request): Json<AddRequest>,
) -> Result<Json<ApiResponse<AddedIds>>, ErrorResponse> {
    let chunks = request
        .chunks
        .into_iter()
        .map(AddChunk::into_input)
        .collect::<Result<Vec<_>, _>>()?;
    let count = chunks.len();

    let ids = state.coordinator.add(chunks).await?;
    persist_after_write(&state).await;

    info!(count, "Added chunks via API");
    Ok(Json(ApiResponse::ok(
        format!("Successfully added {} chunks to the vector store", count),
        AddedIds { ids },
    )))
}

async fn search_by_embedding(
    State(state): State<AppState>,
    Json(request): Json<SearchByEmbeddingRequest>,
) -> Result<Json<SearchResponse>, ErrorResponse> {
    let start = Instant::now();
    let filters = parse_filters(request.filters.as_ref())?;

    let results = state
        .retriever
        .search_by_vector(&request.embedding, request.k, filters.as_ref())
        .await?;

    Ok(Json(SearchResponse {
        total_matches: results.len(),
        results,
        query_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    }))
}

async fn search_by_text(
    State(state): State<AppState>,
    Json(request): Json<SearchByTextRequest>,
) -> Result<Json<SearchResponse>, ErrorResponse> {
    let start = Instant::now();
    let filters = parse_filters(request.filters.as_ref())?;

    let results = state
        .retriever
        .search_by_text(&request.text, request.k, filters.as_ref())
        .await?;

    Ok(Json(SearchResponse {
        total_matches: results.len(),
        results,
        query_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    }))
}

async fn keyword_search(
    State(state): State<AppState>,
    Json(request): Json<KeywordSearchRequest>,
) -> Result<Json<SearchResponse>, ErrorResponse> {
    let start = Instant::now();
    let filters = parse_filters(request.filters.as_ref())?;

    let (results, total_matches) = state
        .coordinator
        .keyword_search(&request.keywords, request.limit, filters.as_ref())
        .await?;

    Ok(Json(SearchResponse {
        results,
        total_matches,
        query_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    }))
}

async fn get_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Json<ApiResponse<DocumentData>> {
    match state.retriever.get_document(&doc_id).await {
        Some(document) => Json(ApiResponse::ok(
            "Document retrieved successfully",
            DocumentData { document },
        )),
        None => Json(ApiResponse::not_found(format!(
            "Document with ID {} not found",
            doc_id
        ))),
    }
}

async fn delete_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Json<ApiResponse<()>> {
    if !state.coordinator.delete(&doc_id).await {
        return Json(ApiResponse::not_found(format!(
            "Document with ID {} not found",
            doc_id
        )));
    }
    persist_after_write(&state).await;

    Json(ApiResponse {
        success: true,
        message: format!("Document with ID {} deleted successfully", doc_id),
        data: None,
    })
}

async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<DocumentPage>>, ErrorResponse> {
    let page = state
        .coordinator
        .list_documents(query.page, query.limit, query.filter.as_deref())
        .await?;

    Ok(Json(ApiResponse::ok(
        format!("Retrieved {} documents", page.documents.len()),
        page,
    )))
}

async fn persist(State(state): State<AppState>) -> Result<Json<ApiResponse<()>>, ErrorResponse> {
    state.coordinator.checkpoint().await?;
    Ok(Json(ApiResponse {
        success: true,
        message: "Index persisted".to_string(),
        data: None,
    }))
}
