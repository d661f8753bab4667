//! HTTP API Server
//!
//! File CRUD under `/v1/files`, plus AI generation at `/v1/files/generated`.

use std::any::Any;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::QueryRejection, DefaultBodyLimit, Extension, MatchedPath, Multipart, Path, Query,
        Request, State,
    },
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::Instrument;

use crate::config::{FilesApiConfig, ServerConfig};
use crate::error::{Error, InternalErrorResponse, Result};
use crate::generate::{generate_file, ContentGenerator, OpenAiGenerator};
use crate::listing::list_files;
use crate::monitoring::{
    ColdStartTracker, RequestContext, Unit, METRIC_S3_BYTES_DOWNLOADED, METRIC_S3_BYTES_UPLOADED,
    METRIC_UNHANDLED,
};
use crate::schemas::{
    GenerateFileRequest, ListingPage, ListingQuery, PostFileResponse, PutFileResponse,
    RawGenerateRequest, RawListingParams,
};
use crate::secrets::SecretsClient;
use crate::storage::{self, ObjectStore};

/// Multipart field carrying the uploaded bytes
const UPLOAD_FIELD: &str = "file_content";

/// Wildcard capture that addresses the generation endpoint
const GENERATED_PATH: &str = "generated";

const X_ERROR: HeaderName = HeaderName::from_static("x-error");

/// `Last-Modified` layout
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Escaped when a file path is echoed into a header; non-ASCII is always escaped
const HEADER_UNSAFE: &AsciiSet = &CONTROLS.add(b'%').add(b'"');

/// Shared application state
pub struct AppState {
    /// Object store holding the files
    pub store: Arc<dyn ObjectStore>,
    /// Generation backend
    pub generator: Arc<dyn ContentGenerator>,
    /// First-request detection
    pub cold_start: ColdStartTracker,
}

impl AppState {
    pub fn new(store: Arc<dyn ObjectStore>, generator: Arc<dyn ContentGenerator>) -> Self {
        Self {
            store,
            generator,
            cold_start: ColdStartTracker::new(),
        }
    }
}

/// HTTP API server
pub struct HttpServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a server around existing backends
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn ObjectStore>,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        Self {
            config,
            state: Arc::new(AppState::new(store, generator)),
        }
    }

    /// Build the configured storage and generation backends
    pub fn from_config(config: &FilesApiConfig) -> Result<Self> {
        let store = storage::from_config(&config.storage)?;
        let secrets = SecretsClient::new(&config.secrets);
        let generator = OpenAiGenerator::new(config.generation.clone(), secrets)?;
        Ok(Self::new(config.server.clone(), store, Arc::new(generator)))
    }

    /// Router with all routes and layers
    pub fn router(&self) -> Router {
        Self::create_router(Arc::clone(&self.state), &self.config)
    }

    /// Create the router
    pub fn create_router(state: Arc<AppState>, config: &ServerConfig) -> Router {
        let files = Router::new()
            .route("/v1/files", get(handle_list_files))
            .route(
                "/v1/files/*file_path",
                get(handle_get_file)
                    .head(handle_head_file)
                    .put(handle_upload_file)
                    .delete(handle_delete_file)
                    .post(handle_generate_file),
            )
            .route_layer(CatchPanicLayer::custom(handle_panic))
            .route_layer(middleware::from_fn_with_state(Arc::clone(&state), request_context));

        let router = files
            .route("/health", get(handle_health))
            .layer(DefaultBodyLimit::max(config.max_upload_bytes()))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        if config.cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Start the HTTP server; returns after a shutdown signal
    pub async fn start(&self) -> Result<()> {
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("Files API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(format!("HTTP server error: {}", e)))?;

        tracing::info!("Files API stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

// ============ Middleware ============

/// Attach a [`RequestContext`], log the exchange, and flush its metrics
async fn request_context(
    State(state): State<Arc<AppState>>,
    matched: Option<MatchedPath>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let route = matched
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    let ctx = RequestContext::new(
        request.method().as_str(),
        &route,
        &path,
        state.cold_start.observe(),
    );
    request.extensions_mut().insert(ctx.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %ctx.request_id,
        method = %ctx.method,
        route = %ctx.route,
    );

    async move {
        tracing::info!(cold_start = ctx.cold_start, "Request received: {}", ctx.path);

        let mut response = next.run(request).await;

        let status = response.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            ctx.put_metric(METRIC_UNHANDLED, 1.0, Unit::Count);
        }
        tracing::info!(status = status.as_u16(), "Response sent: {}", ctx.path);
        ctx.metrics.flush();

        response.extensions_mut().insert(ctx);
        response
    }
    .instrument(span)
    .await
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!("Handler panicked: {}", detail);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(InternalErrorResponse::generic()),
    )
        .into_response()
}

// ============ Response Types ============

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub service: String,
    pub version: String,
}

// ============ Handlers ============

async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List files
async fn handle_list_files(
    State(state): State<Arc<AppState>>,
    params: std::result::Result<Query<RawListingParams>, QueryRejection>,
) -> Result<Json<ListingPage>> {
    let Query(raw) = params.map_err(|e| Error::validation(e.body_text(), serde_json::Value::Null))?;
    let query = ListingQuery::from_params(raw)?;

    let page = list_files(state.store.as_ref(), &query).await?;
    tracing::info!("Listed {} files", page.files.len());
    Ok(Json(page))
}

/// Upload or overwrite a file from the `file_content` multipart field
async fn handle_upload_file(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(file_path): Path<String>,
    multipart: std::result::Result<Multipart, axum::extract::multipart::MultipartRejection>,
) -> Result<Response> {
    let mut multipart = multipart
        .map_err(|e| Error::validation(format!("Field required: {}", UPLOAD_FIELD), e.body_text()))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation(e.to_string(), UPLOAD_FIELD))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let content_type = field.content_type().map(String::from);
        let content = field
            .bytes()
            .await
            .map_err(|e| Error::validation(e.to_string(), UPLOAD_FIELD))?;
        upload = Some((content, content_type));
        break;
    }

    let (content, content_type) = upload.ok_or_else(|| {
        Error::validation(format!("Field required: {}", UPLOAD_FIELD), UPLOAD_FIELD)
    })?;

    let size = content.len();
    let outcome = state
        .store
        .put(&file_path, content, content_type.as_deref())
        .await?;
    ctx.put_metric(METRIC_S3_BYTES_UPLOADED, size as f64, Unit::Bytes);

    let status = if outcome.created {
        tracing::info!("New file uploaded at path: {}", file_path);
        StatusCode::CREATED
    } else {
        tracing::info!("Existing file updated at path: {}", file_path);
        StatusCode::OK
    };

    Ok((status, Json(PutFileResponse::new(&file_path, outcome.created))).into_response())
}

/// Download a file
async fn handle_get_file(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(file_path): Path<String>,
) -> Result<Response> {
    let object = state.store.get(&file_path).await?;
    ctx.put_metric(METRIC_S3_BYTES_DOWNLOADED, object.content.len() as f64, Unit::Bytes);

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&object.head.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if object.head.content_type == "application/pdf" {
        tracing::info!("Setting Content-Disposition header to force download for PDF file.");
        let disposition = format!("attachment; filename=\"{}\"", escape_path(&file_path));
        headers.insert(header::CONTENT_DISPOSITION, header_value(&disposition));
    }

    tracing::info!("File retrieved successfully: {}", file_path);
    Ok((StatusCode::OK, headers, object.content).into_response())
}

/// File metadata, without a body
async fn handle_head_file(
    State(state): State<Arc<AppState>>,
    Path(file_path): Path<String>,
) -> Result<Response> {
    let head = match state.store.head(&file_path).await {
        Ok(head) => head,
        Err(Error::NotFound(_)) => return Ok(missing_file(&file_path)),
        Err(e) => return Err(e),
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&head.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(head.content_length));
    let last_modified = head.last_modified.format(HTTP_DATE_FORMAT).to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    tracing::info!("File metadata retrieved successfully: {}", file_path);
    Ok((StatusCode::OK, headers).into_response())
}

/// Delete a file
async fn handle_delete_file(
    State(state): State<Arc<AppState>>,
    Path(file_path): Path<String>,
) -> Result<Response> {
    if !state.store.exists(&file_path).await? {
        tracing::error!("Cannot delete file, file not found: {}", file_path);
        return Ok(missing_file(&file_path));
    }

    state.store.delete(&file_path).await?;
    tracing::info!("File deleted successfully at {}", file_path);
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Generate a file with AI and store it
async fn handle_generate_file(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(file_path): Path<String>,
    body: Bytes,
) -> Result<Response> {
    if file_path != GENERATED_PATH {
        return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response());
    }

    let raw: RawGenerateRequest = serde_json::from_slice(&body).map_err(|e| {
        Error::validation(
            format!("Invalid JSON body: {}", e),
            String::from_utf8_lossy(&body).into_owned(),
        )
    })?;
    let request = GenerateFileRequest::validate(raw)?;

    if state.store.exists(&request.file_path).await? {
        return Err(Error::Conflict(request.file_path));
    }

    tracing::debug!(
        "Generating {} content for {}",
        request.file_type.display_name(),
        request.file_path
    );
    let generated = generate_file(state.generator.as_ref(), &ctx, &request).await?;

    let size = generated.content.len();
    state
        .store
        .put(&request.file_path, generated.content, generated.content_type.as_deref())
        .await?;
    ctx.put_metric(METRIC_S3_BYTES_UPLOADED, size as f64, Unit::Bytes);

    let response = PostFileResponse::generated(&request);
    tracing::info!("{}", response.message);
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// 404 carrying the reason in `X-Error` (HEAD and DELETE have no body)
fn missing_file(file_path: &str) -> Response {
    tracing::error!("File not found: {}", file_path);
    let reason = format!("File not found: {}", escape_path(file_path));
    (StatusCode::NOT_FOUND, [(X_ERROR, header_value(&reason))]).into_response()
}

/// Percent-escape control characters, quotes, and non-ASCII in a file path
fn escape_path(file_path: &str) -> String {
    utf8_percent_encode(file_path, HEADER_UNSAFE).to_string()
}

/// Header value from text already passed through [`escape_path`]
fn header_value(text: &str) -> HeaderValue {
    HeaderValue::from_str(text).unwrap_or_else(|_| HeaderValue::from_static("invalid header value"))
}
