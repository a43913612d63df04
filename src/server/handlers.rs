//! HTTP request handlers.

use crate::auth::{HashScheme, RegistrationPolicy};
use crate::db::ProgressRecord;
use crate::error::{AppError, Result};
use crate::formats::{self, EPUB_MIME};
use crate::opds::{self, CATALOG_CONTENT_TYPE};
use crate::progress::ProgressUpdate;
use crate::server::AppState;
use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

const SYNC_USER_HEADER: &str = "x-auth-user";
const SYNC_KEY_HEADER: &str = "x-auth-key";
const BASIC_CHALLENGE: &str = r#"Basic realm="kosync-opds""#;
const CATALOG_PATH: &str = "/catalog";

/// Account the request was authenticated as.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// Authenticated username.
    pub username: String,
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

/// Attach a cancellation token that fires when the request future is dropped.
pub async fn request_cancellation(mut request: Request, next: Next) -> Response {
    let token = CancellationToken::new();
    let _guard = token.clone().drop_guard();
    request.extensions_mut().insert(token);
    next.run(request).await
}

fn cancellation(request: &Request) -> CancellationToken {
    request
        .extensions()
        .get::<CancellationToken>()
        .cloned()
        .unwrap_or_default()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Sync protocol authentication through `X-Auth-User` / `X-Auth-Key`.
pub async fn sync_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let headers = request.headers();
    let (Some(username), Some(key)) = (
        header_value(headers, SYNC_USER_HEADER),
        header_value(headers, SYNC_KEY_HEADER),
    ) else {
        return Err(AppError::Unauthorized);
    };

    let cancel = cancellation(&request);
    let credential = state
        .blocking(move |s| s.auth.authenticate(&username, &key, &cancel))
        .await?;

    request.extensions_mut().insert(AuthUser {
        username: credential.username,
    });
    Ok(next.run(request).await)
}

/// Decode an HTTP Basic `Authorization` header into `(username, password)`.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))?;

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;

    Some((username.to_string(), password.to_string()))
}

fn challenge() -> Response {
    let mut response = AppError::Unauthorized.into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static(BASIC_CHALLENGE),
    );
    response
}

/// Catalog authentication through HTTP Basic. Never provisions accounts.
pub async fn catalog_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some((username, password)) = basic_credentials(request.headers()) else {
        return challenge();
    };

    let cancel = cancellation(&request);
    let result = state
        .blocking(move |s| {
            s.auth.authenticate_with(
                &username,
                &password,
                RegistrationPolicy::Closed,
                &cancel,
            )
        })
        .await;

    match result {
        Ok(credential) => {
            request.extensions_mut().insert(AuthUser {
                username: credential.username,
            });
            next.run(request).await
        }
        Err(AppError::Unauthorized | AppError::Forbidden(_)) => challenge(),
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// SYNC PROTOCOL
// ============================================================================

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid request: {}", e)))
}

/// Account creation request.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateUserRequest {
    username: String,
    password: String,
}

/// Account creation response.
#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    username: String,
}

/// Register an account. The password field carries the client's sync key.
pub async fn create_user(
    State(state): State<AppState>,
    Extension(cancel): Extension<CancellationToken>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateUserResponse>)> {
    if !state.config.auth.registration_enabled() {
        return Err(AppError::Forbidden(
            "User registration is disabled".to_string(),
        ));
    }

    let req: CreateUserRequest = parse_json(&body)?;
    let credential = state
        .blocking(move |s| {
            s.auth
                .create(&req.username, &req.password, HashScheme::Legacy, &cancel)
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            username: credential.username,
        }),
    ))
}

/// Authorization check response.
#[derive(Debug, Serialize)]
pub struct AuthorizedResponse {
    authorized: &'static str,
}

/// Confirm the credentials passed the gate.
pub async fn authorize(Extension(user): Extension<AuthUser>) -> Json<AuthorizedResponse> {
    tracing::debug!(username = %user.username, "Authorized");
    Json(AuthorizedResponse { authorized: "OK" })
}

/// Get reading progress.
pub async fn get_progress(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(cancel): Extension<CancellationToken>,
    Path(document): Path<String>,
) -> Result<Json<ProgressRecord>> {
    let record = state
        .blocking(move |s| s.progress.get(&user.username, &document, &cancel))
        .await?;
    Ok(Json(record))
}

/// Progress update response.
#[derive(Debug, Serialize)]
pub struct ProgressUpdateResponse {
    document: String,
    timestamp: i64,
}

/// Update reading progress.
pub async fn put_progress(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(cancel): Extension<CancellationToken>,
    body: Bytes,
) -> Result<Json<ProgressUpdateResponse>> {
    let update: ProgressUpdate = parse_json(&body)?;
    let document = update.document.clone();

    let timestamp = state
        .blocking(move |s| s.progress.upsert(&user.username, update, &cancel))
        .await?;

    Ok(Json(ProgressUpdateResponse {
        document,
        timestamp,
    }))
}

// ============================================================================
// OPDS CATALOG
// ============================================================================

/// `scheme://host` the client used to reach us.
fn base_url(headers: &HeaderMap, state: &AppState) -> String {
    let scheme = header_value(headers, "x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    let host = header_value(headers, header::HOST.as_str())
        .unwrap_or_else(|| state.config.server.bind.to_string());
    format!("{}://{}", scheme, host)
}

/// Catalog feed of every EPUB under the books directory.
pub async fn catalog(
    State(state): State<AppState>,
    Extension(cancel): Extension<CancellationToken>,
    headers: HeaderMap,
) -> Result<Response> {
    let base_url = base_url(&headers, &state);
    let catalog = state.blocking(move |s| s.catalog.build(&cancel)).await?;

    if !catalog.skipped.is_empty() {
        tracing::info!(skipped = catalog.skipped.len(), "Catalog built with skipped files");
    }

    let xml = opds::catalog_feed(&catalog, &base_url, CATALOG_PATH);
    Ok(([(header::CONTENT_TYPE, CATALOG_CONTENT_TYPE)], xml).into_response())
}

/// Raw file download.
pub async fn download_file(
    State(state): State<AppState>,
    Path(relative): Path<String>,
) -> Result<Response> {
    let path = state
        .blocking(move |s| s.catalog.resolve(&relative))
        .await?;

    let file = tokio::fs::File::open(&path).await?;
    let size = file.metadata().await?.len();

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let content_type = if formats::is_epub_name(&filename) {
        EPUB_MIME
    } else {
        "application/octet-stream"
    };
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&filename)
    );

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
