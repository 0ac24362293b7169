use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE,
};
use axum::http::{HeaderValue, Method, StatusCode, Uri};
use axum::middleware::map_response;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::{debug, info, warn};

pub const DEFAULT_BIND: &str = "127.0.0.1:8000";
const INDEX_FILE: &str = "index.html";

#[derive(Clone)]
struct SiteState {
    root: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
}

/// Serves an exported wiki directory for local preview testing.
pub fn site_router(root: impl Into<PathBuf>) -> Router {
    let state = SiteState {
        root: Arc::new(root.into()),
    };
    Router::new()
        .route("/health", get(handle_health).options(handle_preflight))
        .fallback(handle_site_request)
        .layer(map_response(add_cors_headers))
        .with_state(state)
}

pub async fn run_site_server(root: &Path, bind: &str) -> Result<()> {
    anyhow::ensure!(
        root.is_dir(),
        "site root `{}` is not a directory",
        root.display()
    );
    let app = site_router(root);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind site server to `{bind}`"))?;
    let local_addr = listener.local_addr().ok();

    info!(
        root = %root.display(),
        requested_bind = %bind,
        bound_addr = local_addr.map(|addr| addr.to_string()),
        "starting site server"
    );

    axum::serve(listener, app)
        .await
        .context("site server exited with an error")
}

async fn handle_health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

async fn handle_preflight() -> StatusCode {
    StatusCode::OK
}

async fn handle_site_request(
    State(state): State<SiteState>,
    method: Method,
    uri: Uri,
) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let Some(mut path) = resolve_site_path(&state.root, uri.path()) else {
        warn!(path = uri.path(), "rejected path outside site root");
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    };
    if tokio::fs::metadata(&path)
        .await
        .is_ok_and(|metadata| metadata.is_dir())
    {
        path.push(INDEX_FILE);
    }

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!(path = uri.path(), bytes = bytes.len(), "served site file");
            ([(CONTENT_TYPE, content_type_for(&path))], bytes).into_response()
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = uri.path(), "site file not found");
            (StatusCode::NOT_FOUND, "not found").into_response()
        }
        Err(error) => {
            warn!(path = %path.display(), error = %error, "failed to read site file");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn add_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("X-Requested-With, Content-Type"),
    );
    response
}

/// Maps a request path onto `root`; `None` for anything that would escape it.
fn resolve_site_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for segment in request_path.split('/').filter(|segment| !segment.is_empty()) {
        let segment = percent_decode(segment)?;
        if segment == ".." || segment == "." || segment.contains(['/', '\\']) {
            return None;
        }
        path.push(segment);
    }
    Some(path)
}

fn percent_decode(segment: &str) -> Option<String> {
    let bytes = segment.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            let hex = segment.get(index + 1..index + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            index += 3;
        } else {
            decoded.push(bytes[index]);
            index += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|extension| extension.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}
