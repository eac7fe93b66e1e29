//! HTTP Serving Surface
//!
//! Serves the local mirror's static root: `repo/` under `/repo/`, the
//! landing page at `/`, and a liveness probe at `/healthz` that only checks
//! the static root is mounted. Whether a build has completed yet does not
//! affect liveness.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use thiserror::Error;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Errors starting or running the server
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("invalid bind address {0}")]
    Bind(String),

    #[error("cannot prepare static root {path}: {source}")]
    Root { path: PathBuf, source: io::Error },

    #[error("server error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug)]
struct ServeState {
    root: PathBuf,
}

/// Router over the static root `root`
pub fn router(root: PathBuf) -> Router {
    let state = Arc::new(ServeState { root: root.clone() });

    Router::new()
        .route("/healthz", get(healthz))
        .route_service("/", ServeFile::new(root.join("index.html")))
        .nest_service("/repo", ServeDir::new(root.join("repo")))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<ServeState>>) -> impl IntoResponse {
    if state.root.is_dir() {
        let index = state.root.join("repo").is_dir();
        (StatusCode::OK, Json(json!({"status": "ok", "index": index})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unavailable", "index": false})),
        )
    }
}

/// Create the static root, bind `bind` and serve until Ctrl-C
pub async fn run(bind: &str, root: PathBuf) -> Result<(), ServeError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| ServeError::Bind(bind.to_string()))?;

    tokio::fs::create_dir_all(&root)
        .await
        .map_err(|source| ServeError::Root {
            path: root.clone(),
            source,
        })?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, root = %root.display(), "serving repository");

    axum::serve(listener, router(root))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::fs;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_healthz_before_any_build() {
        let dir = TempDir::new().unwrap();
        let (status, body) = get(router(dir.path().to_path_buf()), "/healthz").await;

        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["index"], false);
    }

    #[tokio::test]
    async fn test_healthz_without_root() {
        let dir = TempDir::new().unwrap();
        let app = router(dir.path().join("missing"));

        let (status, _) = get(app, "/healthz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_static_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("repo")).unwrap();
        fs::write(dir.path().join("repo/index-v1.jar"), "signed").unwrap();
        fs::write(dir.path().join("index.html"), "<h1>apps</h1>").unwrap();
        let app = router(dir.path().to_path_buf());

        let (status, body) = get(app.clone(), "/repo/index-v1.jar").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"signed");

        let (status, body) = get(app.clone(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"<h1>apps</h1>");

        let (status, _) = get(app, "/repo/missing.apk").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
