//! HTTP server for the health probe and recording retrieval
//!
//! Provides HTTP endpoints:
//! - GET /ping - Liveness probe
//! - GET /recordings - List recording files
//! - GET /recordings/:filename - Download a recording

use crate::error::{Error, Result};
use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

/// HTTP server state shared across handlers
#[derive(Clone)]
struct ServerState {
    /// Directory the signaling server writes recordings into
    recordings_dir: Arc<PathBuf>,
}

/// HTTP server exposing the recordings directory
pub struct HttpServer {
    /// Server bind address
    bind_address: String,
    /// Shared server state
    state: ServerState,
}

impl HttpServer {
    /// Create a new HTTP server
    ///
    /// # Arguments
    ///
    /// * `bind_address` - Address to bind to (e.g., "0.0.0.0:9000")
    /// * `recordings_dir` - Directory served under `/recordings`
    pub fn new(bind_address: String, recordings_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind_address,
            state: ServerState {
                recordings_dir: Arc::new(recordings_dir.into()),
            },
        }
    }

    /// Build the router with all endpoints
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ping", get(ping_handler))
            .route("/recordings", get(list_recordings_handler))
            .route("/recordings/:filename", get(get_recording_handler))
            .with_state(self.state.clone())
            .layer(
                tower::ServiceBuilder::new()
                    .layer(tower_http::trace::TraceLayer::new_for_http())
                    .layer(tower_http::cors::CorsLayer::permissive()),
            )
    }

    /// Start the HTTP server
    ///
    /// This method blocks until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending::<()>()).await
    }

    /// Start the HTTP server, stopping gracefully once `signal` resolves
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: std::net::SocketAddr = self
            .bind_address
            .parse()
            .map_err(|e| Error::ServerError(format!("Invalid bind address: {}", e)))?;

        let router = self.router();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::ServerError(format!("Failed to bind: {}", e)))?;
        tracing::info!(
            recordings_dir = %self.state.recordings_dir.display(),
            "HTTP server listening on http://{}",
            addr
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| Error::ServerError(format!("Server error: {}", e)))?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }
}

/// Reject anything that is not a plain, visible file name
fn validate_filename(name: &str) -> Result<()> {
    let plain = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0']);
    if plain {
        Ok(())
    } else {
        Err(Error::InvalidFilename(name.to_string()))
    }
}

// Handler implementations

/// GET /ping - Liveness probe
async fn ping_handler() -> &'static str {
    "PONG"
}

/// GET /recordings - Sorted list of recording file names
async fn list_recordings_handler(State(state): State<ServerState>) -> Result<Json<Vec<String>>> {
    let mut entries = match tokio::fs::read_dir(state.recordings_dir.as_ref()).await {
        Ok(entries) => entries,
        // nothing recorded yet
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Json(Vec::new())),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }
    names.sort();

    Ok(Json(names))
}

/// GET /recordings/:filename - Raw recording bytes
async fn get_recording_handler(
    State(state): State<ServerState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse> {
    validate_filename(&filename)?;

    let path = state.recordings_dir.join(&filename);
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(filename));
        }
        Err(e) => return Err(e.into()),
    };
    tracing::debug!(file = %filename, bytes = data.len(), "serving recording");

    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ),
    ];
    Ok((headers, data))
}
