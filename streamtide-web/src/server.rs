//! HTTP server for the stream target and its progress.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use streamtide_core::session::StreamSession;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::error::WebError;
use crate::handlers::{api_status, stream_file};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<StreamSession>,
    /// Address players are told to open.
    pub stream_url: String,
}

/// Builds the router: `/` serves the file, `/status` reports progress.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(stream_file))
        .route("/status", get(api_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds `addr` and serves until `shutdown` is cancelled.
///
/// # Errors
/// - `WebError::Bind` - Address already in use or not permitted
/// - `WebError::Io` - Server loop failed
pub async fn run_server(
    state: AppState,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), WebError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| WebError::Bind { addr, source })?;
    serve(listener, state, shutdown).await
}

/// Serves on an already bound listener until `shutdown` is cancelled.
///
/// # Errors
/// - `WebError::Io` - Server loop failed
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), WebError> {
    tracing::info!("Content server listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tracing::info!("Content server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
    use axum::http::{Request, StatusCode};
    use streamtide_core::config::StreamingConfig;
    use streamtide_core::engine::test_mocks::{MockEngine, MockTorrent};
    use streamtide_core::session::TorrentSource;
    use tower::ServiceExt;

    use super::*;

    async fn state_with(torrent: Arc<MockTorrent>) -> AppState {
        let engine = Arc::new(MockEngine::new(torrent));
        let session = StreamSession::start(
            engine,
            TorrentSource::parse("magnet:?xt=urn:btih:0909090909090909090909090909090909090909"),
            StreamingConfig::default(),
        )
        .await
        .unwrap();
        AppState {
            session,
            stream_url: "http://localhost:9000".to_string(),
        }
    }

    #[tokio::test]
    async fn test_status_reports_progress() {
        let torrent = Arc::new(MockTorrent::new("clip.webm", vec![1; 100], 10));
        let state = state_with(torrent.clone()).await;
        state.session.wait_for_target().await.unwrap();
        torrent.verify_piece(0);
        torrent.verify_piece(1);

        let response = router(state)
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["name"], "clip.webm");
        assert_eq!(json["file"], "clip.webm");
        assert_eq!(json["total_bytes"], 100);
        assert_eq!(json["completed_bytes"], 20);
        assert_eq!(json["percentage"], 20.0);
        assert_eq!(json["connections"], 3);
        assert_eq!(json["ready"], true);
        assert_eq!(json["stream_url"], "http://localhost:9000");
    }

    #[tokio::test]
    async fn test_status_hides_url_until_ready() {
        let torrent = Arc::new(MockTorrent::new("clip.webm", vec![1; 100], 10).without_metadata());
        let state = state_with(torrent).await;

        let response = router(state)
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["ready"], false);
        assert_eq!(json["stream_url"], serde_json::Value::Null);
        assert_eq!(json["file"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_cors_is_permissive() {
        let torrent = Arc::new(MockTorrent::new("clip.webm", vec![1; 10], 10));
        let state = state_with(torrent).await;

        let response = router(state)
            .oneshot(
                Request::get("/status")
                    .header("origin", "http://player.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let torrent = Arc::new(MockTorrent::new("clip.webm", vec![1; 10], 10));
        let state = state_with(torrent).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();

        let server = tokio::spawn(serve(listener, state, shutdown.clone()));
        shutdown.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let torrent = Arc::new(MockTorrent::new("clip.webm", vec![1; 10], 10));
        let state = state_with(torrent).await;

        let result = run_server(state, addr, CancellationToken::new()).await;
        assert!(matches!(result, Err(WebError::Bind { .. })));
    }
}
