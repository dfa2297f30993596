//! Session setup, readiness and teardown with the local swarm.

use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use streamtide_core::engine::PiecePriority;
use streamtide_core::session::TorrentSource;
use streamtide_core::streaming::ReadError;
use streamtide_sim::fixtures::pattern;
use tower::ServiceExt;

use crate::harness::{Harness, app, eventually};

#[tokio::test]
async fn test_readiness_turns_on_once() {
    let harness = Harness::new("movie.mp4", &[("movie.mp4", pattern(64_000, 1))], 1_024);
    let (_engine, session) = harness.start_magnet().await;
    session.wait_for_target().await.unwrap();

    // Reading the first bytes pulls in at least 5% of the torrent.
    let mut stream = session.open_stream().unwrap();
    while stream.position() < 4_000 {
        stream.next_chunk().await.unwrap();
    }

    eventually(|| session.ready()).await;
    assert!(session.became_ready());
    assert!(!session.became_ready());
    assert!(session.ready());
    session.shutdown().await;
}

#[tokio::test]
async fn test_initial_readahead_reaches_engine() {
    // 40 pieces at 5% rounds up to 2.
    let harness = Harness::new("movie.mp4", &[("movie.mp4", pattern(40 * 512, 2))], 512).throttled(1);
    let (engine, session) = harness.start_magnet().await;
    session.wait_for_target().await.unwrap();

    let torrent = engine.torrents().pop().unwrap();
    assert_eq!(torrent.priority(0), PiecePriority::Readahead);
    assert_eq!(torrent.priority(1), PiecePriority::Readahead);
    assert_eq!(torrent.priority(2), PiecePriority::Normal);
    session.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_releases_blocked_request() {
    let harness = Harness::new("movie.mp4", &[("movie.mp4", pattern(64_000, 3))], 16_384).throttled(1);
    let (engine, session) = harness.start_magnet().await;
    session.wait_for_target().await.unwrap();

    let request = tokio::spawn(
        app(&session).oneshot(
            Request::get("/")
                .header("range", "bytes=50000-")
                .body(Body::empty())
                .unwrap(),
        ),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!request.is_finished());

    session.shutdown().await;
    let response = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    assert!(session.is_shut_down());
    assert!(engine.torrents().is_empty());
    let scratch = harness
        .data_dir()
        .join(format!("{}.part", harness.seed.info_hash));
    assert!(!scratch.exists());
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let harness = Harness::new("movie.mp4", &[("movie.mp4", pattern(8_000, 4))], 1_024);
    let (_engine, session) = harness.start_magnet().await;
    session.wait_for_target().await.unwrap();

    session.shutdown().await;
    session.shutdown().await;
    assert!(session.is_shut_down());
    assert!(session.cancel_token().is_cancelled());
}

#[tokio::test]
async fn test_unknown_magnet_fails_without_peers() {
    let harness = Harness::new("movie.mp4", &[("movie.mp4", pattern(8_000, 5))], 1_024);
    let (_engine, session) = harness
        .start(TorrentSource::parse(
            "magnet:?xt=urn:btih:ffffffffffffffffffffffffffffffffffffffff",
        ))
        .await;

    match session.wait_for_target().await {
        Err(ReadError::EngineFailure { reason }) => assert!(reason.contains("no peers")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("unknown magnet produced a stream target"),
    }

    let response = app(&session)
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(!body.is_empty());
    session.shutdown().await;
}
