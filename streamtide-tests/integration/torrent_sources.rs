//! Local and remote `.torrent` sources.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::Request;
use axum::routing::get;
use streamtide_core::config::StreamingConfig;
use streamtide_core::session::{ConstructionError, StreamSession, TorrentSource};
use streamtide_sim::fixtures::pattern;
use tokio::net::TcpListener;
use tower::ServiceExt;

use crate::harness::{Harness, app};

async fn read_all(session: &std::sync::Arc<StreamSession>) -> Vec<u8> {
    let response = app(session)
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

/// Serves `routes` on an ephemeral port and returns its base URL.
async fn spawn_http(routes: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, routes).await });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_local_torrent_file() {
    let harness = Harness::new("movie.mp4", &[("movie.mp4", pattern(30_000, 7))], 2_048);
    let path = harness.seed.torrent_path.to_string_lossy().into_owned();
    let (_engine, session) = harness.start(TorrentSource::parse(&path)).await;

    let target = session.wait_for_target().await.unwrap();
    assert_eq!(target.name(), "movie.mp4");
    assert_eq!(read_all(&session).await, harness.seed.content);
    session.shutdown().await;
}

#[tokio::test]
async fn test_remote_torrent_file() {
    let harness = Harness::new(
        "album",
        &[("01.flac", pattern(12_000, 1)), ("02.flac", pattern(20_000, 2))],
        2_048,
    );
    let metainfo = std::fs::read(&harness.seed.torrent_path).unwrap();
    let base = spawn_http(Router::new().route(
        "/album.torrent",
        get(move || {
            let metainfo = metainfo.clone();
            async move { metainfo }
        }),
    ))
    .await;

    let (_engine, session) = harness
        .start(TorrentSource::parse(&format!("{base}/album.torrent")))
        .await;
    let target = session.wait_for_target().await.unwrap();
    assert_eq!(target.reader.file().path, "02.flac");
    assert_eq!(read_all(&session).await, pattern(20_000, 2));
    session.shutdown().await;
}

#[tokio::test]
async fn test_remote_fetch_failure() {
    let harness = Harness::new("movie.mp4", &[("movie.mp4", pattern(1_000, 1))], 512);
    let base = spawn_http(Router::new()).await;

    let result = StreamSession::start(
        harness.engine().await,
        TorrentSource::parse(&format!("{base}/missing.torrent")),
        StreamingConfig::default(),
    )
    .await;
    assert!(matches!(result, Err(ConstructionError::RemoteFetch { .. })));
}

#[tokio::test]
async fn test_missing_local_file() {
    let harness = Harness::new("movie.mp4", &[("movie.mp4", pattern(1_000, 1))], 512);
    let missing = harness.dir.path().join("nope.torrent");

    let result = StreamSession::start(
        harness.engine().await,
        TorrentSource::LocalFile(missing.clone()),
        StreamingConfig::default(),
    )
    .await;
    match result {
        Err(ConstructionError::FileNotFound { path }) => assert_eq!(path, missing),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("missing torrent file started a session"),
    }
}

#[tokio::test]
async fn test_invalid_magnet_is_rejected() {
    let harness = Harness::new("movie.mp4", &[("movie.mp4", pattern(1_000, 1))], 512);

    let result = StreamSession::start(
        harness.engine().await,
        TorrentSource::parse("magnet:?dn=no-hash"),
        StreamingConfig::default(),
    )
    .await;
    assert!(matches!(result, Err(ConstructionError::AddTorrent(_))));
}
