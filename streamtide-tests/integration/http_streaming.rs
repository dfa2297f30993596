//! HTTP streaming against the local swarm engine.

use axum::body::{Body, to_bytes};
use axum::http::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use axum::http::{Request, StatusCode};
use streamtide_sim::fixtures::pattern;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::harness::{Harness, app};

fn request(range: Option<&str>) -> Request<Body> {
    let mut builder = Request::get("/");
    if let Some(range) = range {
        builder = builder.header(RANGE, range);
    }
    builder.body(Body::empty()).unwrap()
}

fn show() -> Harness {
    Harness::new(
        "show",
        &[
            ("sample.mkv", pattern(5_000, 1)),
            ("Season 1/episode.mkv", pattern(70_000, 2)),
            ("notes.nfo", pattern(300, 3)),
        ],
        4_096,
    )
}

#[tokio::test]
async fn test_magnet_stream_serves_whole_file() {
    let harness = Harness::new("movie.mp4", &[("movie.mp4", pattern(150_000, 9))], 16_384);
    let (_engine, session) = harness.start_magnet().await;
    session.wait_for_target().await.unwrap();

    let response = app(&session).oneshot(request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_LENGTH], "150000");
    assert_eq!(response.headers()[CONTENT_TYPE], "video/mp4");

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], &harness.seed.content[..]);
    session.shutdown().await;
}

#[tokio::test]
async fn test_range_request_targets_largest_file() {
    let harness = show();
    let episode = pattern(70_000, 2);
    let (_engine, session) = harness.start_magnet().await;
    let target = session.wait_for_target().await.unwrap();
    assert_eq!(target.reader.file().path, "Season 1/episode.mkv");

    let response = app(&session)
        .oneshot(request(Some("bytes=1000-20999")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes 1000-20999/70000");
    assert_eq!(response.headers()[CONTENT_TYPE], "video/x-matroska");

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], &episode[1000..21000]);
    session.shutdown().await;
}

#[tokio::test]
async fn test_range_past_end_is_unsatisfiable() {
    let harness = show();
    let (_engine, session) = harness.start_magnet().await;
    session.wait_for_target().await.unwrap();

    let response = app(&session)
        .oneshot(request(Some("bytes=70000-")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes */70000");
    session.shutdown().await;
}

#[tokio::test]
async fn test_status_after_download_completes() {
    let harness = Harness::new("clip.webm", &[("clip.webm", pattern(40_000, 4))], 4_096);
    let (_engine, session) = harness.start_magnet().await;
    session.wait_for_target().await.unwrap();

    // Reading the whole file forces every piece to arrive.
    let response = app(&session).oneshot(request(None)).await.unwrap();
    to_bytes(response.into_body(), usize::MAX).await.unwrap();

    let response = app(&session)
        .oneshot(Request::get("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["name"], "clip.webm");
    assert_eq!(status["total_bytes"], 40_000);
    assert_eq!(status["completed_bytes"], 40_000);
    assert_eq!(status["percentage"], 100.0);
    assert_eq!(status["ready"], true);
    assert_eq!(status["stream_url"], "http://localhost:8080");
    session.shutdown().await;
}

#[tokio::test]
async fn test_stream_over_tcp() {
    let harness = Harness::new("movie.mp4", &[("movie.mp4", pattern(90_000, 6))], 8_192);
    let (_engine, session) = harness.start_magnet().await;
    session.wait_for_target().await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(streamtide_web::serve(
        listener,
        streamtide_web::AppState {
            session: session.clone(),
            stream_url: format!("http://localhost:{}", addr.port()),
        },
        shutdown.clone(),
    ));

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/"))
        .header("Range", "bytes=-10000")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["accept-ranges"], "bytes");
    let body = response.bytes().await.unwrap();
    assert_eq!(&body[..], &harness.seed.content[80_000..]);

    session.shutdown().await;
    shutdown.cancel();
    server.await.unwrap().unwrap();
}
