//! Streaming handler for the torrent's largest file

use std::io::{self, SeekFrom};

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LAST_MODIFIED,
};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use tokio::io::AsyncSeekExt;
use tokio_util::io::ReaderStream;

use super::range::{ByteRange, extract_range_header, parse_range_header};
use crate::error::WebError;
use crate::server::AppState;

/// Serves the stream target with HTTP range support.
///
/// The first chunk is read before any header goes out, so a read that
/// fails up front still gets a meaningful status code. Everything after it
/// streams straight from the progressive reader, which never asks for
/// bytes past the end of the requested range.
///
/// # Errors
/// - `WebError::NotReady` - Metadata has not arrived yet
/// - `WebError::RangeNotSatisfiable` - Range starts past the end of the file
/// - `WebError::Read` - First chunk could not be read
pub async fn stream_file(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, WebError> {
    let target = state.session.target().ok_or(WebError::NotReady)?;
    let mut stream = state.session.open_stream().ok_or(WebError::NotReady)?;

    let total = stream.len();
    let range = parse_range_header(extract_range_header(&headers), total);
    if range == ByteRange::Unsatisfiable {
        return Err(WebError::RangeNotSatisfiable { length: total });
    }
    let length = range.content_length(total);

    let mime = mime_guess::from_path(&target.reader.file().path).first_or_octet_stream();
    let mut response = Response::builder()
        .header(ACCEPT_RANGES, "bytes")
        .header(CONTENT_TYPE, mime.as_ref())
        .header(CONTENT_LENGTH, length)
        .header(LAST_MODIFIED, http_date(Utc::now()))
        .header(CONTENT_DISPOSITION, content_disposition(target.name()));
    response = match range {
        ByteRange::Partial { start, end } => response
            .status(StatusCode::PARTIAL_CONTENT)
            .header(CONTENT_RANGE, format!("bytes {start}-{end}/{total}")),
        _ => response.status(StatusCode::OK),
    };

    if method == Method::HEAD || length == 0 {
        return Ok(response.body(Body::empty())?);
    }

    stream.seek(SeekFrom::Start(range.start())).await?;
    stream.set_limit(range.start() + length);
    let first = stream.next_chunk().await?;

    tracing::debug!(
        "Streaming {} bytes of {} from offset {}",
        length,
        target.name(),
        range.start()
    );

    let chunk_size = state.session.config().max_read_chunk as usize;
    let rest = ReaderStream::with_capacity(stream, chunk_size)
        .inspect_err(|e| tracing::debug!("Stream body ended early: {}", e));
    let body = futures::stream::once(async move { Ok::<_, io::Error>(first) }).chain(rest);

    Ok(response.body(Body::from_stream(body))?)
}

fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `attachment` disposition with an ASCII fallback name and the exact
/// UTF-8 name in `filename*`.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(name)
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::to_bytes;
    use axum::http::Request;
    use axum::http::header::RANGE;
    use chrono::TimeZone;
    use streamtide_core::config::StreamingConfig;
    use streamtide_core::engine::PiecePriority;
    use streamtide_core::engine::test_mocks::{MockEngine, MockTorrent};
    use streamtide_core::session::{StreamSession, TorrentSource};
    use tower::ServiceExt;

    use super::*;
    use crate::server::router;

    const MAGNET: &str = "magnet:?xt=urn:btih:0909090909090909090909090909090909090909";

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    async fn app_with(torrent: Arc<MockTorrent>) -> (Arc<StreamSession>, axum::Router) {
        let engine = Arc::new(MockEngine::new(torrent));
        let session = StreamSession::start(
            engine,
            TorrentSource::parse(MAGNET),
            StreamingConfig::default(),
        )
        .await
        .unwrap();
        let state = AppState {
            session: session.clone(),
            stream_url: "http://localhost:8080".to_string(),
        };
        (session, router(state))
    }

    fn get(range: Option<&str>) -> Request<Body> {
        let mut request = Request::builder().uri("/");
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        request.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_full_file_response() {
        let torrent = Arc::new(MockTorrent::new("movie.mp4", content(1000), 64));
        torrent.verify_all();
        let (session, app) = app_with(torrent.clone()).await;
        session.wait_for_target().await.unwrap();

        let response = app.oneshot(get(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[ACCEPT_RANGES], "bytes");
        assert_eq!(headers[CONTENT_TYPE], "video/mp4");
        assert_eq!(headers[CONTENT_LENGTH], "1000");
        assert!(
            headers[CONTENT_DISPOSITION]
                .to_str()
                .unwrap()
                .starts_with("attachment; filename=\"movie.mp4\"")
        );
        assert!(headers.contains_key(LAST_MODIFIED));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &torrent.content()[..]);
    }

    #[tokio::test]
    async fn test_partial_content() {
        let torrent = Arc::new(MockTorrent::new("movie.mkv", content(1000), 64));
        torrent.verify_all();
        let (session, app) = app_with(torrent.clone()).await;
        session.wait_for_target().await.unwrap();

        let response = app.oneshot(get(Some("bytes=100-299"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes 100-299/1000");
        assert_eq!(response.headers()[CONTENT_LENGTH], "200");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &torrent.content()[100..300]);
    }

    #[tokio::test]
    async fn test_suffix_range_spans_chunks() {
        let torrent = Arc::new(MockTorrent::new("movie.mkv", content(600_000), 16_384));
        torrent.verify_all();
        let (session, app) = app_with(torrent.clone()).await;
        session.wait_for_target().await.unwrap();

        let response = app.oneshot(get(Some("bytes=-300000"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers()[CONTENT_RANGE],
            "bytes 300000-599999/600000"
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 300_000);
        assert_eq!(&body[..], &torrent.content()[300_000..]);
    }

    #[tokio::test]
    async fn test_small_range_waits_only_for_its_piece() {
        let torrent = Arc::new(MockTorrent::new("movie.mkv", content(65_536), 16_384));
        torrent.verify_piece(0);
        let (session, app) = app_with(torrent.clone()).await;
        session.wait_for_target().await.unwrap();

        let response = tokio::time::timeout(
            Duration::from_secs(5),
            app.oneshot(get(Some("bytes=0-99"))),
        )
        .await
        .expect("range inside a verified piece should not wait on later pieces")
        .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes 0-99/65536");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &torrent.content()[..100]);
        for index in 1..4 {
            assert_ne!(torrent.priority(index), PiecePriority::Now);
        }
    }

    #[tokio::test]
    async fn test_dropped_request_leaves_others_running() {
        let torrent = Arc::new(MockTorrent::new("movie.mkv", content(65_536), 16_384));
        let (session, app) = app_with(torrent.clone()).await;
        session.wait_for_target().await.unwrap();

        let dropped = tokio::spawn(app.clone().oneshot(get(Some("bytes=0-99"))));
        let kept = tokio::spawn(app.oneshot(get(Some("bytes=49152-49251"))));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!dropped.is_finished());
        assert!(!kept.is_finished());

        dropped.abort();
        let aborted = dropped.await.unwrap_err();
        assert!(aborted.is_cancelled());

        torrent.verify_piece(3);
        let response = tokio::time::timeout(Duration::from_secs(5), kept)
            .await
            .expect("remaining request should complete")
            .unwrap()
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &torrent.content()[49_152..49_252]);
        assert_eq!(torrent.priority(0), PiecePriority::Now);
    }

    #[tokio::test]
    async fn test_unsatisfiable_range() {
        let torrent = Arc::new(MockTorrent::new("movie.mp4", content(1000), 64));
        let (session, app) = app_with(torrent).await;
        session.wait_for_target().await.unwrap();

        let response = app.oneshot(get(Some("bytes=5000-"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes */1000");
    }

    #[tokio::test]
    async fn test_multi_range_served_whole() {
        let torrent = Arc::new(MockTorrent::new("movie.mp4", content(100), 64));
        torrent.verify_all();
        let (session, app) = app_with(torrent).await;
        session.wait_for_target().await.unwrap();

        let response = app.oneshot(get(Some("bytes=0-9,20-29"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_LENGTH], "100");
    }

    #[tokio::test]
    async fn test_not_ready_before_metadata() {
        let torrent = Arc::new(MockTorrent::new("movie.mp4", content(100), 64).without_metadata());
        let (_session, app) = app_with(torrent).await;

        let response = app.oneshot(get(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_engine_failure_maps_to_bad_gateway() {
        let torrent = Arc::new(MockTorrent::new("movie.mp4", content(100), 64));
        let (session, app) = app_with(torrent.clone()).await;
        session.wait_for_target().await.unwrap();

        let failing = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            torrent.fail("no peers");
        });
        let response = app.oneshot(get(None)).await.unwrap();
        failing.await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_shutdown_maps_to_service_unavailable() {
        let torrent = Arc::new(MockTorrent::new("movie.mp4", content(100), 64));
        let (session, app) = app_with(torrent).await;
        session.wait_for_target().await.unwrap();

        let request = tokio::spawn(app.oneshot(get(None)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.shutdown().await;

        let response = request.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_head_skips_body() {
        let torrent = Arc::new(MockTorrent::new("movie.mp4", content(1000), 64));
        let (session, app) = app_with(torrent).await;
        session.wait_for_target().await.unwrap();

        let request = Request::builder()
            .method(Method::HEAD)
            .uri("/")
            .header(RANGE, "bytes=0-99")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_LENGTH], "100");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn test_http_date_format() {
        let time = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(http_date(time), "Sat, 09 Mar 2024 07:05:01 GMT");
    }

    #[test]
    fn test_content_disposition_escapes_name() {
        assert_eq!(
            content_disposition("Big \"Film\".mkv"),
            "attachment; filename=\"Big _Film_.mkv\"; filename*=UTF-8''Big%20%22Film%22.mkv"
        );
        assert!(content_disposition("café.mp4").starts_with("attachment; filename=\"caf_.mp4\""));
    }
}
