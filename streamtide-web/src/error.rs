//! Web layer errors and their HTTP status mapping.

use std::io;
use std::net::SocketAddr;

use axum::http::header::CONTENT_RANGE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use streamtide_core::streaming::ReadError;

/// Errors raised while serving the stream or running the server.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("torrent metadata is not available yet")]
    NotReady,

    #[error("range not satisfiable for {length} byte file")]
    RangeNotSatisfiable { length: u64 },

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("stream I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("failed to build response: {0}")]
    Response(#[from] axum::http::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl WebError {
    /// Status code this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            WebError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            WebError::Read(error) => read_status(error),
            WebError::Io(error) => ReadError::from_io(error)
                .map_or(StatusCode::INTERNAL_SERVER_ERROR, read_status),
            WebError::Response(_) | WebError::Bind { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn unsatisfied_length(&self) -> Option<u64> {
        match self {
            WebError::RangeNotSatisfiable { length } => Some(*length),
            WebError::Read(ReadError::OutOfRange { file_length, .. }) => Some(*file_length),
            _ => None,
        }
    }
}

fn read_status(error: &ReadError) -> StatusCode {
    match error {
        ReadError::OutOfRange { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
        ReadError::EngineFailure { .. } => StatusCode::BAD_GATEWAY,
        ReadError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::warn!("Stream request failed: {}", self);
        } else {
            tracing::debug!("Stream request rejected: {}", self);
        }

        let mut response = (status, self.to_string()).into_response();
        if let Some(length) = self.unsatisfied_length() {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{length}")) {
                response.headers_mut().insert(CONTENT_RANGE, value);
            }
        }
        response
    }
}
