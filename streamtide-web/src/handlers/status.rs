//! JSON progress endpoint

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;

use crate::server::AppState;

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub name: String,
    pub file: Option<String>,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    pub percentage: f64,
    pub connections: usize,
    pub ready: bool,
    /// Only advertised once the stream is ready to play.
    pub stream_url: Option<String>,
}

pub async fn api_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.session.status();
    let percentage = if status.total_bytes == 0 {
        0.0
    } else {
        status.completed_bytes as f64 * 100.0 / status.total_bytes as f64
    };

    Json(StatusResponse {
        file: state
            .session
            .target()
            .map(|target| target.reader.file().path.clone()),
        stream_url: status.ready.then(|| state.stream_url.clone()),
        name: status.name,
        total_bytes: status.total_bytes,
        completed_bytes: status.completed_bytes,
        percentage,
        connections: status.connections,
        ready: status.ready,
    })
}
