//! Reload client script and long-poll endpoint.
//!
//! Every served HTML page loads `/js/livereload.js` and calls
//! `livereload(epoch, requestId, timeoutMs)`. The script polls
//! `/livereload/{epoch}/{request_id}`, which is held open until a build
//! completes (or the timeout passes) and answers with the current epoch. The
//! page reloads when the answer differs from the epoch it was served with.

use std::sync::Arc;

use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};

use super::error_response;
use crate::state::AppState;

/// Browser side of the reload protocol.
const SCRIPT: &str = include_str!("../../assets/livereload.js");

/// Handle GET /js/livereload.js.
pub(crate) async fn script() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript")], SCRIPT)
}

/// Handle GET /livereload/{epoch}/{request_id}.
///
/// Segments that are not plain decimal numbers, including ones that do not
/// decode to UTF-8, answer 404.
pub(crate) async fn poll(
    segments: Result<Path<(String, String)>, PathRejection>,
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let Ok(Path((epoch, request_id))) = segments else {
        return error_response(&state, StatusCode::NOT_FOUND, uri.path());
    };
    let (Some(known), Some(request_id)) = (parse_number(&epoch), parse_number(&request_id)) else {
        return error_response(&state, StatusCode::NOT_FOUND, uri.path());
    };

    if state.mark_connected(request_id) {
        let referer = headers
            .get(header::REFERER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-");
        tracing::info!(referer, "Browser connected");
    }

    let current = state.epoch.wait_for_change(known, state.poll_timeout).await;
    ([(header::CONTENT_TYPE, "text/plain")], current.to_string()).into_response()
}

/// Parse a path segment consisting of ASCII digits only.
fn parse_number(segment: &str) -> Option<u64> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}
