//! HTTP request handlers.

pub(crate) mod files;
pub(crate) mod livereload;

use std::panic::{AssertUnwindSafe, catch_unwind};

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

/// Build an error response for `status`.
///
/// The body comes from the configured error renderer. When there is none, or
/// it fails or panics, a plain `"<code> <reason>"` body is used instead.
pub(crate) fn error_response(state: &AppState, status: StatusCode, path: &str) -> Response {
    let code = status.as_u16();
    let rendered = state.error_renderer.as_ref().and_then(|render| {
        match catch_unwind(AssertUnwindSafe(|| render(code))) {
            Ok(Ok(body)) => Some(body),
            Ok(Err(err)) => {
                tracing::error!(code, path, error = %err, "Failed to render an error message");
                None
            }
            Err(_) => {
                tracing::error!(code, path, "Failed to render an error message");
                None
            }
        }
    });
    let body = rendered.unwrap_or_else(|| default_body(status));

    (
        status,
        [(header::CONTENT_TYPE, "text/html")],
        body,
    )
        .into_response()
}

fn default_body(status: StatusCode) -> Vec<u8> {
    format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_body() {
        assert_eq!(default_body(StatusCode::NOT_FOUND), b"404 Not Found");
        assert_eq!(
            default_body(StatusCode::INTERNAL_SERVER_ERROR),
            b"500 Internal Server Error"
        );
    }
}
