//! Request logging.
//!
//! Successful responses are logged at debug level. Anything else is logged
//! as a warning in the `"<METHOD> <path> <version>" code <status>` form.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

pub(crate) async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let version = request.version();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    if response.status().is_success() {
        tracing::debug!("\"{method} {path} {version:?}\" code {status}");
    } else {
        tracing::warn!("\"{method} {path} {version:?}\" code {status}");
    }
    response
}
