//! Site file serving.
//!
//! Files are read from disk on every request, so a rebuild is visible on the
//! next load without any cache invalidation. HTML pages get the reload script
//! injected before they are sent.

use std::io;
use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

use super::error_response;
use crate::html;
use crate::site::{self, Lookup};
use crate::state::AppState;

/// Characters escaped in redirect locations; `/` is kept as the separator.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Serve a file from the site directory. Used as the router fallback.
pub(crate) async fn serve_site(State(state): State<Arc<AppState>>, method: Method, uri: Uri) -> Response {
    let path = uri.path();

    if method != Method::GET && method != Method::HEAD {
        return error_response(&state, StatusCode::METHOD_NOT_ALLOWED, path);
    }

    let Ok(decoded) = percent_decode_str(path).decode_utf8() else {
        return error_response(&state, StatusCode::NOT_FOUND, path);
    };

    let Some(relative) = strip_mount_path(&state.mount_path, &decoded) else {
        if decoded == "/" {
            return redirect(&state.mount_path);
        }
        return error_response(&state, StatusCode::NOT_FOUND, path);
    };

    match site::locate(&state.root, relative) {
        Lookup::File(file) => serve_file(&state, &file, path).await,
        Lookup::Redirect(target) => redirect(&format!("{}{target}", state.mount_path)),
        Lookup::NotFound => error_response(&state, StatusCode::NOT_FOUND, path),
    }
}

/// Path relative to the mount point, or `None` when outside of it.
///
/// The mount point itself may be requested without its trailing slash.
fn strip_mount_path<'a>(mount_path: &str, path: &'a str) -> Option<&'a str> {
    if let Some(relative) = path.strip_prefix(mount_path) {
        return Some(relative);
    }
    (mount_path.strip_suffix('/') == Some(path)).then_some("")
}

async fn serve_file(state: &AppState, file: &Path, path: &str) -> Response {
    let content = match tokio::fs::read(file).await {
        Ok(content) => content,
        Err(err) if is_missing(&err) => {
            return error_response(state, StatusCode::NOT_FOUND, path);
        }
        Err(err) => {
            tracing::error!(file = %file.display(), error = %err, "Cannot read site file");
            return error_response(state, StatusCode::INTERNAL_SERVER_ERROR, path);
        }
    };

    let body = if site::is_html(file) {
        html::inject_script(
            &content,
            state.epoch.current(),
            state.next_request_id(),
            state.poll_timeout_ms(),
        )
    } else {
        content
    };

    (
        [
            (header::CONTENT_TYPE, site::content_type(file)),
            (header::CONTENT_LENGTH, body.len().to_string()),
        ],
        body,
    )
        .into_response()
}

fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory | io::ErrorKind::IsADirectory
    )
}

/// Redirect to a decoded site path, percent-encoding it for `Location`.
fn redirect(location: &str) -> Response {
    let encoded = utf8_percent_encode(location, PATH_ENCODE_SET).to_string();
    (StatusCode::FOUND, [(header::LOCATION, encoded)]).into_response()
}
