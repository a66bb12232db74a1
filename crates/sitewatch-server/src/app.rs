//! Router construction.
//!
//! Builds the axum router with all routes and middleware.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;

use crate::handlers::{files, livereload};
use crate::middleware::{access_log, headers};
use crate::state::AppState;

/// Create the application router.
///
/// The reload endpoints live at the server root whatever the mount path;
/// everything else falls through to the site directory.
pub(crate) fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/js/livereload.js", get(livereload::script))
        .route("/livereload/{epoch}/{request_id}", get(livereload::poll))
        .fallback(files::serve_site)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(access_log::log_requests))
                .layer(headers::no_cache_layer()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::{Duration, Instant};

    use axum::body::Body;
    use axum::http::{HeaderMap, Method, Request, StatusCode, header};
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    use crate::live_reload::epoch::Epoch;
    use crate::test_support::LogCapture;
    use crate::{BoxError, ErrorRenderer, ServerConfig};

    const EPOCH: u64 = 42;

    struct Response {
        status: StatusCode,
        headers: HeaderMap,
        body: Vec<u8>,
    }

    impl Response {
        fn header(&self, name: header::HeaderName) -> &str {
            self.headers
                .get(name)
                .map_or("", |value| value.to_str().unwrap())
        }

        fn text(&self) -> String {
            String::from_utf8(self.body.clone()).unwrap()
        }
    }

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test.css"), "div { color: red; }").unwrap();
        std::fs::write(dir.path().join("index.html"), "<html><body>home</body></html>").unwrap();
        std::fs::write(dir.path().join("app.js"), "let x = 1;").unwrap();
        std::fs::create_dir(dir.path().join("guide")).unwrap();
        std::fs::write(dir.path().join("guide/index.html"), "<p>guide</p>").unwrap();
        dir
    }

    fn router_with(root: &Path, configure: impl FnOnce(&mut ServerConfig)) -> (Router, Epoch) {
        let mut config = ServerConfig {
            root: root.to_path_buf(),
            ..ServerConfig::default()
        };
        configure(&mut config);
        let epoch = Epoch::starting_at(EPOCH);
        let state = Arc::new(AppState::new(&config, epoch.clone()));
        (create_router(state), epoch)
    }

    fn router(root: &Path) -> Router {
        router_with(root, |_| {}).0
    }

    async fn request(router: &Router, method: Method, uri: &str) -> Response {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        Response {
            status,
            headers,
            body,
        }
    }

    async fn get(router: &Router, uri: &str) -> Response {
        request(router, Method::GET, uri).await
    }

    fn script(epoch: u64, request_id: u64, timeout_ms: u64) -> String {
        format!(
            r#"<script src="/js/livereload.js"></script><script>livereload({epoch}, {request_id}, {timeout_ms});</script>"#
        )
    }

    #[tokio::test]
    async fn test_serves_static_file() {
        let dir = site();

        let response = get(&router(dir.path()), "/test.css").await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), "div { color: red; }");
        assert_eq!(response.header(header::CONTENT_LENGTH), "19");
        assert_eq!(response.header(header::CONTENT_TYPE), "text/css");
        assert_eq!(response.header(header::CACHE_CONTROL), "no-cache");
    }

    #[tokio::test]
    async fn test_injects_script_into_html() {
        let dir = site();
        std::fs::write(dir.path().join("page.html"), "<html><body>hello</body></html>").unwrap();

        let response = get(&router(dir.path()), "/page.html").await;

        let expected = format!("<html><body>hello{}</body></html>", script(EPOCH, 1, 60_000));
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), expected);
        assert_eq!(response.header(header::CONTENT_LENGTH), expected.len().to_string());
        assert_eq!(response.header(header::CONTENT_TYPE), "text/html");
    }

    #[tokio::test]
    async fn test_appends_script_without_body_tag() {
        let dir = site();
        std::fs::write(dir.path().join("bare.html"), "<p>bare</p>").unwrap();

        let response = get(&router(dir.path()), "/bare.html").await;

        assert_eq!(response.text(), format!("<p>bare</p>{}", script(EPOCH, 1, 60_000)));
    }

    #[tokio::test]
    async fn test_each_page_gets_new_request_id() {
        let dir = site();
        let router = router(dir.path());

        let first = get(&router, "/").await;
        let second = get(&router, "/").await;

        assert!(first.text().contains(&script(EPOCH, 1, 60_000)));
        assert!(second.text().contains(&script(EPOCH, 2, 60_000)));
    }

    #[tokio::test]
    async fn test_serves_current_epoch_in_page() {
        let dir = site();
        let (router, epoch) = router_with(dir.path(), |_| {});
        epoch.advance();

        let response = get(&router, "/").await;

        assert!(response.text().contains(&script(EPOCH + 1, 1, 60_000)));
    }

    #[tokio::test]
    async fn test_root_and_directory_index() {
        let dir = site();
        let router = router(dir.path());

        let root = get(&router, "/").await;
        let guide = get(&router, "/guide/").await;

        assert_eq!(root.status, StatusCode::OK);
        assert!(root.text().starts_with("<html><body>home<script"));
        assert_eq!(guide.status, StatusCode::OK);
        assert!(guide.text().starts_with("<p>guide</p><script"));
    }

    #[tokio::test]
    async fn test_directory_without_slash_redirects() {
        let dir = site();

        let response = get(&router(dir.path()), "/guide").await;

        assert_eq!(response.status, StatusCode::FOUND);
        assert_eq!(response.header(header::LOCATION), "/guide/");
    }

    #[tokio::test]
    async fn test_serves_unicode_filename() {
        let dir = site();
        std::fs::write(dir.path().join("café.css"), "p {}").unwrap();

        let response = get(&router(dir.path()), "/caf%C3%A9.css").await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), "p {}");
    }

    #[tokio::test]
    async fn test_invalid_utf8_path_is_not_found() {
        let dir = site();

        let response = get(&router(dir.path()), "/%D1").await;

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.text(), "404 Not Found");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = site();

        let response = get(&router(dir.path()), "/missing.html").await;

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.text(), "404 Not Found");
        assert_eq!(response.header(header::CONTENT_TYPE), "text/html");
    }

    #[tokio::test]
    async fn test_traversal_stays_inside_root() {
        let outer = tempfile::tempdir().unwrap();
        std::fs::write(outer.path().join("secret.txt"), "secret").unwrap();
        let root = outer.path().join("site");
        std::fs::create_dir(&root).unwrap();

        let response = get(&router(&root), "/../secret.txt").await;
        let encoded = get(&router(&root), "/%2E%2E/secret.txt").await;

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(encoded.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_javascript_content_type() {
        let dir = site();
        let router = router(dir.path());

        let site_script = get(&router, "/app.js").await;
        let client_script = get(&router, "/js/livereload.js").await;

        assert_eq!(site_script.header(header::CONTENT_TYPE), "application/javascript");
        assert_eq!(client_script.status, StatusCode::OK);
        assert_eq!(client_script.header(header::CONTENT_TYPE), "application/javascript");
        assert!(client_script.text().contains("function livereload("));
    }

    #[tokio::test]
    async fn test_mount_path() {
        let dir = site();
        let (router, _) = router_with(dir.path(), |config| config.mount_path = "sub".to_owned());

        let file = get(&router, "/sub/test.css").await;
        let root = get(&router, "/").await;
        let outside = get(&router, "/test.css").await;
        let bare = get(&router, "/sub").await;
        let client_script = get(&router, "/js/livereload.js").await;

        assert_eq!(file.status, StatusCode::OK);
        assert_eq!(root.status, StatusCode::FOUND);
        assert_eq!(root.header(header::LOCATION), "/sub/");
        assert_eq!(outside.status, StatusCode::NOT_FOUND);
        assert_eq!(bare.status, StatusCode::OK);
        assert!(bare.text().starts_with("<html><body>home"));
        assert_eq!(client_script.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_mounted_directory_redirect_keeps_prefix() {
        let dir = site();
        let (router, _) = router_with(dir.path(), |config| config.mount_path = "/sub/".to_owned());

        let response = get(&router, "/sub/guide").await;

        assert_eq!(response.status, StatusCode::FOUND);
        assert_eq!(response.header(header::LOCATION), "/sub/guide/");
    }

    #[tokio::test]
    async fn test_mount_path_with_space() {
        let dir = site();
        let (router, _) = router_with(dir.path(), |config| config.mount_path = "/my docs/".to_owned());

        let root = get(&router, "/").await;
        let file = get(&router, "/my%20docs/test.css").await;
        let directory = get(&router, "/my%20docs/guide").await;

        assert_eq!(root.status, StatusCode::FOUND);
        assert_eq!(root.header(header::LOCATION), "/my%20docs/");
        assert_eq!(file.status, StatusCode::OK);
        assert_eq!(file.text(), "div { color: red; }");
        assert_eq!(directory.status, StatusCode::FOUND);
        assert_eq!(directory.header(header::LOCATION), "/my%20docs/guide/");
    }

    #[tokio::test]
    async fn test_mount_path_with_unicode() {
        let dir = site();
        let (router, _) = router_with(dir.path(), |config| config.mount_path = "/文档/".to_owned());

        let root = get(&router, "/").await;
        let file = get(&router, "/%E6%96%87%E6%A1%A3/test.css").await;
        let bare = get(&router, "/%E6%96%87%E6%A1%A3").await;
        let outside = get(&router, "/%E6%96%87/test.css").await;

        assert_eq!(root.status, StatusCode::FOUND);
        assert_eq!(root.header(header::LOCATION), "/%E6%96%87%E6%A1%A3/");
        assert_eq!(file.status, StatusCode::OK);
        assert_eq!(file.text(), "div { color: red; }");
        assert_eq!(bare.status, StatusCode::OK);
        assert_eq!(outside.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_not_found_logs_warning() {
        let dir = site();
        let router = router(dir.path());
        let (logs, _guard) = LogCapture::install();

        get(&router, "/missing").await;

        let lines = logs.lines();
        assert!(
            lines
                .iter()
                .any(|line| line.contains("WARN") && line.contains(r#""GET /missing HTTP/1.1" code 404"#)),
            "{lines:?}"
        );
    }

    #[tokio::test]
    async fn test_success_is_not_logged_as_warning() {
        let dir = site();
        let router = router(dir.path());
        let (logs, _guard) = LogCapture::install();

        get(&router, "/test.css").await;

        let lines = logs.lines();
        assert!(
            lines
                .iter()
                .any(|line| line.contains("DEBUG") && line.contains(r#""GET /test.css HTTP/1.1" code 200"#)),
            "{lines:?}"
        );
        assert!(!lines.iter().any(|line| line.contains("WARN")), "{lines:?}");
    }

    #[tokio::test]
    async fn test_custom_error_renderer() {
        let dir = site();
        let renderer: ErrorRenderer =
            Arc::new(|code: u16| -> Result<Vec<u8>, BoxError> { Ok(format!("Error {code}").into_bytes()) });
        let (router, _) = router_with(dir.path(), |config| config.error_renderer = Some(renderer));

        let response = get(&router, "/missing.html").await;

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.text(), "Error 404");
    }

    #[tokio::test]
    async fn test_failing_error_renderer_falls_back() {
        let dir = site();
        let renderer: ErrorRenderer = Arc::new(|_: u16| -> Result<Vec<u8>, BoxError> {
            Err(BoxError::from("template missing"))
        });
        let (router, _) = router_with(dir.path(), |config| config.error_renderer = Some(renderer));

        let response = get(&router, "/missing.html").await;

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.text(), "404 Not Found");
    }

    #[tokio::test]
    async fn test_panicking_error_renderer_falls_back() {
        let dir = site();
        let renderer: ErrorRenderer = Arc::new(|_: u16| -> Result<Vec<u8>, BoxError> {
            panic!("renderer exploded")
        });
        let (router, _) = router_with(dir.path(), |config| config.error_renderer = Some(renderer));

        let response = get(&router, "/missing.html").await;

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.text(), "404 Not Found");
    }

    #[tokio::test]
    async fn test_failing_error_renderer_logs_error() {
        let dir = site();
        let renderer: ErrorRenderer = Arc::new(|_: u16| -> Result<Vec<u8>, BoxError> {
            Err(BoxError::from("template missing"))
        });
        let (router, _) = router_with(dir.path(), |config| config.error_renderer = Some(renderer));
        let (logs, _guard) = LogCapture::install();

        get(&router, "/missing.html").await;

        let lines = logs.lines();
        let error = lines
            .iter()
            .find(|line| line.contains("ERROR"))
            .unwrap_or_else(|| panic!("no error line in {lines:?}"));
        assert!(error.contains("Failed to render an error message"), "{error}");
        assert!(error.contains("code=404"), "{error}");
        assert!(error.contains("/missing.html"), "{error}");
        assert!(error.contains("template missing"), "{error}");
        assert!(
            lines
                .iter()
                .any(|line| line.contains("WARN") && line.contains(r#""GET /missing.html HTTP/1.1" code 404"#)),
            "{lines:?}"
        );
    }

    #[tokio::test]
    async fn test_non_get_is_rejected() {
        let dir = site();

        let response = request(&router(dir.path()), Method::POST, "/test.css").await;

        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_poll_with_stale_epoch_returns_immediately() {
        let dir = site();
        let router = router(dir.path());
        let start = Instant::now();

        let response = get(&router, "/livereload/1/7").await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), EPOCH.to_string());
        assert_eq!(response.header(header::CONTENT_TYPE), "text/plain");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_poll_times_out_with_current_epoch() {
        let dir = site();
        let (router, _) = router_with(dir.path(), |config| {
            config.poll_response_timeout = Duration::from_millis(200);
        });
        let start = Instant::now();

        let response = get(&router, &format!("/livereload/{EPOCH}/7")).await;

        assert_eq!(response.text(), EPOCH.to_string());
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_poll_wakes_on_new_epoch() {
        let dir = site();
        let (router, epoch) = router_with(dir.path(), |_| {});
        let bumper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            epoch.advance();
        });

        let response = get(&router, &format!("/livereload/{EPOCH}/7")).await;

        assert_eq!(response.text(), (EPOCH + 1).to_string());
        bumper.join().unwrap();
    }

    #[tokio::test]
    async fn test_poll_with_malformed_numbers_is_not_found() {
        let dir = site();
        let router = router(dir.path());

        assert_eq!(get(&router, "/livereload/abc/1").await.status, StatusCode::NOT_FOUND);
        assert_eq!(get(&router, "/livereload/1/-2").await.status, StatusCode::NOT_FOUND);
        assert_eq!(get(&router, "/livereload/1").await.status, StatusCode::NOT_FOUND);
        assert_eq!(get(&router, "/livereload/%FF/1").await.status, StatusCode::NOT_FOUND);
        assert_eq!(get(&router, "/livereload/1/%C3").await.status, StatusCode::NOT_FOUND);
    }
}
