//! Mapping of URL paths to files in the site directory.

use std::path::{Path, PathBuf};

/// Result of looking up a request path in the site directory.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Lookup {
    /// Serve this file.
    File(PathBuf),
    /// Redirect to this site-relative path (a directory with a trailing slash).
    Redirect(String),
    /// Nothing to serve.
    NotFound,
}

/// Locate the file for a decoded, mount-relative request path.
///
/// `..` segments cannot climb above the site root. Paths ending with a slash
/// serve the directory's `index.html`; a directory requested without the
/// slash redirects to the slashed form when it has an index.
pub(crate) fn locate(root: &Path, path: &str) -> Lookup {
    let Some(segments) = normalize(path) else {
        return Lookup::NotFound;
    };
    let directory_request = segments.is_empty() || path.ends_with('/');

    let mut file = root.to_path_buf();
    file.extend(&segments);

    if directory_request {
        return Lookup::File(file.join("index.html"));
    }
    if file.is_dir() {
        if file.join("index.html").is_file() {
            return Lookup::Redirect(format!("{}/", segments.join("/")));
        }
        return Lookup::NotFound;
    }
    Lookup::File(file)
}

/// Split a path into clean segments, resolving `.` and `..`.
///
/// Returns `None` for segments that cannot name a file inside the root.
fn normalize(path: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s if s.contains(['\\', '\0']) => return None,
            s => segments.push(s),
        }
    }
    Some(segments)
}

/// Content type for a site file, guessed from its extension.
pub(crate) fn content_type(path: &Path) -> String {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("js" | "mjs") => "application/javascript".to_owned(),
        _ => mime_guess::from_path(path)
            .first()
            .map_or_else(|| "application/octet-stream".to_owned(), |m| m.essence_str().to_owned()),
    }
}

/// Whether the file is served as an HTML page with the reload script.
pub(crate) fn is_html(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<body>home</body>").unwrap();
        fs::create_dir_all(dir.path().join("guide")).unwrap();
        fs::write(dir.path().join("guide/index.html"), "guide").unwrap();
        fs::create_dir_all(dir.path().join("assets")).unwrap();
        fs::write(dir.path().join("assets/app.css"), "body{}").unwrap();
        dir
    }

    #[test]
    fn test_root_serves_index() {
        let dir = site();
        assert_eq!(locate(dir.path(), ""), Lookup::File(dir.path().join("index.html")));
        assert_eq!(locate(dir.path(), "/"), Lookup::File(dir.path().join("index.html")));
    }

    #[test]
    fn test_trailing_slash_serves_directory_index() {
        let dir = site();
        assert_eq!(
            locate(dir.path(), "guide/"),
            Lookup::File(dir.path().join("guide").join("index.html"))
        );
    }

    #[test]
    fn test_directory_without_slash_redirects() {
        let dir = site();
        assert_eq!(locate(dir.path(), "guide"), Lookup::Redirect("guide/".to_owned()));
    }

    #[test]
    fn test_directory_without_index_is_not_found() {
        let dir = site();
        assert_eq!(locate(dir.path(), "assets"), Lookup::NotFound);
    }

    #[test]
    fn test_plain_file() {
        let dir = site();
        assert_eq!(
            locate(dir.path(), "assets/app.css"),
            Lookup::File(dir.path().join("assets").join("app.css"))
        );
    }

    #[test]
    fn test_parent_segments_stay_inside_root() {
        let dir = site();
        assert_eq!(
            locate(dir.path(), "../../assets/./app.css"),
            Lookup::File(dir.path().join("assets").join("app.css"))
        );
        assert_eq!(locate(dir.path(), "guide/../.."), Lookup::File(dir.path().join("index.html")));
    }

    #[test]
    fn test_backslash_segment_rejected() {
        let dir = site();
        assert_eq!(locate(dir.path(), "..\\secret"), Lookup::NotFound);
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Path::new("a.css")), "text/css");
        assert_eq!(content_type(Path::new("a.html")), "text/html");
        assert_eq!(content_type(Path::new("a.js")), "application/javascript");
        assert_eq!(content_type(Path::new("a.png")), "image/png");
        assert_eq!(content_type(Path::new("a.unknownext")), "application/octet-stream");
        assert_eq!(content_type(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_is_html() {
        assert!(is_html(Path::new("index.html")));
        assert!(is_html(Path::new("PAGE.HTM")));
        assert!(!is_html(Path::new("style.css")));
        assert!(!is_html(Path::new("html")));
    }
}
