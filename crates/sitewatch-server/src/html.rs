//! Reload script injection into served HTML pages.

/// Insert the reload script before the first `</body>` (matched case
/// insensitively), or append it when the page has no closing body tag.
pub(crate) fn inject_script(content: &[u8], epoch: u64, request_id: u64, timeout_ms: u64) -> Vec<u8> {
    let script = format!(
        r#"<script src="/js/livereload.js"></script><script>livereload({epoch}, {request_id}, {timeout_ms});</script>"#
    );
    let position = find_body_close(content).unwrap_or(content.len());

    let mut output = Vec::with_capacity(content.len() + script.len());
    output.extend_from_slice(&content[..position]);
    output.extend_from_slice(script.as_bytes());
    output.extend_from_slice(&content[position..]);
    output
}

fn find_body_close(content: &[u8]) -> Option<usize> {
    const TAG: &[u8] = b"</body>";
    content
        .windows(TAG.len())
        .position(|window| window.eq_ignore_ascii_case(TAG))
}
