/// Render a message body to plain text for indexing and snippet extraction.
///
/// Prefers text/plain when available; falls back to sanitized HTML
/// conversion so bodies that only ship an HTML part are still searchable.
pub fn render_body(text_plain: Option<&str>, text_html: Option<&str>) -> String {
    html_safe_md::render_email_plain(text_plain, text_html)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_preferred_over_html() {
        let result = render_body(Some("Hello, world"), Some("<p>Hello, world</p>"));
        assert_eq!(result, "Hello, world");
    }

    #[test]
    fn falls_back_to_html_when_no_plain() {
        let result = render_body(None, Some("<p>Hello</p>"));
        assert!(!result.is_empty());
        assert!(result.contains("Hello"));
        assert!(!result.contains("<p>"));
    }

    #[test]
    fn no_content_when_both_none() {
        let result = render_body(None, None);
        assert_eq!(result, "[No displayable content]");
    }

    #[test]
    fn plain_text_returned_verbatim() {
        let input = "Line one\n\nLine two\n  indented";
        assert_eq!(render_body(Some(input), None), input);
    }

    #[test]
    fn strips_tracking_pixels_from_html_only_body() {
        let html = r#"<p>Real content</p><img src="https://track.example.com/open.gif" width="1" height="1">"#;
        let result = render_body(None, Some(html));
        assert!(result.contains("Real content"));
        assert!(!result.contains("track.example.com"));
    }
}
