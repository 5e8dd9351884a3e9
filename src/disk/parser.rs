use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use chrono::{DateTime, Utc};
use mail_parser::{Message, MessageParser, MimeHeaders, PartType};
use regex::Regex;

use crate::db::{ParsedAttachment, ParsedMessage};
use crate::mime::render_body;

/// Parse one on-disk `.emlx` file into a `ParsedMessage`.
///
/// `.emlx` files are a decimal byte-count line, that many bytes of RFC-822
/// content, then a trailing property-list fragment holding flags. A missing
/// or unparseable length line falls back to treating the whole file as the
/// message — robustness takes priority over rejecting odd input. Returns
/// `None` only when the file cannot be read at all; a malformed RFC-822
/// body still yields a row with an empty body rather than being dropped.
pub fn parse_emlx(path: &Path, snippet_len: usize) -> Option<ParsedMessage> {
    let raw = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("unreadable message file {}: {e}", path.display());
            return None;
        }
    };

    let (rfc822, trailer) = split_emlx(&raw);

    let message = match MessageParser::default().parse(rfc822) {
        Some(msg) => msg,
        None => {
            log::warn!("malformed message body in {}", path.display());
            Message::default()
        }
    };

    let sender = message
        .from()
        .and_then(|f| f.first())
        .and_then(|addr| addr.address())
        .unwrap_or_default()
        .to_string();

    let recipients = message
        .to()
        .map(|addrs| {
            addrs
                .iter()
                .filter_map(|addr| addr.address())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();

    let subject = message.subject().map(|s| s.to_string()).unwrap_or_default();

    let text_plain = extract_text_body(&message);
    let text_html = extract_html_body(&message);
    let body = render_body(text_plain.as_deref(), text_html.as_deref());
    let snippet = body.chars().take(snippet_len).collect();

    let date_received = message
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(|| file_mtime(path).unwrap_or_else(Utc::now));

    let attachments: Vec<ParsedAttachment> = message
        .attachments()
        .map(|part| {
            let filename = part
                .attachment_name()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unnamed".to_string());

            let mime_type = part
                .content_type()
                .map(|ct| format!("{}/{}", ct.ctype(), ct.subtype().unwrap_or("octet-stream")))
                .unwrap_or_else(|| "application/octet-stream".to_string());

            let file_size = match &part.body {
                PartType::Binary(data) => data.len(),
                PartType::Text(data) => data.len(),
                PartType::Html(data) => data.len(),
                _ => 0,
            } as u64;

            ParsedAttachment {
                filename,
                mime_type,
                file_size,
                content_id: part.content_id().map(|s| s.to_string()),
            }
        })
        .collect();

    let message_id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or_else(|| hash_message_id(message.message_id()));

    let flags = extract_flags(trailer);

    Some(ParsedMessage {
        message_id,
        subject,
        sender,
        recipients,
        body,
        snippet,
        date_received,
        emlx_path: path.to_string_lossy().into_owned(),
        flags,
        attachments,
    })
}

fn extract_text_body(message: &Message) -> Option<String> {
    for part in message.text_bodies() {
        if let PartType::Text(text) = &part.body {
            return Some(text.to_string());
        }
    }
    None
}

fn extract_html_body(message: &Message) -> Option<String> {
    for part in message.html_bodies() {
        if let PartType::Html(html) = &part.body {
            return Some(html.to_string());
        }
    }
    None
}

/// Split an `.emlx` blob into its RFC-822 slice and trailing plist fragment,
/// using the leading decimal byte-count line. Falls back to treating the
/// whole buffer as the message when the length line is absent or invalid.
fn split_emlx(raw: &[u8]) -> (&[u8], &[u8]) {
    let newline_pos = match raw.iter().position(|&b| b == b'\n') {
        Some(pos) => pos,
        None => return (raw, &[]),
    };

    let len_line = &raw[..newline_pos];
    let len_str = std::str::from_utf8(len_line).unwrap_or("").trim();
    let body_len: usize = match len_str.parse() {
        Ok(n) => n,
        Err(_) => return (raw, &[]),
    };

    let body_start = newline_pos + 1;
    let body_end = (body_start + body_len).min(raw.len());
    (&raw[body_start..body_end], &raw[body_end..])
}

fn flags_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<key>flags</key>\s*<integer>(\d+)</integer>").unwrap())
}

fn extract_flags(trailer: &[u8]) -> i64 {
    let text = String::from_utf8_lossy(trailer);
    flags_pattern()
        .captures(&text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn hash_message_id(message_id: Option<&str>) -> i64 {
    let mut hasher = DefaultHasher::new();
    message_id.unwrap_or("").hash(&mut hasher);
    (hasher.finish() & 0x7fff_ffff_ffff_ffff) as i64
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_emlx(dir: &Path, name: &str, rfc822: &str, trailer: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut content = format!("{}\n{}", rfc822.len(), rfc822).into_bytes();
        content.extend_from_slice(trailer.as_bytes());
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn parses_subject_and_body_from_rfc822() {
        let tmp = tempfile::tempdir().unwrap();
        let rfc822 =
            "From: alice@example.com\r\nTo: bob@example.com\r\nSubject: Hello\r\n\r\nHi there\r\n";
        let path = write_emlx(tmp.path(), "42.emlx", rfc822, "");
        let parsed = parse_emlx(&path, 200).unwrap();
        assert_eq!(parsed.message_id, 42);
        assert_eq!(parsed.subject, "Hello");
        assert_eq!(parsed.sender, "alice@example.com");
        assert!(parsed.body.contains("Hi there"));
    }

    #[test]
    fn missing_length_line_falls_back_to_whole_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("7.emlx");
        std::fs::write(&path, b"Subject: no length line\r\n\r\nBody").unwrap();
        let parsed = parse_emlx(&path, 200);
        assert!(parsed.is_some());
    }

    #[test]
    fn non_numeric_file_stem_falls_back_to_message_id_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let rfc822 = "From: a@example.com\r\nMessage-ID: <stable@example.com>\r\n\r\nBody\r\n";
        let path = write_emlx(tmp.path(), "not-a-number.emlx", rfc822, "");
        let a = parse_emlx(&path, 200).unwrap();
        let b = parse_emlx(&path, 200).unwrap();
        assert_eq!(a.message_id, b.message_id);
    }

    #[test]
    fn extracts_flags_from_plist_trailer() {
        let trailer = "<plist><dict><key>flags</key><integer>9</integer></dict></plist>";
        assert_eq!(extract_flags(trailer.as_bytes()), 9);
    }

    #[test]
    fn absent_flags_defaults_to_zero() {
        assert_eq!(extract_flags(b""), 0);
    }

    #[test]
    fn unreadable_file_returns_none() {
        let parsed = parse_emlx(Path::new("/nonexistent/path/1.emlx"), 200);
        assert!(parsed.is_none());
    }
}
