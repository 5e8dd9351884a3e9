//! FTS5 query compilation: turn a free-form user query into a syntactically
//! valid `MATCH` expression without ever raising on malformed input.

const FTS_SPECIAL: [char; 6] = ['-', ':', '(', ')', '^', '\''];

/// Compile a free-form query into an FTS5 `MATCH` expression.
///
/// - Balanced double-quoted phrases pass through verbatim.
/// - Trailing `*` prefix wildcards pass through verbatim.
/// - Bare `AND` / `OR` / `NOT` operators pass through verbatim.
/// - Any other bare token containing an FTS5-special character (or an
///   unbalanced quote) is wrapped in quotes, with inner quotes doubled per
///   FTS5 phrase-escaping rules.
pub fn sanitize_fts_query(query: &str) -> String {
    let query = query.trim();
    if query.is_empty() {
        return String::new();
    }

    tokenize(query)
        .into_iter()
        .map(|tok| sanitize_token(&tok))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fallback compilation used when the primary compiled form is rejected by
/// the FTS engine: quote every non-operator token individually.
pub fn escape_all_special(query: &str) -> String {
    let query = query.trim();
    if query.is_empty() {
        return String::new();
    }

    query
        .split_whitespace()
        .map(|tok| {
            if is_bare_operator(tok) {
                tok.to_string()
            } else {
                quote_token(tok.trim_matches('"'))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Which FTS columns a result's terms landed in, computed independently of
/// the search engine's own scoring — body is always considered matched
/// since every row has body content contributing to the score.
pub fn detect_matched_columns(
    query: &str,
    subject: &str,
    sender: &str,
    recipients: &str,
) -> crate::models::MatchedColumns {
    let mut matched = crate::models::MatchedColumns {
        body: true,
        ..Default::default()
    };

    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect();

    if terms.is_empty() {
        return matched;
    }

    let subject_lower = subject.to_lowercase();
    let sender_lower = sender.to_lowercase();
    let recipients_lower = recipients.to_lowercase();

    for term in &terms {
        if subject_lower.contains(term.as_str()) {
            matched.subject = true;
        }
        if sender_lower.contains(term.as_str()) {
            matched.sender = true;
        }
        if recipients_lower.contains(term.as_str()) {
            matched.recipients = true;
        }
    }

    matched
}

fn is_bare_operator(tok: &str) -> bool {
    matches!(tok, "AND" | "OR" | "NOT")
}

fn quote_token(tok: &str) -> String {
    format!("\"{}\"", tok.replace('"', "\"\""))
}

fn sanitize_token(tok: &str) -> String {
    if tok.len() >= 2 && tok.starts_with('"') && tok.ends_with('"') {
        return tok.to_string();
    }
    if is_bare_operator(tok) {
        return tok.to_string();
    }
    if tok.contains(FTS_SPECIAL) || tok.contains('"') {
        return quote_token(tok);
    }
    tok.to_string()
}

/// Split a query into tokens, treating a balanced double-quoted run (which
/// may contain whitespace) as a single token.
fn tokenize(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = query.chars().peekable();
    let mut cur = String::new();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            if !cur.is_empty() {
                tokens.push(std::mem::take(&mut cur));
            }
            chars.next();
        } else if c == '"' && cur.is_empty() {
            let mut phrase = String::new();
            phrase.push(c);
            chars.next();
            while let Some(&c2) = chars.peek() {
                phrase.push(c2);
                chars.next();
                if c2 == '"' {
                    break;
                }
            }
            tokens.push(phrase);
        } else {
            cur.push(c);
            chars.next();
        }
    }
    if !cur.is_empty() {
        tokens.push(cur);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchedColumns;

    #[test]
    fn empty_query_stays_empty() {
        assert_eq!(sanitize_fts_query(""), "");
        assert_eq!(sanitize_fts_query("   "), "");
    }

    #[test]
    fn hyphenated_token_gets_quoted() {
        assert_eq!(sanitize_fts_query("meeting-notes"), "\"meeting-notes\"");
    }

    #[test]
    fn balanced_phrase_preserved_verbatim() {
        assert_eq!(sanitize_fts_query("\"exact phrase\""), "\"exact phrase\"");
    }

    #[test]
    fn trailing_wildcard_preserved() {
        assert_eq!(sanitize_fts_query("meet*"), "meet*");
    }

    #[test]
    fn bare_operators_preserved() {
        assert_eq!(sanitize_fts_query("hello OR world"), "hello OR world");
        assert_eq!(sanitize_fts_query("hello AND world"), "hello AND world");
        assert_eq!(sanitize_fts_query("hello NOT world"), "hello NOT world");
    }

    #[test]
    fn colon_and_parens_get_quoted() {
        assert_eq!(sanitize_fts_query("hello:"), "\"hello:\"");
        assert_eq!(sanitize_fts_query("(broken"), "\"(broken\"");
    }

    #[test]
    fn escape_all_quotes_every_term_individually() {
        assert_eq!(
            escape_all_special("hello OR world-ish"),
            "\"hello\" OR \"world-ish\""
        );
    }

    #[test]
    fn detect_matched_columns_empty_query_is_body_only() {
        let m = detect_matched_columns("", "subject", "sender", "recipients");
        assert_eq!(m, MatchedColumns { body: true, ..Default::default() });
    }

    #[test]
    fn detect_matched_columns_symbol_only_query_is_body_only() {
        let m = detect_matched_columns("***", "subject", "sender", "recipients");
        assert_eq!(m, MatchedColumns { body: true, ..Default::default() });
    }

    #[test]
    fn detect_matched_columns_checks_containment_case_insensitively() {
        let m = detect_matched_columns("Alice", "Hi Alice", "alice@example.com", "bob@example.com");
        assert!(m.subject);
        assert!(m.sender);
        assert!(!m.recipients);
        assert!(m.body);
    }
}
