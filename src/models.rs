use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One indexed message. `rowid` doubles as the FTS5 document id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Email {
    pub rowid: i64,
    pub message_id: i64,
    pub account: String,
    pub mailbox: String,
    pub subject: String,
    pub sender: String,
    pub recipients: String,
    pub date_received: DateTime<Utc>,
    pub snippet: String,
    pub emlx_path: String,
    pub attachment_count: u32,
    pub flags: i64,
}

/// An attachment belonging to an `Email` row, keyed by the parent row's rowid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub email_rowid: i64,
    pub filename: String,
    pub mime_type: String,
    pub file_size: u64,
    pub content_id: Option<String>,
}

/// A single search hit: the matched email plus the engine's relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub email: Email,
    pub score: f64,
}

/// Which FTS columns a result's terms actually landed in — computed
/// post-hoc, independent of the engine's own column-weighting.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchedColumns {
    pub subject: bool,
    pub sender: bool,
    pub recipients: bool,
    pub body: bool,
}

impl MatchedColumns {
    pub fn as_set(&self) -> Vec<&'static str> {
        let mut set = Vec::new();
        if self.subject {
            set.push("subject");
        }
        if self.sender {
            set.push("sender");
        }
        if self.recipients {
            set.push("recipients");
        }
        if self.body {
            set.push("body");
        }
        set
    }
}

/// Aggregate index health, returned by `get_stats`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexStats {
    pub email_count: u64,
    pub mailbox_count: u64,
    pub last_sync: Option<DateTime<Utc>>,
    pub staleness_hours: f64,
    pub capped_mailboxes: u64,
}

/// One account identifier plus how many indexed messages it has, returned
/// by `list_accounts`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountSummary {
    pub account: String,
    pub email_count: u64,
}

/// A message's resolved location, returned by `find_email_location`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailLocation {
    pub account: String,
    pub mailbox: String,
}
