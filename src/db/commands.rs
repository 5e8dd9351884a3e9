use std::collections::HashSet;

use tokio::sync::oneshot;

use crate::models::{AccountSummary, Attachment, Email, EmailLocation, IndexStats, SearchResult};

/// One parsed on-disk message, ready to be reconciled into a mailbox's rows.
/// Produced by the disk scanner / message parser, independent of any DB
/// connection.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub message_id: i64,
    pub subject: String,
    pub sender: String,
    pub recipients: String,
    pub body: String,
    pub snippet: String,
    pub date_received: chrono::DateTime<chrono::Utc>,
    pub emlx_path: String,
    pub flags: i64,
    pub attachments: Vec<ParsedAttachment>,
}

#[derive(Debug, Clone)]
pub struct ParsedAttachment {
    pub filename: String,
    pub mime_type: String,
    pub file_size: u64,
    pub content_id: Option<String>,
}

/// Outcome of reconciling one (account, mailbox) against a parsed snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxSyncResult {
    pub added: u32,
    pub refreshed: u32,
    pub removed: u32,
    pub was_capped: bool,
}

#[derive(Debug, Clone)]
pub struct AttachmentHit {
    pub email: Email,
    pub attachment: Attachment,
}

pub(super) enum DbCmd {
    Search {
        fts_query: String,
        account: Option<String>,
        mailbox: Option<String>,
        exclude_mailboxes: Vec<String>,
        limit: u32,
        reply: oneshot::Sender<Result<Vec<SearchResult>, String>>,
    },
    CountMatches {
        fts_query: String,
        account: Option<String>,
        mailbox: Option<String>,
        exclude_mailboxes: Vec<String>,
        reply: oneshot::Sender<Result<u64, String>>,
    },
    SearchAttachments {
        fts_query: String,
        account: Option<String>,
        mailbox: Option<String>,
        limit: u32,
        reply: oneshot::Sender<Result<Vec<AttachmentHit>, String>>,
    },
    ListAccounts {
        reply: oneshot::Sender<Result<Vec<AccountSummary>, String>>,
    },
    GetEmails {
        account: Option<String>,
        mailbox: Option<String>,
        limit: u32,
        offset: u32,
        reply: oneshot::Sender<Result<Vec<Email>, String>>,
    },
    GetEmailAttachments {
        message_id: i64,
        account: Option<String>,
        mailbox: Option<String>,
        reply: oneshot::Sender<Result<Option<Vec<Attachment>>, String>>,
    },
    FindEmailLocation {
        message_id: i64,
        account: Option<String>,
        mailbox: Option<String>,
        reply: oneshot::Sender<Result<Option<EmailLocation>, String>>,
    },
    FindEmailPath {
        message_id: i64,
        account: Option<String>,
        mailbox: Option<String>,
        reply: oneshot::Sender<Result<Option<String>, String>>,
    },
    GetStats {
        staleness_hours: f64,
        reply: oneshot::Sender<Result<IndexStats, String>>,
    },
    HasIndex {
        reply: oneshot::Sender<Result<bool, String>>,
    },
    GetIndexedMessageIds {
        account: Option<String>,
        mailbox: Option<String>,
        reply: oneshot::Sender<Result<HashSet<i64>, String>>,
    },
    SyncMailbox {
        account: String,
        mailbox: String,
        messages: Vec<ParsedMessage>,
        max_emails: u32,
        reply: oneshot::Sender<Result<MailboxSyncResult, String>>,
    },
}
