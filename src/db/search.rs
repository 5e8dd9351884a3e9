use std::collections::HashSet;

use rusqlite::{types::ToSql, Connection, OptionalExtension};

use crate::models::{AccountSummary, Attachment, Email, EmailLocation, IndexStats, SearchResult};

use super::commands::AttachmentHit;

/// Shared row mapper for any query that selects the full `emails` column set
/// in this order: rowid, message_id, account, mailbox, subject, sender,
/// recipients, date_received, snippet, emlx_path, attachment_count, flags.
fn row_to_email(row: &rusqlite::Row<'_>) -> rusqlite::Result<Email> {
    let date_str: String = row.get(7)?;
    Ok(Email {
        rowid: row.get(0)?,
        message_id: row.get(1)?,
        account: row.get(2)?,
        mailbox: row.get(3)?,
        subject: row.get(4)?,
        sender: row.get(5)?,
        recipients: row.get(6)?,
        date_received: parse_date(&date_str),
        snippet: row.get(8)?,
        emlx_path: row.get(9)?,
        attachment_count: row.get::<_, i64>(10)? as u32,
        flags: row.get(11)?,
    })
}

fn parse_date(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap())
}

const EMAIL_COLUMNS: &str = "e.rowid, e.message_id, e.account, e.mailbox, e.subject, e.sender, \
     e.recipients, e.date_received, e.snippet, e.emlx_path, e.attachment_count, e.flags";

struct Filters {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl Filters {
    fn new() -> Self {
        Filters {
            clauses: Vec::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, clause: &str, value: impl ToSql + 'static) {
        self.clauses.push(clause.to_string());
        self.params.push(Box::new(value));
    }

    fn account_mailbox(account: Option<&str>, mailbox: Option<&str>) -> Self {
        let mut f = Filters::new();
        if let Some(a) = account {
            f.push("e.account = ?", a.to_string());
        }
        if let Some(m) = mailbox {
            f.push("e.mailbox = ?", m.to_string());
        }
        f
    }

    fn exclude_mailboxes(&mut self, exclude: &[String]) {
        if exclude.is_empty() {
            return;
        }
        let placeholders: Vec<String> = exclude.iter().map(|_| "?".to_string()).collect();
        self.clauses
            .push(format!("e.mailbox NOT IN ({})", placeholders.join(",")));
        for m in exclude {
            self.params.push(Box::new(m.clone()));
        }
    }

    fn where_sql(&self, extra: &str) -> String {
        let mut all = vec![extra.to_string()];
        all.extend(self.clauses.iter().cloned());
        format!("WHERE {}", all.join(" AND "))
    }

    fn refs(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}

pub(super) fn do_search(
    conn: &Connection,
    fts_query: &str,
    account: Option<&str>,
    mailbox: Option<&str>,
    exclude_mailboxes: &[String],
    limit: u32,
) -> Result<Vec<SearchResult>, String> {
    if fts_query.is_empty() {
        return Ok(Vec::new());
    }

    let mut filters = Filters::account_mailbox(account, mailbox);
    filters.exclude_mailboxes(exclude_mailboxes);

    let sql = format!(
        "SELECT {EMAIL_COLUMNS}, bm25(emails_fts) as rank
         FROM emails e JOIN emails_fts ON emails_fts.rowid = e.rowid
         {}
         ORDER BY rank ASC, e.date_received DESC, e.rowid ASC
         LIMIT ?",
        filters.where_sql("emails_fts MATCH ?")
    );

    // Prepare/execute failures here mean the FTS engine rejected the MATCH
    // expression — propagated so the caller can retry with the escape-all
    // fallback rather than being silently treated as "no results".
    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;

    let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(fts_query.to_string())];
    params.extend(filters.params);
    params.push(Box::new(limit));
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            let email = row_to_email(row)?;
            let rank: f64 = row.get(12)?;
            Ok(SearchResult {
                email,
                score: -rank,
            })
        })
        .map_err(|e| e.to_string())?;

    Ok(rows.flatten().collect())
}

pub(super) fn do_count_matches(
    conn: &Connection,
    fts_query: &str,
    account: Option<&str>,
    mailbox: Option<&str>,
    exclude_mailboxes: &[String],
) -> Result<u64, String> {
    if fts_query.is_empty() {
        return Ok(0);
    }

    let mut filters = Filters::account_mailbox(account, mailbox);
    filters.exclude_mailboxes(exclude_mailboxes);

    let sql = format!(
        "SELECT COUNT(*) FROM emails e JOIN emails_fts ON emails_fts.rowid = e.rowid {}",
        filters.where_sql("emails_fts MATCH ?")
    );

    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;

    let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(fts_query.to_string())];
    params.extend(filters.params);
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let n: i64 = stmt
        .query_row(param_refs.as_slice(), |row| row.get(0))
        .map_err(|e| e.to_string())?;
    Ok(n as u64)
}

pub(super) fn do_search_attachments(
    conn: &Connection,
    fts_query: &str,
    account: Option<&str>,
    mailbox: Option<&str>,
    limit: u32,
) -> Result<Vec<AttachmentHit>, String> {
    if fts_query.is_empty() {
        return Ok(Vec::new());
    }

    let filters = Filters::account_mailbox(account, mailbox);

    let sql = format!(
        "SELECT {EMAIL_COLUMNS}, a.filename, a.mime_type, a.file_size, a.content_id, bm25(emails_fts) as rank
         FROM emails e
         JOIN emails_fts ON emails_fts.rowid = e.rowid
         JOIN attachments a ON a.email_rowid = e.rowid
         {}
         ORDER BY rank ASC, e.date_received DESC, e.rowid ASC
         LIMIT ?",
        filters.where_sql("emails_fts MATCH ?")
    );

    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;

    let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(fts_query.to_string())];
    params.extend(filters.params);
    params.push(Box::new(limit));
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            let email = row_to_email(row)?;
            let attachment = Attachment {
                email_rowid: email.rowid,
                filename: row.get(12)?,
                mime_type: row.get(13)?,
                file_size: row.get::<_, i64>(14)? as u64,
                content_id: row.get(15)?,
            };
            Ok(AttachmentHit { email, attachment })
        })
        .map_err(|e| e.to_string())?;

    Ok(rows.flatten().collect())
}

pub(super) fn do_list_accounts(conn: &Connection) -> Result<Vec<AccountSummary>, String> {
    let mut stmt = conn
        .prepare("SELECT account, COUNT(*) FROM emails GROUP BY account ORDER BY account")
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| {
            Ok(AccountSummary {
                account: row.get(0)?,
                email_count: row.get::<_, i64>(1)? as u64,
            })
        })
        .map_err(|e| e.to_string())?;
    Ok(rows.flatten().collect())
}

pub(super) fn do_get_emails(
    conn: &Connection,
    account: Option<&str>,
    mailbox: Option<&str>,
    limit: u32,
    offset: u32,
) -> Result<Vec<Email>, String> {
    let filters = Filters::account_mailbox(account, mailbox);
    let sql = format!(
        "SELECT {EMAIL_COLUMNS} FROM emails e {}
         ORDER BY e.date_received DESC, e.rowid ASC
         LIMIT ? OFFSET ?",
        if filters.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", filters.clauses.join(" AND "))
        }
    );

    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let mut params: Vec<Box<dyn ToSql>> = filters.params;
    params.push(Box::new(limit));
    params.push(Box::new(offset));
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let rows = stmt
        .query_map(param_refs.as_slice(), row_to_email)
        .map_err(|e| e.to_string())?;
    Ok(rows.flatten().collect())
}

pub(super) fn do_get_email_attachments(
    conn: &Connection,
    message_id: i64,
    account: Option<&str>,
    mailbox: Option<&str>,
) -> Result<Option<Vec<Attachment>>, String> {
    let mut filters = Filters::account_mailbox(account, mailbox);
    filters.push("e.message_id = ?", message_id);

    let sql = format!(
        "SELECT e.rowid FROM emails e {} LIMIT 1",
        filters.where_sql("1=1")
    );
    let rowid: Option<i64> = conn
        .query_row(&sql, filters.refs().as_slice(), |row| row.get(0))
        .optional()
        .map_err(|e| e.to_string())?;

    let Some(rowid) = rowid else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "SELECT email_rowid, filename, mime_type, file_size, content_id
             FROM attachments WHERE email_rowid = ?",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([rowid], |row| {
            Ok(Attachment {
                email_rowid: row.get(0)?,
                filename: row.get(1)?,
                mime_type: row.get(2)?,
                file_size: row.get::<_, i64>(3)? as u64,
                content_id: row.get(4)?,
            })
        })
        .map_err(|e| e.to_string())?;
    Ok(Some(rows.flatten().collect()))
}

pub(super) fn do_find_email_location(
    conn: &Connection,
    message_id: i64,
    account: Option<&str>,
    mailbox: Option<&str>,
) -> Result<Option<EmailLocation>, String> {
    let mut filters = Filters::new();
    filters.push("message_id = ?", message_id);
    if let Some(a) = account {
        filters.push("account = ?", a.to_string());
    }
    if let Some(m) = mailbox {
        filters.push("mailbox = ?", m.to_string());
    }

    let sql = format!(
        "SELECT account, mailbox FROM emails {} LIMIT 1",
        filters.where_sql("1=1")
    );
    conn.query_row(&sql, filters.refs().as_slice(), |row| {
        Ok(EmailLocation {
            account: row.get(0)?,
            mailbox: row.get(1)?,
        })
    })
    .optional()
    .map_err(|e| e.to_string())
}

pub(super) fn do_find_email_path(
    conn: &Connection,
    message_id: i64,
    account: Option<&str>,
    mailbox: Option<&str>,
) -> Result<Option<String>, String> {
    let mut filters = Filters::account_mailbox(account, mailbox);
    filters.push("message_id = ?", message_id);

    let sql = format!(
        "SELECT emlx_path FROM emails {} LIMIT 1",
        filters.where_sql("1=1")
    );
    conn.query_row(&sql, filters.refs().as_slice(), |row| row.get(0))
        .optional()
        .map_err(|e| e.to_string())
}

pub(super) fn do_has_index(conn: &Connection) -> Result<bool, String> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM emails", [], |row| row.get(0))
        .map_err(|e| e.to_string())?;
    Ok(count > 0)
}

pub(super) fn do_get_indexed_message_ids(
    conn: &Connection,
    account: Option<&str>,
    mailbox: Option<&str>,
) -> Result<HashSet<i64>, String> {
    let filters = Filters::account_mailbox(account, mailbox);
    let sql = format!(
        "SELECT message_id FROM emails e {}",
        if filters.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", filters.clauses.join(" AND "))
        }
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(filters.refs().as_slice(), |row| row.get::<_, i64>(0))
        .map_err(|e| e.to_string())?;
    Ok(rows.flatten().collect())
}

pub(super) fn do_get_stats(conn: &Connection, staleness_hours: f64) -> Result<IndexStats, String> {
    let email_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM emails", [], |row| row.get(0))
        .map_err(|e| e.to_string())?;

    let mailbox_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM (SELECT DISTINCT account, mailbox FROM emails)",
            [],
            |row| row.get(0),
        )
        .map_err(|e| e.to_string())?;

    let last_sync: Option<String> = conn
        .query_row("SELECT MIN(last_sync) FROM sync_state", [], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| e.to_string())?
        .flatten();

    let capped_mailboxes: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sync_state WHERE was_capped = 1",
            [],
            |row| row.get(0),
        )
        .map_err(|e| e.to_string())?;

    let last_sync_dt = last_sync.as_deref().map(parse_date);
    let staleness = match &last_sync_dt {
        None => staleness_hours + 1.0, // never synced counts as stale
        Some(dt) => {
            let now = last_sync_reference_now();
            (now - *dt).num_seconds() as f64 / 3600.0
        }
    };

    Ok(IndexStats {
        email_count: email_count as u64,
        mailbox_count: mailbox_count as u64,
        last_sync: last_sync_dt,
        staleness_hours: staleness,
        capped_mailboxes: capped_mailboxes as u64,
    })
}

/// `get_stats` needs "now" to compute staleness; kept as a seam so tests can
/// verify the comparison logic against a fixed `last_sync` without relying
/// on wall-clock timing.
fn last_sync_reference_now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
