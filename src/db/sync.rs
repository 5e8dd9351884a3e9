use std::collections::HashSet;

use rusqlite::{Connection, OptionalExtension, Transaction};

use super::commands::{MailboxSyncResult, ParsedMessage};

/// Whether the indexed row for `m.message_id` differs from `m` in identity
/// or content. Compared field-by-field against what's already on disk in
/// the index (not a stored hash) since the row itself is the source of
/// truth; returns `true` (treat as changed) if the row has vanished out
/// from under the comparison, which just means the caller's `is_existing`
/// check raced with a concurrent delete and should fall through to a write.
fn row_changed(
    tx: &Transaction,
    account: &str,
    mailbox: &str,
    m: &ParsedMessage,
) -> Result<bool, String> {
    let current: Option<(String, String, String, String, String, String, String, i64, i64)> = tx
        .query_row(
            "SELECT subject, sender, recipients, body, date_received, snippet, emlx_path,
                    attachment_count, flags
             FROM emails WHERE message_id = ?1 AND account = ?2 AND mailbox = ?3",
            rusqlite::params![m.message_id, account, mailbox],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            },
        )
        .optional()
        .map_err(|e| e.to_string())?;

    let Some((subject, sender, recipients, body, date_received, snippet, emlx_path, attachment_count, flags)) =
        current
    else {
        return Ok(true);
    };

    let unchanged = subject == m.subject
        && sender == m.sender
        && recipients == m.recipients
        && body == m.body
        && date_received == m.date_received.to_rfc3339()
        && snippet == m.snippet
        && emlx_path == m.emlx_path
        && attachment_count == m.attachments.len() as i64
        && flags == m.flags;

    Ok(!unchanged)
}

/// Reconcile one (account, mailbox)'s on-disk snapshot against the index.
/// Runs as a single transaction: the whole mailbox commits or the whole
/// mailbox rolls back, so a failure here never touches other mailboxes.
///
/// Same message_id inserted twice under different (account, mailbox) pairs
/// produces two independent rows — uniqueness is scoped to the full
/// (message_id, account, mailbox) triple, intentionally.
pub(super) fn do_sync_mailbox(
    conn: &mut Connection,
    account: &str,
    mailbox: &str,
    messages: &[ParsedMessage],
    max_emails: u32,
) -> Result<MailboxSyncResult, String> {
    let tx = conn
        .transaction()
        .map_err(|e| format!("sync tx open error: {e}"))?;

    let existing_ids: HashSet<i64> = {
        let mut stmt = tx
            .prepare("SELECT message_id FROM emails WHERE account = ? AND mailbox = ?")
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(rusqlite::params![account, mailbox], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(|e| e.to_string())?;
        rows.flatten().collect()
    };

    let on_disk_ids: HashSet<i64> = messages.iter().map(|m| m.message_id).collect();

    let mut added = 0u32;
    let mut refreshed = 0u32;

    {
        let mut upsert = tx
            .prepare(
                "INSERT INTO emails
                    (message_id, account, mailbox, subject, sender, recipients, body,
                     date_received, snippet, emlx_path, attachment_count, flags)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(message_id, account, mailbox) DO UPDATE SET
                    subject = excluded.subject,
                    sender = excluded.sender,
                    recipients = excluded.recipients,
                    body = excluded.body,
                    date_received = excluded.date_received,
                    snippet = excluded.snippet,
                    emlx_path = excluded.emlx_path,
                    attachment_count = excluded.attachment_count,
                    flags = excluded.flags",
            )
            .map_err(|e| e.to_string())?;

        for m in messages {
            let is_existing = existing_ids.contains(&m.message_id);
            if is_existing && !row_changed(&tx, account, mailbox, m)? {
                // Identity and content match the indexed row exactly — skip
                // the write entirely so an unchanged second sync mutates
                // nothing.
                continue;
            }

            upsert
                .execute(rusqlite::params![
                    m.message_id,
                    account,
                    mailbox,
                    m.subject,
                    m.sender,
                    m.recipients,
                    m.body,
                    m.date_received.to_rfc3339(),
                    m.snippet,
                    m.emlx_path,
                    m.attachments.len() as i64,
                    m.flags,
                ])
                .map_err(|e| e.to_string())?;

            if is_existing {
                refreshed += 1;
            } else {
                added += 1;
            }

            let rowid: i64 = tx
                .query_row(
                    "SELECT rowid FROM emails WHERE message_id = ?1 AND account = ?2 AND mailbox = ?3",
                    rusqlite::params![m.message_id, account, mailbox],
                    |row| row.get(0),
                )
                .map_err(|e| e.to_string())?;

            tx.execute("DELETE FROM attachments WHERE email_rowid = ?1", [rowid])
                .map_err(|e| e.to_string())?;
            for att in &m.attachments {
                tx.execute(
                    "INSERT INTO attachments (email_rowid, filename, mime_type, file_size, content_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        rowid,
                        att.filename,
                        att.mime_type,
                        att.file_size as i64,
                        att.content_id,
                    ],
                )
                .map_err(|e| e.to_string())?;
            }
        }
    }

    let removed_ids: Vec<i64> = existing_ids.difference(&on_disk_ids).copied().collect();
    let mut removed = 0u32;
    if !removed_ids.is_empty() {
        let placeholders: Vec<String> = removed_ids.iter().map(|_| "?".to_string()).collect();
        let sql = format!(
            "DELETE FROM emails WHERE account = ? AND mailbox = ? AND message_id IN ({})",
            placeholders.join(",")
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(account.to_string()), Box::new(mailbox.to_string())];
        for id in &removed_ids {
            params.push(Box::new(*id));
        }
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        removed = tx
            .execute(&sql, param_refs.as_slice())
            .map_err(|e| e.to_string())? as u32;
    }

    let count_before_cap: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM emails WHERE account = ?1 AND mailbox = ?2",
            rusqlite::params![account, mailbox],
            |row| row.get(0),
        )
        .map_err(|e| e.to_string())?;

    let was_capped = count_before_cap > max_emails as i64;
    let mut final_count = count_before_cap;
    if was_capped {
        let to_evict = count_before_cap - max_emails as i64;
        tx.execute(
            "DELETE FROM emails WHERE rowid IN (
                SELECT rowid FROM emails WHERE account = ?1 AND mailbox = ?2
                ORDER BY date_received ASC, rowid ASC LIMIT ?3
            )",
            rusqlite::params![account, mailbox, to_evict],
        )
        .map_err(|e| e.to_string())?;
        final_count = max_emails as i64;
    }

    tx.execute(
        "INSERT INTO sync_state (account, mailbox, last_sync, email_count_at_sync, was_capped)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(account, mailbox) DO UPDATE SET
            last_sync = excluded.last_sync,
            email_count_at_sync = excluded.email_count_at_sync,
            was_capped = excluded.was_capped",
        rusqlite::params![
            account,
            mailbox,
            chrono::Utc::now().to_rfc3339(),
            final_count,
            was_capped,
        ],
    )
    .map_err(|e| e.to_string())?;

    tx.commit().map_err(|e| format!("sync tx commit error: {e}"))?;

    Ok(MailboxSyncResult {
        added,
        refreshed,
        removed,
        was_capped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{run_migrations, SCHEMA};
    use chrono::TimeZone;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        run_migrations(&conn);
        conn
    }

    fn msg(id: i64, day: u32) -> ParsedMessage {
        ParsedMessage {
            message_id: id,
            subject: format!("subject {id}"),
            sender: "a@example.com".into(),
            recipients: "b@example.com".into(),
            body: format!("body {id}"),
            snippet: format!("body {id}"),
            date_received: chrono::Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            emlx_path: format!("/m/{id}.emlx"),
            flags: 0,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn first_sync_adds_all_rows() {
        let mut conn = open();
        let messages = vec![msg(1, 1), msg(2, 2)];
        let result = do_sync_mailbox(&mut conn, "acct", "INBOX", &messages, 5000).unwrap();
        assert_eq!(result.added, 2);
        assert_eq!(result.refreshed, 0);
        assert_eq!(result.removed, 0);
        assert!(!result.was_capped);
    }

    #[test]
    fn second_sync_with_no_changes_mutates_nothing_new() {
        let mut conn = open();
        let messages = vec![msg(1, 1)];
        do_sync_mailbox(&mut conn, "acct", "INBOX", &messages, 5000).unwrap();
        let result = do_sync_mailbox(&mut conn, "acct", "INBOX", &messages, 5000).unwrap();
        assert_eq!(result.added, 0);
        assert_eq!(result.removed, 0);
        assert_eq!(result.refreshed, 0);
    }

    #[test]
    fn changed_content_is_refreshed() {
        let mut conn = open();
        do_sync_mailbox(&mut conn, "acct", "INBOX", &[msg(1, 1)], 5000).unwrap();
        let mut changed = msg(1, 1);
        changed.subject = "updated subject".into();
        let result = do_sync_mailbox(&mut conn, "acct", "INBOX", &[changed], 5000).unwrap();
        assert_eq!(result.added, 0);
        assert_eq!(result.refreshed, 1);
    }

    #[test]
    fn removed_on_disk_message_is_deleted_from_index() {
        let mut conn = open();
        do_sync_mailbox(&mut conn, "acct", "INBOX", &[msg(1, 1), msg(2, 2)], 5000).unwrap();
        let result = do_sync_mailbox(&mut conn, "acct", "INBOX", &[msg(1, 1)], 5000).unwrap();
        assert_eq!(result.removed, 1);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM emails", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn cap_evicts_oldest_and_sets_was_capped() {
        let mut conn = open();
        let messages = vec![msg(1, 1), msg(2, 2), msg(3, 3), msg(4, 4)];
        let result = do_sync_mailbox(&mut conn, "acct", "INBOX", &messages, 3).unwrap();
        assert!(result.was_capped);
        let remaining: Vec<i64> = {
            let mut stmt = conn
                .prepare("SELECT message_id FROM emails ORDER BY message_id")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .flatten()
                .collect()
        };
        assert_eq!(remaining, vec![2, 3, 4]);
    }

    #[test]
    fn exactly_at_cap_is_not_marked_capped() {
        let mut conn = open();
        let messages = vec![msg(1, 1), msg(2, 2), msg(3, 3)];
        let result = do_sync_mailbox(&mut conn, "acct", "INBOX", &messages, 3).unwrap();
        assert!(!result.was_capped);
    }

    #[test]
    fn same_message_id_in_two_mailboxes_are_independent_rows() {
        let mut conn = open();
        do_sync_mailbox(&mut conn, "acct", "INBOX", &[msg(1001, 1)], 5000).unwrap();
        do_sync_mailbox(&mut conn, "acct", "Archive", &[msg(1001, 1)], 5000).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM emails WHERE message_id = 1001",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }
}
