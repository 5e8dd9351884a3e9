use rusqlite::Connection;

/// Schema DDL run on open.
pub(super) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS emails (
    message_id INTEGER NOT NULL,
    account TEXT NOT NULL,
    mailbox TEXT NOT NULL,
    subject TEXT NOT NULL DEFAULT '',
    sender TEXT NOT NULL DEFAULT '',
    recipients TEXT NOT NULL DEFAULT '',
    body TEXT NOT NULL DEFAULT '',
    date_received TEXT NOT NULL,
    snippet TEXT NOT NULL DEFAULT '',
    emlx_path TEXT NOT NULL,
    attachment_count INTEGER NOT NULL DEFAULT 0,
    flags INTEGER NOT NULL DEFAULT 0,
    UNIQUE (message_id, account, mailbox)
);

CREATE INDEX IF NOT EXISTS idx_emails_account_mailbox
    ON emails(account, mailbox, date_received DESC);

CREATE TABLE IF NOT EXISTS attachments (
    email_rowid INTEGER NOT NULL,
    filename TEXT NOT NULL DEFAULT 'unnamed',
    mime_type TEXT NOT NULL DEFAULT 'application/octet-stream',
    file_size INTEGER NOT NULL DEFAULT 0,
    content_id TEXT,
    FOREIGN KEY (email_rowid) REFERENCES emails(rowid) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_attachments_email
    ON attachments(email_rowid);

CREATE TABLE IF NOT EXISTS sync_state (
    account TEXT NOT NULL,
    mailbox TEXT NOT NULL,
    last_sync TEXT NOT NULL,
    email_count_at_sync INTEGER NOT NULL DEFAULT 0,
    was_capped INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (account, mailbox)
);
";

/// Run forward-only migrations. Each ALTER is idempotent (ignores "duplicate
/// column" errors), same pattern regardless of how the schema evolves.
pub(super) fn run_migrations(conn: &Connection) {
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_emails_message_id ON emails(message_id)",
        "CREATE INDEX IF NOT EXISTS idx_sync_state_last_sync ON sync_state(last_sync)",
    ];
    for sql in &indexes {
        if let Err(e) = conn.execute(sql, []) {
            log::warn!("index creation failed: {e}");
        }
    }

    // Drop stale FTS objects from an earlier schema revision before rebuilding.
    for stale in &[
        "DROP TRIGGER IF EXISTS emails_fts_ai",
        "DROP TRIGGER IF EXISTS emails_fts_ad",
        "DROP TRIGGER IF EXISTS emails_fts_au",
    ] {
        let _ = conn.execute_batch(stale);
    }

    let fts_ddl = [
        "CREATE VIRTUAL TABLE IF NOT EXISTS emails_fts USING fts5(
            subject,
            sender,
            recipients,
            body,
            content='emails',
            content_rowid='rowid'
        )",
        "CREATE TRIGGER IF NOT EXISTS emails_fts_ai AFTER INSERT ON emails BEGIN
          INSERT INTO emails_fts(rowid, subject, sender, recipients, body)
          VALUES (new.rowid, new.subject, new.sender, new.recipients, new.body);
        END",
        "CREATE TRIGGER IF NOT EXISTS emails_fts_ad AFTER DELETE ON emails BEGIN
          INSERT INTO emails_fts(emails_fts, rowid, subject, sender, recipients, body)
          VALUES('delete', old.rowid, old.subject, old.sender, old.recipients, old.body);
        END",
        "CREATE TRIGGER IF NOT EXISTS emails_fts_au AFTER UPDATE ON emails BEGIN
          INSERT INTO emails_fts(emails_fts, rowid, subject, sender, recipients, body)
          VALUES('delete', old.rowid, old.subject, old.sender, old.recipients, old.body);
          INSERT INTO emails_fts(rowid, subject, sender, recipients, body)
          VALUES (new.rowid, new.subject, new.sender, new.recipients, new.body);
        END",
    ];
    for ddl in &fts_ddl {
        if let Err(e) = conn.execute_batch(ddl) {
            log::warn!(
                "FTS5 migration failed ({}): {}",
                ddl.chars().take(60).collect::<String>(),
                e
            );
        }
    }

    // Rebuild from existing content — idempotent, fast if already current.
    if let Err(e) = conn.execute("INSERT INTO emails_fts(emails_fts) VALUES('rebuild')", []) {
        log::warn!("FTS5 rebuild failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::{run_migrations, SCHEMA};

    fn open_fresh() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(SCHEMA).expect("create schema");
        run_migrations(&conn);
        conn
    }

    #[test]
    fn schema_creates_fts_table_and_triggers() {
        let conn = open_fresh();
        conn.execute(
            "INSERT INTO emails (message_id, account, mailbox, subject, sender, recipients, body, date_received, snippet, emlx_path)
             VALUES (1, 'acct', 'INBOX', 'hello needle world', 'a@example.com', 'b@example.com', 'body text', '2026-01-01T00:00:00Z', 'snip', '/tmp/1.emlx')",
            [],
        )
        .expect("insert email");

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM emails_fts WHERE emails_fts MATCH 'needle'",
                [],
                |row| row.get(0),
            )
            .expect("query fts");
        assert_eq!(hits, 1);
    }

    #[test]
    fn delete_trigger_removes_fts_row() {
        let conn = open_fresh();
        conn.execute(
            "INSERT INTO emails (message_id, account, mailbox, subject, sender, recipients, body, date_received, snippet, emlx_path)
             VALUES (1, 'acct', 'INBOX', 'gone soon', 'a@example.com', 'b@example.com', 'body', '2026-01-01T00:00:00Z', 'snip', '/tmp/1.emlx')",
            [],
        )
        .expect("insert email");
        conn.execute("DELETE FROM emails WHERE message_id = 1", [])
            .expect("delete email");

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM emails_fts WHERE emails_fts MATCH 'gone'",
                [],
                |row| row.get(0),
            )
            .expect("query fts");
        assert_eq!(hits, 0);
    }

    #[test]
    fn rebuild_is_idempotent_on_reopen() {
        let conn = open_fresh();
        conn.execute(
            "INSERT INTO emails (message_id, account, mailbox, subject, sender, recipients, body, date_received, snippet, emlx_path)
             VALUES (1, 'acct', 'INBOX', 'preexisting', 'a@example.com', 'b@example.com', 'body', '2026-01-01T00:00:00Z', 'snip', '/tmp/1.emlx')",
            [],
        )
        .expect("insert email");

        run_migrations(&conn);

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM emails_fts WHERE emails_fts MATCH 'preexisting'",
                [],
                |row| row.get(0),
            )
            .expect("query fts");
        assert_eq!(hits, 1);
    }
}
