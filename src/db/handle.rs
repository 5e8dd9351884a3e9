use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};

use crate::models::{AccountSummary, Attachment, Email, EmailLocation, IndexStats, SearchResult};

use super::commands::{AttachmentHit, DbCmd, MailboxSyncResult, ParsedMessage};
use super::schema::{run_migrations, SCHEMA};
use super::{search, sync};

/// Clone + Send + Sync async facade over a dedicated database thread. All
/// reads and writes funnel through that single thread, which gives the
/// index a total order over operations without any locking in this layer.
#[derive(Clone)]
pub struct IndexHandle {
    tx: mpsc::UnboundedSender<DbCmd>,
}

impl IndexHandle {
    /// Open (or create) the index database at `db_path` and spawn the
    /// background thread that will own the connection for the rest of the
    /// process's life.
    pub fn open(db_path: &Path) -> Result<Self, String> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create index dir: {e}"))?;
        }

        let conn =
            Connection::open(db_path).map_err(|e| format!("failed to open index db: {e}"))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| format!("failed to init index schema: {e}"))?;
        run_migrations(&conn);

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("lanternmail-index-db".into())
            .spawn(move || run_loop(conn, rx))
            .map_err(|e| format!("failed to spawn index thread: {e}"))?;

        Ok(IndexHandle { tx })
    }

    /// Open an in-memory database, used by tests that want a real
    /// background-thread handle without touching disk.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|e| e.to_string())?;
        conn.execute_batch(SCHEMA).map_err(|e| e.to_string())?;
        run_migrations(&conn);

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("lanternmail-index-db-test".into())
            .spawn(move || run_loop(conn, rx))
            .map_err(|e| e.to_string())?;

        Ok(IndexHandle { tx })
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, String>>) -> DbCmd,
    ) -> Result<T, String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| "index unavailable".to_string())?;
        rx.await.map_err(|_| "index unavailable".to_string())?
    }

    pub async fn search(
        &self,
        fts_query: String,
        account: Option<String>,
        mailbox: Option<String>,
        exclude_mailboxes: Vec<String>,
        limit: u32,
    ) -> Result<Vec<SearchResult>, String> {
        self.call(|reply| DbCmd::Search {
            fts_query,
            account,
            mailbox,
            exclude_mailboxes,
            limit,
            reply,
        })
        .await
    }

    pub async fn count_matches(
        &self,
        fts_query: String,
        account: Option<String>,
        mailbox: Option<String>,
        exclude_mailboxes: Vec<String>,
    ) -> Result<u64, String> {
        self.call(|reply| DbCmd::CountMatches {
            fts_query,
            account,
            mailbox,
            exclude_mailboxes,
            reply,
        })
        .await
    }

    pub async fn search_attachments(
        &self,
        fts_query: String,
        account: Option<String>,
        mailbox: Option<String>,
        limit: u32,
    ) -> Result<Vec<AttachmentHit>, String> {
        self.call(|reply| DbCmd::SearchAttachments {
            fts_query,
            account,
            mailbox,
            limit,
            reply,
        })
        .await
    }

    pub async fn list_accounts(&self) -> Result<Vec<AccountSummary>, String> {
        self.call(|reply| DbCmd::ListAccounts { reply }).await
    }

    pub async fn get_emails(
        &self,
        account: Option<String>,
        mailbox: Option<String>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Email>, String> {
        self.call(|reply| DbCmd::GetEmails {
            account,
            mailbox,
            limit,
            offset,
            reply,
        })
        .await
    }

    pub async fn get_email_attachments(
        &self,
        message_id: i64,
        account: Option<String>,
        mailbox: Option<String>,
    ) -> Result<Option<Vec<Attachment>>, String> {
        self.call(|reply| DbCmd::GetEmailAttachments {
            message_id,
            account,
            mailbox,
            reply,
        })
        .await
    }

    pub async fn find_email_location(
        &self,
        message_id: i64,
        account: Option<String>,
        mailbox: Option<String>,
    ) -> Result<Option<EmailLocation>, String> {
        self.call(|reply| DbCmd::FindEmailLocation {
            message_id,
            account,
            mailbox,
            reply,
        })
        .await
    }

    pub async fn find_email_path(
        &self,
        message_id: i64,
        account: Option<String>,
        mailbox: Option<String>,
    ) -> Result<Option<String>, String> {
        self.call(|reply| DbCmd::FindEmailPath {
            message_id,
            account,
            mailbox,
            reply,
        })
        .await
    }

    pub async fn get_stats(&self, staleness_hours: f64) -> Result<IndexStats, String> {
        self.call(|reply| DbCmd::GetStats {
            staleness_hours,
            reply,
        })
        .await
    }

    pub async fn has_index(&self) -> Result<bool, String> {
        self.call(|reply| DbCmd::HasIndex { reply }).await
    }

    pub async fn get_indexed_message_ids(
        &self,
        account: Option<String>,
        mailbox: Option<String>,
    ) -> Result<HashSet<i64>, String> {
        self.call(|reply| DbCmd::GetIndexedMessageIds {
            account,
            mailbox,
            reply,
        })
        .await
    }

    pub async fn sync_mailbox(
        &self,
        account: String,
        mailbox: String,
        messages: Vec<ParsedMessage>,
        max_emails: u32,
    ) -> Result<MailboxSyncResult, String> {
        self.call(|reply| DbCmd::SyncMailbox {
            account,
            mailbox,
            messages,
            max_emails,
            reply,
        })
        .await
    }
}

pub(crate) fn default_db_path(base: &Path) -> PathBuf {
    base.join("index.db")
}

fn run_loop(mut conn: Connection, mut rx: mpsc::UnboundedReceiver<DbCmd>) {
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            DbCmd::Search {
                fts_query,
                account,
                mailbox,
                exclude_mailboxes,
                limit,
                reply,
            } => {
                let _ = reply.send(search::do_search(
                    &conn,
                    &fts_query,
                    account.as_deref(),
                    mailbox.as_deref(),
                    &exclude_mailboxes,
                    limit,
                ));
            }
            DbCmd::CountMatches {
                fts_query,
                account,
                mailbox,
                exclude_mailboxes,
                reply,
            } => {
                let _ = reply.send(search::do_count_matches(
                    &conn,
                    &fts_query,
                    account.as_deref(),
                    mailbox.as_deref(),
                    &exclude_mailboxes,
                ));
            }
            DbCmd::SearchAttachments {
                fts_query,
                account,
                mailbox,
                limit,
                reply,
            } => {
                let _ = reply.send(search::do_search_attachments(
                    &conn,
                    &fts_query,
                    account.as_deref(),
                    mailbox.as_deref(),
                    limit,
                ));
            }
            DbCmd::ListAccounts { reply } => {
                let _ = reply.send(search::do_list_accounts(&conn));
            }
            DbCmd::GetEmails {
                account,
                mailbox,
                limit,
                offset,
                reply,
            } => {
                let _ = reply.send(search::do_get_emails(
                    &conn,
                    account.as_deref(),
                    mailbox.as_deref(),
                    limit,
                    offset,
                ));
            }
            DbCmd::GetEmailAttachments {
                message_id,
                account,
                mailbox,
                reply,
            } => {
                let _ = reply.send(search::do_get_email_attachments(
                    &conn,
                    message_id,
                    account.as_deref(),
                    mailbox.as_deref(),
                ));
            }
            DbCmd::FindEmailLocation {
                message_id,
                account,
                mailbox,
                reply,
            } => {
                let _ = reply.send(search::do_find_email_location(
                    &conn,
                    message_id,
                    account.as_deref(),
                    mailbox.as_deref(),
                ));
            }
            DbCmd::FindEmailPath {
                message_id,
                account,
                mailbox,
                reply,
            } => {
                let _ = reply.send(search::do_find_email_path(
                    &conn,
                    message_id,
                    account.as_deref(),
                    mailbox.as_deref(),
                ));
            }
            DbCmd::GetStats {
                staleness_hours,
                reply,
            } => {
                let _ = reply.send(search::do_get_stats(&conn, staleness_hours));
            }
            DbCmd::HasIndex { reply } => {
                let _ = reply.send(search::do_has_index(&conn));
            }
            DbCmd::GetIndexedMessageIds {
                account,
                mailbox,
                reply,
            } => {
                let _ = reply.send(search::do_get_indexed_message_ids(
                    &conn,
                    account.as_deref(),
                    mailbox.as_deref(),
                ));
            }
            DbCmd::SyncMailbox {
                account,
                mailbox,
                messages,
                max_emails,
                reply,
            } => {
                let outcome = match sync::do_sync_mailbox(&mut conn, &account, &mailbox, &messages, max_emails) {
                    Ok(result) => Ok(result),
                    Err(e) => {
                        log::warn!("sync of {account}/{mailbox} failed, retrying once: {e}");
                        sync::do_sync_mailbox(&mut conn, &account, &mailbox, &messages, max_emails)
                    }
                };
                let _ = reply.send(outcome);
            }
        }
    }
    log::debug!("index db thread exiting");
}
