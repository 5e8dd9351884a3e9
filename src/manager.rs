use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::IndexConfig;
use crate::db::{IndexHandle, ParsedMessage};
use crate::disk::{self, parser, DefaultMailRootResolver, MailRootResolver};
use crate::error::{IndexError, Result};
use crate::models::{
    AccountSummary, Attachment, Email, EmailLocation, IndexStats, MatchedColumns, SearchResult,
};
use crate::query;
use crate::watcher::{boxed_sync_fn, IndexWatcher};

static INSTANCE: Mutex<Option<Arc<IndexManager>>> = Mutex::new(None);

/// Single process-wide entry point over the index: the database handle, the
/// disk scanner, and the filesystem watcher, wired together behind one
/// surface. Search and read operations degrade to empty results rather than
/// raising; only `close()` can return an error.
pub struct IndexManager {
    handle: IndexHandle,
    config: IndexConfig,
    resolver: Arc<dyn MailRootResolver>,
    watcher: Mutex<IndexWatcher>,
    closing: Arc<AtomicBool>,
}

impl IndexManager {
    fn new(config: IndexConfig, resolver: Arc<dyn MailRootResolver>) -> Result<Self> {
        let handle = IndexHandle::open(&config.db_path).map_err(|_| IndexError::NotOpen)?;
        Ok(IndexManager {
            handle,
            config,
            resolver,
            watcher: Mutex::new(IndexWatcher::new()),
            closing: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Return the process-wide singleton, constructing it on first use from
    /// `IndexConfig::from_env()` and the platform's default mail root.
    pub fn get_instance() -> Arc<IndexManager> {
        let mut slot = INSTANCE.lock().unwrap();
        if let Some(existing) = slot.as_ref() {
            return existing.clone();
        }
        let config = IndexConfig::from_env();
        let resolver: Arc<dyn MailRootResolver> = Arc::new(DefaultMailRootResolver);
        let manager = Arc::new(
            IndexManager::new(config, resolver).expect("failed to initialize index manager"),
        );
        *slot = Some(manager.clone());
        manager
    }

    /// Replace the singleton with a freshly constructed instance, used by
    /// tests that need an isolated database and a fixed mail root.
    #[cfg(test)]
    pub fn reset_for_test(config: IndexConfig, resolver: Arc<dyn MailRootResolver>) -> Arc<IndexManager> {
        let manager = Arc::new(IndexManager::new(config, resolver).expect("test index init"));
        *INSTANCE.lock().unwrap() = Some(manager.clone());
        manager
    }

    fn mail_root(&self) -> Option<std::path::PathBuf> {
        self.config.mail_root.clone().or_else(|| self.resolver.resolve())
    }

    /// Compile `query`, search, and attach post-hoc column attribution. Falls
    /// back to the escape-all compiled form if the FTS engine rejects the
    /// primary form, and to an empty result if that also fails.
    pub async fn search(
        &self,
        raw_query: &str,
        account: Option<String>,
        mailbox: Option<String>,
        exclude_mailboxes: Vec<String>,
        limit: u32,
    ) -> (Vec<SearchResult>, Vec<MatchedColumns>) {
        let compiled = query::sanitize_fts_query(raw_query);
        let results = match self
            .handle
            .search(
                compiled.clone(),
                account.clone(),
                mailbox.clone(),
                exclude_mailboxes.clone(),
                limit,
            )
            .await
        {
            Ok(results) => results,
            Err(e) => {
                log::warn!("primary search query rejected, retrying escape-all: {e}");
                let escaped = query::escape_all_special(raw_query);
                match self
                    .handle
                    .search(escaped, account, mailbox, exclude_mailboxes, limit)
                    .await
                {
                    Ok(results) => results,
                    Err(e) => {
                        log::warn!("escape-all search query also rejected: {e}");
                        Vec::new()
                    }
                }
            }
        };

        let matched = results
            .iter()
            .map(|r| {
                query::detect_matched_columns(
                    raw_query,
                    &r.email.subject,
                    &r.email.sender,
                    &r.email.recipients,
                )
            })
            .collect();

        (results, matched)
    }

    pub async fn count_matches(
        &self,
        raw_query: &str,
        account: Option<String>,
        mailbox: Option<String>,
        exclude_mailboxes: Vec<String>,
    ) -> u64 {
        let compiled = query::sanitize_fts_query(raw_query);
        match self
            .handle
            .count_matches(compiled, account.clone(), mailbox.clone(), exclude_mailboxes.clone())
            .await
        {
            Ok(n) => n,
            Err(e) => {
                log::warn!("primary count_matches query rejected, retrying escape-all: {e}");
                let escaped = query::escape_all_special(raw_query);
                self.handle
                    .count_matches(escaped, account, mailbox, exclude_mailboxes)
                    .await
                    .unwrap_or_else(|e| {
                        log::warn!("escape-all count_matches also rejected: {e}");
                        0
                    })
            }
        }
    }

    pub async fn search_attachments(
        &self,
        raw_query: &str,
        account: Option<String>,
        mailbox: Option<String>,
        limit: u32,
    ) -> Vec<crate::db::AttachmentHit> {
        let compiled = query::sanitize_fts_query(raw_query);
        match self
            .handle
            .search_attachments(compiled, account.clone(), mailbox.clone(), limit)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                log::warn!("primary search_attachments query rejected, retrying escape-all: {e}");
                let escaped = query::escape_all_special(raw_query);
                self.handle
                    .search_attachments(escaped, account, mailbox, limit)
                    .await
                    .unwrap_or_else(|e| {
                        log::warn!("escape-all search_attachments also rejected: {e}");
                        Vec::new()
                    })
            }
        }
    }

    pub async fn list_accounts(&self) -> Vec<AccountSummary> {
        self.handle.list_accounts().await.unwrap_or_default()
    }

    pub async fn get_emails(
        &self,
        account: Option<String>,
        mailbox: Option<String>,
        limit: u32,
        offset: u32,
    ) -> Vec<Email> {
        self.handle
            .get_emails(account, mailbox, limit, offset)
            .await
            .unwrap_or_default()
    }

    pub async fn get_email_attachments(
        &self,
        message_id: i64,
        account: Option<String>,
        mailbox: Option<String>,
    ) -> Option<Vec<Attachment>> {
        self.handle
            .get_email_attachments(message_id, account, mailbox)
            .await
            .unwrap_or_default()
    }

    pub async fn find_email_location(
        &self,
        message_id: i64,
        account: Option<String>,
        mailbox: Option<String>,
    ) -> Option<EmailLocation> {
        self.handle
            .find_email_location(message_id, account, mailbox)
            .await
            .unwrap_or_default()
    }

    pub async fn find_email_path(
        &self,
        message_id: i64,
        account: Option<String>,
        mailbox: Option<String>,
    ) -> Option<String> {
        self.handle
            .find_email_path(message_id, account, mailbox)
            .await
            .unwrap_or_default()
    }

    pub async fn get_stats(&self) -> IndexStats {
        self.handle
            .get_stats(self.config.staleness_hours)
            .await
            .unwrap_or(IndexStats {
                email_count: 0,
                mailbox_count: 0,
                last_sync: None,
                staleness_hours: self.config.staleness_hours + 1.0,
                capped_mailboxes: 0,
            })
    }

    pub async fn has_index(&self) -> bool {
        self.handle.has_index().await.unwrap_or(false)
    }

    /// True when there is no sync history at all, or the oldest sync is
    /// older than the configured staleness threshold.
    pub async fn is_stale(&self) -> bool {
        let stats = self.get_stats().await;
        stats.last_sync.is_none() || stats.staleness_hours > self.config.staleness_hours
    }

    /// Reconcile the index against the on-disk mail store, mailbox by
    /// mailbox, and return the total number of rows mutated (added,
    /// refreshed, or removed). Returns 0 without raising if the mail root is
    /// missing or unreadable.
    pub async fn sync_updates(&self) -> u64 {
        let mail_root = match self.mail_root() {
            Some(root) => root,
            None => {
                log::warn!("no mail root configured or resolvable; skipping sync");
                return 0;
            }
        };

        let mailboxes = disk::scan_mail_root(&mail_root);
        let mut total_mutations = 0u64;

        for mailbox_files in mailboxes {
            if self.closing.load(Ordering::SeqCst) {
                log::info!("close() requested, stopping sync before the next mailbox");
                break;
            }

            let messages: Vec<ParsedMessage> = mailbox_files
                .message_paths
                .iter()
                .filter_map(|path| parser::parse_emlx(path, self.config.snippet_len))
                .collect();

            match self
                .handle
                .sync_mailbox(
                    mailbox_files.account.clone(),
                    mailbox_files.mailbox.clone(),
                    messages,
                    self.config.index_max_emails,
                )
                .await
            {
                Ok(result) => {
                    total_mutations +=
                        (result.added + result.refreshed + result.removed) as u64;
                }
                Err(e) => {
                    log::warn!(
                        "sync failed for {}/{}: {e}",
                        mailbox_files.account,
                        mailbox_files.mailbox
                    );
                }
            }
        }

        total_mutations
    }

    pub async fn get_indexed_message_ids(
        &self,
        account: Option<String>,
        mailbox: Option<String>,
    ) -> HashSet<i64> {
        self.handle
            .get_indexed_message_ids(account, mailbox)
            .await
            .unwrap_or_default()
    }

    /// Start the filesystem watcher, debounced by the configured interval,
    /// triggering a `sync_updates()` on change. A no-op if already running
    /// or if the mail root cannot be resolved.
    pub fn start_watcher(self: &Arc<Self>) -> Result<()> {
        let mail_root = match self.mail_root() {
            Some(root) => root,
            None => return Err(IndexError::WatcherUnavailable("no mail root".to_string())),
        };

        let debounce = Duration::from_millis(self.config.watcher_debounce_ms);
        let this = self.clone();
        let on_change = boxed_sync_fn(move || {
            let this = this.clone();
            async move {
                let mutated = this.sync_updates().await;
                log::info!("watcher-triggered sync mutated {mutated} rows");
            }
        });

        self.watcher.lock().unwrap().start(&mail_root, debounce, on_change)
    }

    pub fn stop_watcher(&self) {
        self.watcher.lock().unwrap().stop();
    }

    pub fn watcher_running(&self) -> bool {
        self.watcher.lock().unwrap().is_running()
    }

    /// Stop the watcher and signal any in-progress `sync_updates()` to stop
    /// starting new mailboxes. The mailbox currently mid-transaction still
    /// runs to completion — only the *next* mailbox in the loop is skipped.
    /// Idempotent: closing an already-closed manager is a no-op.
    pub fn close(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        self.stop_watcher();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::FixedMailRoot;
    use std::io::Write;

    fn test_manager(mail_root: &std::path::Path) -> Arc<IndexManager> {
        let config = IndexConfig {
            db_path: mail_root.join("index.db"),
            mail_root: Some(mail_root.to_path_buf()),
            index_max_emails: 5000,
            staleness_hours: 24.0,
            watcher_debounce_ms: 50,
            snippet_len: 200,
        };
        IndexManager::reset_for_test(config, Arc::new(FixedMailRoot(mail_root.to_path_buf())))
    }

    fn write_message(dir: &std::path::Path, account: &str, mailbox: &str, id: &str, rfc822: &str) {
        let messages = dir.join(account).join(format!("{mailbox}.mbox")).join("Messages");
        std::fs::create_dir_all(&messages).unwrap();
        let mut f = std::fs::File::create(messages.join(format!("{id}.emlx"))).unwrap();
        write!(f, "{}\n{}", rfc822.len(), rfc822).unwrap();
    }

    #[tokio::test]
    async fn closed_manager_stops_sync_before_any_mailbox() {
        let tmp = tempfile::tempdir().unwrap();
        write_message(
            tmp.path(),
            "acct1",
            "INBOX",
            "1",
            "From: a@example.com\r\nSubject: Quarterly Report\r\n\r\nProjections look strong\r\n",
        );

        let manager = test_manager(tmp.path());
        manager.close().unwrap();
        let mutated = manager.sync_updates().await;
        assert_eq!(mutated, 0);
    }

    #[tokio::test]
    async fn sync_then_search_finds_synced_message() {
        let tmp = tempfile::tempdir().unwrap();
        write_message(
            tmp.path(),
            "acct1",
            "INBOX",
            "1",
            "From: a@example.com\r\nSubject: Quarterly Report\r\n\r\nProjections look strong\r\n",
        );

        let manager = test_manager(tmp.path());
        let mutated = manager.sync_updates().await;
        assert_eq!(mutated, 1);

        let (results, matched) = manager
            .search("quarterly", None, None, Vec::new(), 20)
            .await;
        assert_eq!(results.len(), 1);
        assert!(matched[0].subject);
    }

    #[tokio::test]
    async fn sync_updates_with_unresolvable_root_returns_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let config = IndexConfig {
            db_path: tmp.path().join("index.db"),
            mail_root: None,
            index_max_emails: 5000,
            staleness_hours: 24.0,
            watcher_debounce_ms: 50,
            snippet_len: 200,
        };
        struct NoRoot;
        impl MailRootResolver for NoRoot {
            fn resolve(&self) -> Option<std::path::PathBuf> {
                None
            }
        }
        let manager = IndexManager::reset_for_test(config, Arc::new(NoRoot));
        assert_eq!(manager.sync_updates().await, 0);
    }

    #[tokio::test]
    async fn is_stale_with_no_sync_history_is_true() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = test_manager(tmp.path());
        assert!(manager.is_stale().await);
    }

    #[tokio::test]
    async fn watcher_start_stop_toggles_running_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = test_manager(tmp.path());
        manager.start_watcher().unwrap();
        assert!(manager.watcher_running());
        manager.stop_watcher();
        assert!(!manager.watcher_running());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = test_manager(tmp.path());
        manager.close().unwrap();
        manager.close().unwrap();
    }
}
