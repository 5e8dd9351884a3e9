pub mod parser;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Resolves the root of the on-disk mail store. Injected into the index
/// manager rather than hard-coded, so tests can point it at a temp
/// directory and production code can probe the platform default.
pub trait MailRootResolver: Send + Sync {
    fn resolve(&self) -> Option<PathBuf>;
}

/// Resolver that always returns a fixed path — used for configuration
/// overrides and in tests.
pub struct FixedMailRoot(pub PathBuf);

impl MailRootResolver for FixedMailRoot {
    fn resolve(&self) -> Option<PathBuf> {
        Some(self.0.clone())
    }
}

/// Resolver that probes the platform's default mail store location.
pub struct DefaultMailRootResolver;

impl MailRootResolver for DefaultMailRootResolver {
    fn resolve(&self) -> Option<PathBuf> {
        if cfg!(target_os = "macos") {
            dirs::home_dir().map(|home| home.join("Library").join("Mail"))
        } else {
            None
        }
    }
}

/// One mailbox's on-disk message files, already flattened to a single
/// account/mailbox pair.
#[derive(Debug, Clone)]
pub struct MailboxFiles {
    pub account: String,
    pub mailbox: String,
    pub message_paths: Vec<PathBuf>,
}

/// Walk `mail_root` and group every `.emlx` file under its (account,
/// mailbox) pair. Nested `.mbox` directories are flattened into a single
/// mailbox path joined by `/` (e.g. `INBOX.mbox/SubFolder.mbox` becomes
/// `INBOX/SubFolder`). Unreadable subtrees are logged and skipped — the
/// scanner never raises, matching the rest of the read path's error policy.
pub fn scan_mail_root(mail_root: &Path) -> Vec<MailboxFiles> {
    let account_dirs = match std::fs::read_dir(mail_root) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("mail root {} unreadable: {e}", mail_root.display());
            return Vec::new();
        }
    };

    let mut visited = HashSet::new();
    let mut result = Vec::new();
    for entry in account_dirs.flatten() {
        let account_path = entry.path();
        if !account_path.is_dir() {
            continue;
        }
        let account = entry.file_name().to_string_lossy().into_owned();
        result.extend(scan_account(&account, &account_path, &mut visited));
    }
    result
}

fn scan_account(account: &str, account_path: &Path, visited: &mut HashSet<PathBuf>) -> Vec<MailboxFiles> {
    let mut mailboxes = Vec::new();
    walk_mailboxes(account, account_path, Vec::new(), visited, &mut mailboxes);
    mailboxes
}

/// Recurse into `dir`'s mailbox subtree. Symlinks are followed (`is_dir`
/// resolves them), but each directory's canonical path is recorded in
/// `visited` before recursing into it, so a symlink cycle is broken by the
/// dedup rather than overflowing the stack.
fn walk_mailboxes(
    account: &str,
    dir: &Path,
    mailbox_parts: Vec<String>,
    visited: &mut HashSet<PathBuf>,
    out: &mut Vec<MailboxFiles>,
) {
    let canonical = match dir.canonicalize() {
        Ok(p) => p,
        Err(e) => {
            log::warn!("mailbox subtree {} unreadable: {e}", dir.display());
            return;
        }
    };
    if !visited.insert(canonical) {
        log::warn!("mailbox subtree {} already visited, skipping cycle", dir.display());
        return;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("mailbox subtree {} unreadable: {e}", dir.display());
            return;
        }
    };

    let messages_dir = dir.join("Messages");
    if messages_dir.is_dir() && !mailbox_parts.is_empty() {
        let message_paths = collect_emlx(&messages_dir);
        out.push(MailboxFiles {
            account: account.to_string(),
            mailbox: mailbox_parts.join("/"),
            message_paths,
        });
    }

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "Messages" {
            continue;
        }
        let mailbox_name = name.strip_suffix(".mbox").unwrap_or(&name).to_string();
        let mut next_parts = mailbox_parts.clone();
        next_parts.push(mailbox_name);
        walk_mailboxes(account, &path, next_parts, visited, out);
    }
}

fn collect_emlx(messages_dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(messages_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Messages dir {} unreadable: {e}", messages_dir.display());
            return Vec::new();
        }
    };

    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().map(|ext| ext == "emlx").unwrap_or(false))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scans_flat_mailbox() {
        let tmp = tempfile::tempdir().unwrap();
        let messages = tmp.path().join("acct1").join("INBOX.mbox").join("Messages");
        fs::create_dir_all(&messages).unwrap();
        fs::write(messages.join("1.emlx"), b"100\nraw").unwrap();
        fs::write(messages.join("2.emlx"), b"100\nraw").unwrap();

        let found = scan_mail_root(tmp.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].account, "acct1");
        assert_eq!(found[0].mailbox, "INBOX");
        assert_eq!(found[0].message_paths.len(), 2);
    }

    #[test]
    fn flattens_nested_mbox_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let messages = tmp
            .path()
            .join("acct1")
            .join("INBOX.mbox")
            .join("SubFolder.mbox")
            .join("Messages");
        fs::create_dir_all(&messages).unwrap();
        fs::write(messages.join("1.emlx"), b"100\nraw").unwrap();

        let found = scan_mail_root(tmp.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].mailbox, "INBOX/SubFolder");
    }

    #[test]
    #[cfg(unix)]
    fn symlink_cycle_is_broken_not_overflowed() {
        let tmp = tempfile::tempdir().unwrap();
        let inbox = tmp.path().join("acct1").join("INBOX.mbox");
        let messages = inbox.join("Messages");
        fs::create_dir_all(&messages).unwrap();
        fs::write(messages.join("1.emlx"), b"100\nraw").unwrap();

        // A symlink inside INBOX.mbox pointing back at INBOX.mbox itself.
        std::os::unix::fs::symlink(&inbox, inbox.join("Loop.mbox")).unwrap();

        let found = scan_mail_root(tmp.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message_paths.len(), 1);
    }

    #[test]
    fn unreadable_root_returns_empty_not_error() {
        let found = scan_mail_root(Path::new("/nonexistent/does/not/exist"));
        assert!(found.is_empty());
    }
}
