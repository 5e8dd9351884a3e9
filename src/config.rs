use std::path::PathBuf;

/// Tunables for the index, resolved env-first then defaulted.
///
/// Every field has a sane default so `IndexConfig::default()` is always a
/// usable configuration for a fresh install.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub db_path: PathBuf,
    pub mail_root: Option<PathBuf>,
    pub index_max_emails: u32,
    pub staleness_hours: f64,
    pub watcher_debounce_ms: u64,
    pub snippet_len: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            db_path: default_db_path(),
            mail_root: None,
            index_max_emails: 5000,
            staleness_hours: 24.0,
            watcher_debounce_ms: 500,
            snippet_len: 200,
        }
    }
}

impl IndexConfig {
    /// Build a config from environment variables, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = IndexConfig::default();

        let db_path = std::env::var("LANTERNMAIL_INDEX_DB_PATH")
            .ok()
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let mail_root = std::env::var("LANTERNMAIL_INDEX_MAIL_ROOT")
            .ok()
            .map(PathBuf::from)
            .or(defaults.mail_root);

        let index_max_emails = std::env::var("LANTERNMAIL_INDEX_MAX_EMAILS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.index_max_emails);

        let staleness_hours = std::env::var("LANTERNMAIL_INDEX_STALENESS_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.staleness_hours);

        let watcher_debounce_ms = std::env::var("LANTERNMAIL_INDEX_WATCHER_DEBOUNCE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.watcher_debounce_ms);

        IndexConfig {
            db_path,
            mail_root,
            index_max_emails,
            staleness_hours,
            watcher_debounce_ms,
            snippet_len: defaults.snippet_len,
        }
    }
}

fn default_db_path() -> PathBuf {
    let base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("lanternmail-index").join("index.db")
}
