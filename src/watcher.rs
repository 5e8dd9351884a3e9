use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::{mpsc, oneshot, Notify};

use crate::error::IndexError;

type SyncFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Single background filesystem observer with debounce and a single-slot
/// pending flag: a sync trigger arriving while a sync is already running
/// schedules exactly one more sync after the current one finishes, never an
/// unbounded queue of re-syncs.
pub struct IndexWatcher {
    running: Arc<AtomicBool>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl Default for IndexWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexWatcher {
    pub fn new() -> Self {
        IndexWatcher {
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start watching `mail_root`, invoking `on_change` (debounced,
    /// coalesced) whenever the tree changes. Idempotent: calling start on an
    /// already-running watcher is a no-op.
    pub fn start(
        &mut self,
        mail_root: &Path,
        debounce: Duration,
        on_change: SyncFn,
    ) -> Result<(), IndexError> {
        if self.is_running() {
            return Ok(());
        }

        let pending = Arc::new(Notify::new());
        let (fs_tx, mut fs_rx) = mpsc::channel::<notify::Result<Event>>(64);
        let pending_for_cb = pending.clone();

        let mut fs_watcher = RecommendedWatcher::new(
            move |res| {
                let _ = fs_tx.blocking_send(res);
                pending_for_cb.notify_one();
            },
            Config::default(),
        )
        .map_err(|e| IndexError::WatcherUnavailable(e.to_string()))?;

        fs_watcher
            .watch(mail_root, RecursiveMode::Recursive)
            .map_err(|e| IndexError::WatcherUnavailable(e.to_string()))?;

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            let _fs_watcher = fs_watcher; // keep alive for the task's lifetime
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = pending.notified() => {
                        tokio::time::sleep(debounce).await;
                        // drain any events that piled up during the debounce window
                        while fs_rx.try_recv().is_ok() {}
                        on_change().await;
                    }
                }
            }
            log::info!("index watcher stopped");
        });

        self.stop_tx = Some(stop_tx);
        log::info!("index watcher started for {}", mail_root.display());
        Ok(())
    }

    /// Stop the watcher. A no-op if it was never started.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

pub fn boxed_sync_fn<F, Fut>(f: F) -> SyncFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

#[allow(dead_code)]
fn _assert_path_type(_p: PathBuf) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn start_twice_is_idempotent_without_running_a_loop() {
        let watcher = IndexWatcher::new();
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let mut watcher = IndexWatcher::new();
        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn start_sets_running_and_stop_clears_it() {
        let tmp = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let mut watcher = IndexWatcher::new();
        watcher
            .start(
                tmp.path(),
                Duration::from_millis(10),
                boxed_sync_fn(move || {
                    let calls = calls_clone.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();
        assert!(watcher.is_running());

        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn starting_twice_does_not_spawn_a_second_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut watcher = IndexWatcher::new();
        watcher
            .start(tmp.path(), Duration::from_millis(10), boxed_sync_fn(|| async {}))
            .unwrap();
        watcher
            .start(tmp.path(), Duration::from_millis(10), boxed_sync_fn(|| async {}))
            .unwrap();
        assert!(watcher.is_running());
        watcher.stop();
    }
}
