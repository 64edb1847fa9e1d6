//! LoopGroup - periodic background loops with cooperative shutdown.
//!
//! - `shutdown_tx` に true を送る（または drop する）と全ループが次の待ち時間で止まる
//! - 各サイクルは `catch_unwind` の内側で実行し、panic してもループは続行する

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// Loop group handle.
pub struct LoopGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl LoopGroup {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            joins: Vec::new(),
        }
    }

    /// Receiver that flips to `true` on shutdown.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Run `cycle` every `every`, starting immediately.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, every: Duration, cycle: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_signal();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(name, ?every, "loop started");
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // sender dropped: the group is gone
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = ticker.tick() => {}
                }
                run_guarded(name, cycle()).await;
            }
            debug!(name, "loop stopped");
        });
        self.joins.push(join);
    }

    /// Request shutdown for all loops.
    /// In-flight cycles finish; no new cycle starts.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all loops.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

impl Default for LoopGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Await one cycle; a panic is logged and swallowed. Returns whether it completed.
pub async fn run_guarded<Fut>(name: &'static str, cycle: Fut) -> bool
where
    Fut: Future<Output = ()>,
{
    match AssertUnwindSafe(cycle).catch_unwind().await {
        Ok(()) => true,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(loop_name = name, panic = %message, "loop cycle panicked; continuing");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn periodic_loop_runs_until_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut group = LoopGroup::new();
        {
            let count = count.clone();
            group.spawn_periodic("counter", Duration::from_millis(5), move || {
                let count = count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        tokio::time::sleep(Duration::from_millis(40)).await;
        group.shutdown_and_join().await;
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several cycles, saw {seen}");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn panicking_cycle_does_not_kill_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut group = LoopGroup::new();
        {
            let count = count.clone();
            group.spawn_periodic("flaky", Duration::from_millis(5), move || {
                let count = count.clone();
                async move {
                    if count.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first cycle blows up");
                    }
                }
            });
        }

        tokio::time::sleep(Duration::from_millis(40)).await;
        group.shutdown_and_join().await;
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn run_guarded_reports_panic() {
        assert!(run_guarded("ok", async {}).await);
        assert!(!run_guarded("boom", async { panic!("boom") }).await);
    }
}
