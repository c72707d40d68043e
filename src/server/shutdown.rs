//! Shutdown signalling and in-flight exchange accounting.
//!
//! Both states live in `watch` channels so waiters are woken on change
//! instead of polling.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;

pub struct ShutdownManager {
    signaled: watch::Sender<bool>,
    active: watch::Sender<usize>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            signaled: watch::Sender::new(false),
            active: watch::Sender::new(0),
        }
    }

    /// Resolve on ctrl-c, SIGTERM or [`ShutdownManager::signal_shutdown`],
    /// leaving the manager in the shutting-down state.
    pub async fn wait_for_shutdown(&self) -> std::io::Result<()> {
        if self.is_shutting_down() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            tokio::select! {
                _ = signal::ctrl_c() => tracing::info!("Received ctrl-c"),
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = self.notified() => {}
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = signal::ctrl_c() => tracing::info!("Received ctrl-c"),
                _ = self.notified() => {}
            }
        }

        self.signal_shutdown();
        Ok(())
    }

    /// Resolve once shutdown has been signaled.
    pub async fn notified(&self) {
        let mut signaled = self.signaled.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = signaled.wait_for(|signaled| *signaled).await;
    }

    pub fn signal_shutdown(&self) {
        if !self.signaled.send_replace(true) {
            tracing::info!(active = self.active_exchanges(), "Shutdown signaled");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.signaled.borrow()
    }

    /// Count an exchange as active until the returned guard is dropped.
    pub fn track_exchange(self: &Arc<Self>) -> ExchangeGuard {
        self.active.send_modify(|active| *active += 1);
        ExchangeGuard {
            manager: self.clone(),
        }
    }

    pub fn active_exchanges(&self) -> usize {
        *self.active.borrow()
    }

    /// Wait up to `grace` for active exchanges to finish. Returns whether
    /// they all did.
    pub async fn drain(&self, grace: Duration) -> bool {
        let mut active = self.active.subscribe();
        let drained = tokio::time::timeout(grace, active.wait_for(|active| *active == 0)).await;
        match drained {
            Ok(_) => {
                tracing::info!("All exchanges finished");
                true
            }
            Err(_) => {
                tracing::warn!(
                    remaining = self.active_exchanges(),
                    ?grace,
                    "Grace period over with exchanges still running"
                );
                false
            }
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ExchangeGuard {
    manager: Arc<ShutdownManager>,
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        self.manager
            .active
            .send_modify(|active| *active = active.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notified_resolves_after_signal() {
        let manager = Arc::new(ShutdownManager::new());
        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.notified().await })
        };
        manager.signal_shutdown();
        waiter.await.unwrap();
        assert!(manager.is_shutting_down());
        manager.notified().await;
    }

    #[tokio::test]
    async fn signaled_manager_returns_from_wait_immediately() {
        let manager = ShutdownManager::new();
        manager.signal_shutdown();
        manager.wait_for_shutdown().await.unwrap();
    }

    #[test]
    fn guard_tracks_activity() {
        let manager = Arc::new(ShutdownManager::new());
        {
            let _first = manager.track_exchange();
            let _second = manager.track_exchange();
            assert_eq!(manager.active_exchanges(), 2);
        }
        assert_eq!(manager.active_exchanges(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_after_grace() {
        let manager = Arc::new(ShutdownManager::new());
        let _stuck = manager.track_exchange();

        let start = tokio::time::Instant::now();
        assert!(!manager.drain(Duration::from_millis(300)).await);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_wakes_when_last_exchange_ends() {
        let manager = Arc::new(ShutdownManager::new());
        let guard = manager.track_exchange();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        let start = tokio::time::Instant::now();
        assert!(manager.drain(Duration::from_secs(5)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
