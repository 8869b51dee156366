use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::ReaperConfig;
use crate::connection_manager::{ConnectionRegistry, RemovalReason};
use crate::metrics::ReaperMetrics;

/// How long `stop` waits for the loop to exit before aborting it
const STOP_TIMEOUT_MS: u64 = 5000;

struct RunningTask {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodically evicts connections that have been idle for too long.
///
/// Construction has no side effects; the background loop only exists between
/// [`start`](Self::start) and [`stop`](Self::stop).
pub struct StaleConnectionReaper {
    registry: Arc<ConnectionRegistry>,
    config: ReaperConfig,
    running: Mutex<Option<RunningTask>>,
}

impl StaleConnectionReaper {
    pub fn new(registry: Arc<ConnectionRegistry>, config: ReaperConfig) -> Self {
        Self {
            registry,
            config,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }

    /// Evict every connection idle for at least `max_idle_seconds`.
    ///
    /// Works from a snapshot and removes through the registry's regular
    /// removal path, so concurrent adds and removes are tolerated.
    pub fn sweep(&self, max_idle_seconds: u64) -> usize {
        sweep(&self.registry, max_idle_seconds)
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Spawn the periodic sweep loop. Returns false if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return false;
        }

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run(self.registry.clone(), self.config, shutdown_rx));
        *running = Some(RunningTask { shutdown, handle });
        true
    }

    /// Stop the sweep loop and wait for it to exit.
    ///
    /// Returns false if no loop was running.
    pub async fn stop(&self) -> bool {
        let Some(task) = self.running.lock().take() else {
            return false;
        };

        let _ = task.shutdown.send(());
        let mut handle = task.handle;
        match tokio::time::timeout(Duration::from_millis(STOP_TIMEOUT_MS), &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Reaper task ended abnormally");
            }
            Err(_) => {
                tracing::warn!(timeout_ms = STOP_TIMEOUT_MS, "Reaper did not stop in time, aborting");
                handle.abort();
                let _ = handle.await;
            }
        }
        true
    }
}

impl Drop for StaleConnectionReaper {
    fn drop(&mut self) {
        if let Some(task) = self.running.get_mut().take() {
            task.handle.abort();
        }
    }
}

/// Sweep loop: Idle -> Sweeping -> Idle until shutdown
async fn run(
    registry: Arc<ConnectionRegistry>,
    config: ReaperConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut cleanup_timer = tokio::time::interval(Duration::from_secs(config.cleanup_interval.max(1)));

    // Skip immediate first tick
    cleanup_timer.tick().await;

    tracing::info!(
        cleanup_interval_secs = config.cleanup_interval,
        max_idle_secs = config.max_idle_seconds,
        "Stale connection reaper started"
    );

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Reaper received shutdown signal");
                break;
            }
            _ = cleanup_timer.tick() => {
                let removed = sweep(&registry, config.max_idle_seconds);
                if removed > 0 {
                    tracing::info!(
                        removed = removed,
                        max_idle_secs = config.max_idle_seconds,
                        "Cleaned up stale connections"
                    );
                }
            }
        }
    }

    tracing::info!("Stale connection reaper stopped");
}

fn sweep(registry: &ConnectionRegistry, max_idle_seconds: u64) -> usize {
    let start = Instant::now();
    let now = Utc::now();
    let mut removed = 0;

    for (channel_id, last_activity) in registry.activity_snapshot() {
        let idle_secs = now.signed_duration_since(last_activity).num_seconds();
        if idle_secs < 0 || (idle_secs as u64) < max_idle_seconds {
            continue;
        }
        // One failing record must not stop the rest of the sweep
        match catch_unwind(AssertUnwindSafe(|| {
            registry.remove_with_reason(&channel_id, RemovalReason::Stale)
        })) {
            Ok(true) => removed += 1,
            Ok(false) => {
                tracing::debug!(channel_id = %channel_id, "Stale connection already removed");
            }
            Err(_) => {
                tracing::error!(channel_id = %channel_id, "Evicting stale connection panicked, continuing");
            }
        }
    }

    ReaperMetrics::record_sweep(start.elapsed(), removed as u64);
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::connection_manager::NewConnection;
    use crate::ratelimit::{RateLimitConfig, RateLimiter};

    fn registry_with(ids: &[&str]) -> Arc<ConnectionRegistry> {
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            max_connections_per_window: usize::MAX,
            ..Default::default()
        }));
        let registry = Arc::new(ConnectionRegistry::new(PoolConfig::default(), rate_limiter));
        for id in ids {
            registry.add(NewConnection::new(*id, "10.0.0.1").room("r"));
        }
        registry
    }

    #[test]
    fn test_sweep_zero_idle_evicts_all() {
        let registry = registry_with(&["a", "b", "c"]);
        let reaper = StaleConnectionReaper::new(registry.clone(), ReaperConfig::default());

        assert_eq!(reaper.sweep(0), 3);
        assert!(registry.is_empty());
        assert!(registry.connections_for_room("r").is_empty());
    }

    #[test]
    fn test_sweep_large_idle_evicts_none() {
        let registry = registry_with(&["a", "b"]);
        let reaper = StaleConnectionReaper::new(registry.clone(), ReaperConfig::default());

        assert_eq!(reaper.sweep(u64::MAX), 0);
        assert_eq!(reaper.sweep(3600), 0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_sweep_only_idle_connections() {
        let registry = registry_with(&["idle", "busy"]);
        registry.set_last_activity("idle", Utc::now() - chrono::Duration::seconds(7200));
        let reaper = StaleConnectionReaper::new(registry.clone(), ReaperConfig::default());

        assert_eq!(reaper.sweep(3600), 1);
        assert!(registry.get("idle").is_none());
        assert!(registry.contains("busy"));
    }

    /// Removal hook that panics for one channel
    struct PanickingTransport {
        poisoned: &'static str,
    }

    #[async_trait::async_trait]
    impl crate::transport::Transport for PanickingTransport {
        async fn send(
            &self,
            _channel_id: &str,
            _message: &crate::websocket::ServerMessage,
        ) -> Result<(), crate::transport::TransportError> {
            Ok(())
        }

        fn on_removed(&self, channel_id: &str) {
            if channel_id == self.poisoned {
                panic!("removal hook failed for {}", channel_id);
            }
        }
    }

    #[test]
    fn test_sweep_continues_after_record_panic() {
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            max_connections_per_window: usize::MAX,
            ..Default::default()
        }));
        let registry = Arc::new(
            ConnectionRegistry::new(PoolConfig::default(), rate_limiter)
                .with_transport(Arc::new(PanickingTransport { poisoned: "b" })),
        );
        for id in ["a", "b", "c"] {
            registry.add(NewConnection::new(id, "10.0.0.1").room("r"));
        }
        let reaper = StaleConnectionReaper::new(registry.clone(), ReaperConfig::default());

        // "b" leaves the registry before its hook panics; it is not counted
        assert_eq!(reaper.sweep(0), 2);
        assert!(registry.is_empty());
        assert!(registry.connections_for_room("r").is_empty());
    }

    #[tokio::test]
    async fn test_start_stop() {
        let registry = registry_with(&[]);
        let reaper = StaleConnectionReaper::new(registry, ReaperConfig::default());

        assert!(!reaper.is_running());
        assert!(!reaper.stop().await);

        assert!(reaper.start());
        assert!(!reaper.start());
        assert!(reaper.is_running());

        assert!(reaper.stop().await);
        assert!(!reaper.is_running());
        assert!(!reaper.stop().await);

        // Can be restarted after a stop
        assert!(reaper.start());
        assert!(reaper.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep() {
        let registry = registry_with(&["a", "b"]);
        let config = ReaperConfig {
            cleanup_interval: 300,
            max_idle_seconds: 0,
        };
        let reaper = StaleConnectionReaper::new(registry.clone(), config);
        assert!(reaper.start());

        // Let the loop consume its first tick
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(registry.len(), 2);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(registry.is_empty());

        assert!(reaper.stop().await);
    }
}
