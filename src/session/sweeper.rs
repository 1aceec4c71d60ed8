//! Background worker evicting idle sessions.
//!
//! Periodically calls [`ConversationStore::evict_idle`] so memory stays bounded
//! on a long-running process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::config::SessionConfig;
use crate::session::store::ConversationStore;

/// Configuration for the sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Interval between sweeps.
    pub interval: Duration,
    /// Idle time after which a session is evicted.
    pub ttl: Duration,
    /// Whether the sweeper runs at all.
    pub enabled: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SweeperConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.sweep_interval_seconds),
            ttl: config.ttl(),
            enabled: config.sweeper_enabled,
        }
    }
}

/// Statistics from a sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    /// Number of sessions evicted.
    pub evicted: usize,
    /// Sessions still live after the sweep.
    pub remaining: usize,
    /// Sweep duration in milliseconds.
    pub duration_ms: u64,
}

/// Periodic eviction worker.
pub struct SessionSweeper {
    store: Arc<ConversationStore>,
    config: SweeperConfig,
    shutdown: Arc<Notify>,
}

impl SessionSweeper {
    /// Create a sweeper over `store`.
    #[must_use]
    pub fn new(store: Arc<ConversationStore>, config: SweeperConfig) -> Self {
        Self {
            store,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Notifier that stops the worker.
    #[must_use]
    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn the worker as a tokio task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Session sweeper is disabled");
            return;
        }

        info!(interval = ?self.config.interval, ttl = ?self.config.ttl, "Starting session sweeper");

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.config.interval) => {
                    let stats = self.sweep();
                    if stats.evicted > 0 {
                        info!(
                            evicted = stats.evicted,
                            remaining = stats.remaining,
                            duration_ms = stats.duration_ms,
                            "Session sweep completed"
                        );
                    } else {
                        debug!(remaining = stats.remaining, "Session sweep found nothing idle");
                    }
                }
                () = self.shutdown.notified() => {
                    info!("Session sweeper shutting down");
                    break;
                }
            }
        }
    }

    /// Run a single sweep.
    pub fn sweep(&self) -> SweepStats {
        let start = Instant::now();
        let evicted = self.store.evict_idle(self.config.ttl);
        SweepStats {
            evicted,
            remaining: self.store.len(),
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}
