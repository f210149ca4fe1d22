//! Change scheduler - turns raw watcher events into settled sync work
//!
//! Sits between [`RootWatcher`](crate::watcher::RootWatcher) and the
//! orchestrator: receives raw [`ChangeEvent`]s, drops excluded paths,
//! debounces the rest, and forwards settled events on an output channel
//! the orchestrator drains.
//!
//! ```text
//! RootWatcher ──raw──→ ChangeScheduler ──settled──→ orchestrator
//!                           │
//!                    ExcludeFilter + DebouncedChangeQueue
//! ```

use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use nimbus_core::domain::DomainError;

use crate::watcher::{ChangeEvent, DebouncedChangeQueue};

// ============================================================================
// ExcludeFilter
// ============================================================================

/// Compiled exclude patterns, matched against the file name and the full
/// path of each event
#[derive(Debug, Clone, Default)]
pub struct ExcludeFilter {
    patterns: Vec<glob::Pattern>,
}

impl ExcludeFilter {
    /// Compiles the configured patterns
    ///
    /// # Errors
    /// Returns [`DomainError::ValidationFailed`] for an invalid glob, with
    /// the offending pattern in the message.
    pub fn new(patterns: &[String]) -> Result<Self, DomainError> {
        let compiled = patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| DomainError::ValidationFailed {
                    field: "sync.exclude_patterns".to_string(),
                    message: format!("'{p}': {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns: compiled })
    }

    /// Whether a path is excluded from syncing
    ///
    /// Patterns match the file name (`*.tmp` hits `/root/a.tmp`) or the
    /// whole path (`**/build/**`).
    pub fn is_excluded(&self, path: &Path) -> bool {
        let name = path.file_name().map(|n| n.to_string_lossy());
        self.patterns.iter().any(|pattern| {
            name.as_deref().is_some_and(|n| pattern.matches(n))
                || pattern.matches(&path.to_string_lossy())
        })
    }
}

// ============================================================================
// ChangeScheduler
// ============================================================================

/// Debounces filtered watcher events and forwards them once settled
pub struct ChangeScheduler {
    raw_rx: mpsc::Receiver<ChangeEvent>,
    settled_tx: mpsc::Sender<ChangeEvent>,
    queue: DebouncedChangeQueue,
    filter: ExcludeFilter,
    poll_interval: Duration,
}

impl ChangeScheduler {
    /// Creates the scheduler and the channel settled events arrive on
    ///
    /// # Arguments
    /// * `raw_rx` - Raw events from the watcher
    /// * `filter` - Compiled exclude patterns
    /// * `debounce` - Quiet period a path needs before its event settles
    /// * `poll_interval` - How often the queue is checked for settled work
    pub fn new(
        raw_rx: mpsc::Receiver<ChangeEvent>,
        filter: ExcludeFilter,
        debounce: Duration,
        poll_interval: Duration,
    ) -> (Self, mpsc::Receiver<ChangeEvent>) {
        let (settled_tx, settled_rx) = mpsc::channel(1024);
        let scheduler = Self {
            raw_rx,
            settled_tx,
            queue: DebouncedChangeQueue::new(debounce),
            filter,
            poll_interval,
        };
        (scheduler, settled_rx)
    }

    /// Event loop; returns when the watcher side closes
    ///
    /// Pending events still in their quiet period are flushed on shutdown
    /// so nothing observed is lost.
    pub async fn run(&mut self) {
        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            "Change scheduler starting"
        );
        let mut poll_timer = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                event = self.raw_rx.recv() => {
                    match event {
                        Some(change) => self.accept(change),
                        None => {
                            let remaining = self.queue.poll();
                            for event in remaining {
                                let _ = self.settled_tx.send(event).await;
                            }
                            info!("Watcher channel closed, scheduler stopping");
                            break;
                        }
                    }
                }
                _ = poll_timer.tick() => {
                    for event in self.queue.poll() {
                        debug!(path = %event.path().display(), "Change settled");
                        if self.settled_tx.send(event).await.is_err() {
                            warn!("Settled-event receiver dropped, scheduler stopping");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn accept(&mut self, event: ChangeEvent) {
        if self.filter.is_excluded(event.path()) {
            debug!(path = %event.path().display(), "Event excluded by pattern");
            return;
        }
        self.queue.push(event);
    }
}

// ============================================================================
// Unit tests
// ============================================================================
