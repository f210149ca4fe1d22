//! Filesystem watching and debounced change delivery
//!
//! [`RootWatcher`] wraps the `notify` crate, converting raw OS events into
//! [`ChangeEvent`] values on an mpsc channel. [`DebouncedChangeQueue`]
//! sits between the channel and the orchestrator and holds each path's
//! latest event until it has been quiet for the debounce window, so an
//! editor saving a file ten times in a second produces one sync.
//!
//! ```text
//! inotify ──→ RootWatcher ──→ mpsc ──→ DebouncedChangeQueue ──→ orchestrator
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

// ============================================================================
// ChangeEvent
// ============================================================================

/// One local filesystem change, decoupled from the notify event model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Renamed { old: PathBuf, new: PathBuf },
}

impl ChangeEvent {
    /// Primary path of the event (the destination for renames)
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(p) | Self::Modified(p) | Self::Deleted(p) => p,
            Self::Renamed { new, .. } => new,
        }
    }
}

// ============================================================================
// RootWatcher
// ============================================================================

/// Recursive watcher over the sync root
///
/// Raw OS events are mapped in the notify callback thread and pushed onto
/// the channel returned by [`RootWatcher::new`]; a full channel drops the
/// event with a warning rather than blocking the callback.
pub struct RootWatcher {
    watcher: RecommendedWatcher,
    root: Option<PathBuf>,
}

impl RootWatcher {
    /// Creates the watcher and the channel its events arrive on
    pub fn new() -> Result<(Self, mpsc::Receiver<ChangeEvent>)> {
        let (tx, rx) = mpsc::channel::<ChangeEvent>(1024);

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(change) = map_notify_event(&event) {
                        if let Err(e) = tx.try_send(change) {
                            warn!(error = %e, "Dropping change event, channel full or closed");
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "Filesystem watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("create filesystem watcher")?;

        Ok((
            Self {
                watcher,
                root: None,
            },
            rx,
        ))
    }

    /// Starts watching `root` and everything under it
    pub fn watch(&mut self, root: &Path) -> Result<()> {
        info!(root = %root.display(), "Watching sync root");
        self.watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("watch {}", root.display()))?;
        self.root = Some(root.to_path_buf());
        Ok(())
    }

    /// Stops watching the current root, if any
    pub fn unwatch(&mut self) -> Result<()> {
        if let Some(root) = self.root.take() {
            info!(root = %root.display(), "Unwatching sync root");
            self.watcher
                .unwatch(&root)
                .with_context(|| format!("unwatch {}", root.display()))?;
        }
        Ok(())
    }

    /// Root currently being watched
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }
}

/// Maps a raw notify event onto a [`ChangeEvent`]
///
/// Access events and events without paths are dropped. Metadata-only
/// modifications are reported as `Modified`; the orchestrator's
/// hash comparison filters out the no-ops.
fn map_notify_event(event: &notify::Event) -> Option<ChangeEvent> {
    let paths = &event.paths;
    match &event.kind {
        EventKind::Create(_) => Some(ChangeEvent::Created(paths.first()?.clone())),
        EventKind::Remove(_) => Some(ChangeEvent::Deleted(paths.first()?.clone())),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            Some(ChangeEvent::Renamed {
                old: paths[0].clone(),
                new: paths[1].clone(),
            })
        }
        EventKind::Modify(_) => Some(ChangeEvent::Modified(paths.first()?.clone())),
        other => {
            debug!(kind = ?other, "Ignoring event kind");
            None
        }
    }
}

// ============================================================================
// DebouncedChangeQueue
// ============================================================================

/// Coalesces rapid changes per path until they settle
///
/// Each push replaces the path's pending event and restarts its quiet
/// period; [`poll`](Self::poll) releases only events whose path has been
/// quiet for the full debounce window.
pub struct DebouncedChangeQueue {
    pending: HashMap<PathBuf, (ChangeEvent, Instant)>,
    debounce: Duration,
}

impl DebouncedChangeQueue {
    pub fn new(debounce: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            debounce,
        }
    }

    /// Enqueues an event, replacing any pending one for the same path
    pub fn push(&mut self, event: ChangeEvent) {
        let path = event.path().to_path_buf();
        self.pending.insert(path, (event, Instant::now()));
    }

    /// Removes and returns every event quiet for the full window
    pub fn poll(&mut self) -> Vec<ChangeEvent> {
        let now = Instant::now();
        let settled_paths: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, (_, at))| now.duration_since(*at) >= self.debounce)
            .map(|(path, _)| path.clone())
            .collect();

        settled_paths
            .iter()
            .filter_map(|path| self.pending.remove(path).map(|(event, _)| event))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ============================================================================
// Unit tests
// ============================================================================
