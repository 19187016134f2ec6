//! Filesystem watches over the workflow documents.
//!
//! Each glob gets its own watcher over the project root (recursive, so
//! directories created later are covered); events are filtered against the
//! glob relative to the root.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use globset::{GlobBuilder, GlobMatcher};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{ProjectSnapshot, ProjectStateManager};
use crate::bus::{EventPayload, StateEventBus};
use docflow_core::paths;

/// Quiet period after the last file event before state is recomputed.
pub const REFRESH_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("invalid watch pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("failed to watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// An active watch. Disposing or dropping it stops the watch.
pub struct WatchSubscription {
    pattern: String,
    watcher: Option<RecommendedWatcher>,
}

impl WatchSubscription {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn dispose(&mut self) {
        if self.watcher.take().is_some() {
            debug!(pattern = %self.pattern, "Watch disposed");
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.watcher.is_some()
    }
}

impl std::fmt::Debug for WatchSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSubscription")
            .field("pattern", &self.pattern)
            .field("active", &self.is_active())
            .finish()
    }
}

fn compile(pattern: &str) -> Result<GlobMatcher, WatchError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|source| WatchError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn matches_under(roots: &[PathBuf], matcher: &GlobMatcher, path: &Path) -> bool {
    roots
        .iter()
        .filter_map(|root| path.strip_prefix(root).ok())
        .any(|relative| matcher.is_match(relative))
}

/// Watches `root` and calls `callback` on every create, modify or remove
/// of a path matching `pattern`.
///
/// # Errors
///
/// Fails if the pattern does not compile or the watcher cannot be created.
pub fn watch_pattern<F>(
    root: &Path,
    pattern: &str,
    callback: Arc<F>,
) -> Result<WatchSubscription, WatchError>
where
    F: Fn() + Send + Sync + 'static,
{
    let matcher = compile(pattern)?;

    // Events may report either the given or the canonical path.
    let mut roots = vec![root.to_path_buf()];
    if let Ok(canonical) = root.canonicalize() {
        if canonical != root {
            roots.push(canonical);
        }
    }

    let notify_err = |source| WatchError::Notify {
        path: root.to_path_buf(),
        source,
    };
    let owned_pattern = pattern.to_string();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_change(&event.kind)
                    && event
                        .paths
                        .iter()
                        .any(|p| matches_under(&roots, &matcher, p))
                {
                    trace!(pattern = %owned_pattern, paths = ?event.paths, "Watched file changed");
                    callback();
                }
            }
            Err(e) => warn!(error = %e, "Watcher error"),
        },
        Config::default(),
    )
    .map_err(notify_err)?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(notify_err)?;

    Ok(WatchSubscription {
        pattern: pattern.to_string(),
        watcher: Some(watcher),
    })
}

impl ProjectStateManager {
    /// Registers one watch per workflow glob; `callback` runs (on the
    /// watcher's thread) whenever a matching file is created, changed or
    /// deleted.
    ///
    /// # Errors
    ///
    /// Fails if any watch cannot be created; watches created so far are
    /// dropped.
    pub fn watch_for_changes<F>(&self, callback: F) -> Result<Vec<WatchSubscription>, WatchError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let subscriptions = paths::WATCH_PATTERNS
            .iter()
            .map(|pattern| watch_pattern(self.root(), pattern, Arc::clone(&callback)))
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            root = %self.root().display(),
            watches = subscriptions.len(),
            "Watching project documents"
        );
        Ok(subscriptions)
    }
}

// ============================================================================
// State Refresher
// ============================================================================

/// Background task that turns file changes into PROJECT_STATE_CHANGED.
pub struct StateRefresher {
    task: JoinHandle<()>,
}

impl StateRefresher {
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for StateRefresher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Watches the snapshot's project root. After each burst of changes settles
/// for `debounce`, the snapshot is invalidated, recomputed and emitted.
///
/// # Errors
///
/// Fails if the watches cannot be created.
pub fn spawn_state_refresher(
    snapshot: Arc<ProjectSnapshot>,
    bus: StateEventBus,
    debounce: Duration,
) -> Result<StateRefresher, WatchError> {
    let (tx, mut rx) = mpsc::channel::<()>(64);
    let subscriptions = snapshot.manager().watch_for_changes(move || {
        // A full channel already guarantees a refresh.
        let _ = tx.try_send(());
    })?;

    let task = tokio::spawn(async move {
        let _subscriptions = subscriptions;
        while rx.recv().await.is_some() {
            // Swallow the rest of the burst.
            while let Ok(Some(())) = tokio::time::timeout(debounce, rx.recv()).await {}

            snapshot.invalidate().await;
            let state = snapshot.get().await;
            debug!(initialized = state.initialized, epics = state.epics.len(), "Project state changed");
            bus.emit(EventPayload::ProjectStateChanged { state });
        }
    });

    Ok(StateRefresher { task })
}
