//! Cached project state.
//!
//! Readers get either the previous `Arc<ProjectState>` or a wholly new one;
//! recomputation builds the full value before publishing it.

use std::sync::Arc;
use std::time::Duration;

use docflow_core::ProjectState;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::trace;

use super::ProjectStateManager;

struct Cached {
    state: Arc<ProjectState>,
    computed_at: Instant,
}

/// Thin cache in front of a [`ProjectStateManager`].
pub struct ProjectSnapshot {
    manager: ProjectStateManager,
    ttl: Option<Duration>,
    cached: RwLock<Option<Cached>>,
}

impl ProjectSnapshot {
    /// A snapshot that stays valid until invalidated.
    pub fn new(manager: ProjectStateManager) -> Self {
        Self {
            manager,
            ttl: None,
            cached: RwLock::new(None),
        }
    }

    /// A snapshot that also expires `ttl` after being computed.
    pub fn with_ttl(manager: ProjectStateManager, ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::new(manager)
        }
    }

    pub fn manager(&self) -> &ProjectStateManager {
        &self.manager
    }

    fn is_fresh(&self, cached: &Cached) -> bool {
        self.ttl.map_or(true, |ttl| cached.computed_at.elapsed() < ttl)
    }

    /// Returns the cached state, recomputing it if absent or expired.
    pub async fn get(&self) -> Arc<ProjectState> {
        {
            let cached = self.cached.read().await;
            if let Some(cached) = cached.as_ref().filter(|c| self.is_fresh(c)) {
                return Arc::clone(&cached.state);
            }
        }
        self.refresh().await
    }

    /// Recomputes and publishes a new state unconditionally.
    pub async fn refresh(&self) -> Arc<ProjectState> {
        let state = Arc::new(self.manager.get_project_state().await);
        let mut cached = self.cached.write().await;
        *cached = Some(Cached {
            state: Arc::clone(&state),
            computed_at: Instant::now(),
        });
        trace!("Project snapshot refreshed");
        state
    }

    /// Drops the cached state; the next `get` recomputes.
    pub async fn invalidate(&self) {
        self.cached.write().await.take();
        trace!("Project snapshot invalidated");
    }

    pub async fn is_cached(&self) -> bool {
        self.cached.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_core::paths;

    fn write_epics(root: &std::path::Path, content: &str) {
        let path = root.join(paths::EPICS);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_serves_cached_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = ProjectSnapshot::new(ProjectStateManager::new(dir.path()));

        let first = snapshot.get().await;
        assert!(!first.initialized);

        write_epics(dir.path(), "## Epic #1: Setup\n");
        let cached = snapshot.get().await;
        assert!(Arc::ptr_eq(&first, &cached));

        snapshot.invalidate().await;
        assert!(!snapshot.is_cached().await);
        let fresh = snapshot.get().await;
        assert!(fresh.initialized);
        assert_eq!(fresh.epics.len(), 1);
        // The old value is untouched.
        assert!(!first.initialized);
    }

    #[tokio::test]
    async fn test_snapshot_ttl_expires() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot =
            ProjectSnapshot::with_ttl(ProjectStateManager::new(dir.path()), Duration::from_millis(20));
        let first = snapshot.get().await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        let second = snapshot.get().await;
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
