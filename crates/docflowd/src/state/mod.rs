//! Project state derived from the workflow's markdown documents.
//!
//! [`ProjectStateManager`] recomputes a [`ProjectState`] from the
//! well-known files under a project root on every call, implements the
//! polling wait that detects when the external CLI has finished
//! initializing a project, and registers filesystem watches.
//!
//! Initialization polling is a small state machine:
//!
//! ```text
//! NotStarted ──▶ Polling ──┬──▶ Succeeded
//!                  ▲   │   │
//!                  └───┘   └──▶ TimedOut
//! ```
//!
//! `Polling` loops while the files are absent, invalid or unreadable. The
//! deadline is checked once per iteration, so a wait can overrun its
//! timeout by up to one poll interval.

pub mod snapshot;
pub mod validation;
pub mod watch;

pub use snapshot::ProjectSnapshot;
pub use validation::{is_valid_content, StructureValidation};
pub use watch::{spawn_state_refresher, WatchError, WatchSubscription};

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docflow_core::{
    parse_epic_detail, parse_epic_list, parse_story_list, parse_title, paths, Epic,
    ProjectState, Story,
};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Default interval between initialization polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Default overall initialization timeout.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(300);

// ============================================================================
// Initialization Progress
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPhase {
    NotStarted,
    Polling,
    Succeeded,
    TimedOut,
}

impl InitPhase {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Polling => "polling",
            Self::Succeeded => "succeeded",
            Self::TimedOut => "timed_out",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::TimedOut)
    }
}

impl fmt::Display for InitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One report from an initialization wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitProgress {
    pub phase: InitPhase,
    /// Number of completed checks.
    pub attempt: u32,
    pub elapsed: Duration,
    /// Share of the timeout used, 100 once terminal.
    pub percent: u8,
}

/// Result of `wait_for_initialization_with_validation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitializationOutcome {
    pub success: bool,
    /// Present only when the basic wait succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<StructureValidation>,
}

fn percent_of(elapsed: Duration, timeout: Duration) -> u8 {
    if timeout.is_zero() {
        return 99;
    }
    let ratio = elapsed.as_secs_f64() / timeout.as_secs_f64() * 100.0;
    // Clamped below 100 until the wait is over.
    ratio.clamp(0.0, 99.0) as u8
}

// ============================================================================
// Manager
// ============================================================================

/// Reads project state from a root directory. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProjectStateManager {
    root: PathBuf,
    poll_interval: Duration,
}

impl ProjectStateManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn exists(&self, relative: &str) -> bool {
        // Any access error counts as absent.
        tokio::fs::try_exists(self.root.join(relative))
            .await
            .unwrap_or(false)
    }

    async fn read(&self, relative: &str) -> Option<String> {
        tokio::fs::read_to_string(self.root.join(relative)).await.ok()
    }

    fn root_name(&self) -> Option<String> {
        self.root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Computes the project state. Never fails: missing or unparseable
    /// files degrade to absent entities.
    pub async fn get_project_state(&self) -> ProjectState {
        let initialized = self.exists(paths::EPICS).await;
        let has_feedback = self.exists(paths::FEEDBACK).await;
        let has_challenge = self.exists(paths::CHALLENGE).await;
        let has_status = self.exists(paths::STATUS).await;

        let name = match self.read(paths::README).await {
            Some(text) => parse_title(&text).or_else(|| self.root_name()),
            None => self.root_name(),
        };

        let mut state = ProjectState {
            initialized,
            name,
            current_epic: None,
            current_story: None,
            epics: Vec::new(),
            has_feedback,
            has_challenge,
            has_status,
        };

        if !initialized {
            trace!(root = %self.root.display(), "Project not initialized");
            return state;
        }

        state.epics = self
            .read(paths::EPICS)
            .await
            .and_then(|text| parse_epic_list(&text).ok())
            .unwrap_or_default();

        state.current_epic = self.load_current_epic().await;

        if let Some(epic) = &state.current_epic {
            state.current_story = self.load_current_story(&epic.id).await;
            if let Some(listed) = state.epics.iter_mut().find(|e| e.id == epic.id) {
                if listed.stories.is_empty() {
                    listed.stories = epic.stories.clone();
                }
            }
        }

        debug!(
            epics = state.epics.len(),
            current_epic = state.current_epic.as_ref().map(|e| e.id.as_str()),
            current_story = state.current_story.as_ref().map(|s| s.id.as_str()),
            "Computed project state"
        );
        state
    }

    async fn load_current_epic(&self) -> Option<Epic> {
        let text = self.read(paths::CURRENT_EPIC).await?;
        let mut epic = match parse_epic_detail(&text) {
            Ok(epic) => epic,
            Err(e) => {
                debug!(error = %e, "Current epic document did not parse");
                return None;
            }
        };
        if let Some(stories) = self.read(paths::CURRENT_STORIES).await {
            epic.stories = parse_story_list(&stories, &epic.id).unwrap_or_default();
        }
        Some(epic)
    }

    async fn load_current_story(&self, epic_id: &str) -> Option<Story> {
        let text = self.read(paths::CURRENT_STORY).await?;
        parse_story_list(&text, epic_id).ok()?.into_iter().next()
    }

    // ========================================================================
    // Initialization Wait
    // ========================================================================

    /// True when README and EPICS both exist and pass content validation.
    async fn initialization_complete(&self) -> bool {
        validation::has_valid_content(&self.root.join(paths::README)).await
            && validation::has_valid_content(&self.root.join(paths::EPICS)).await
    }

    /// Polls until initialization is complete or `timeout` has elapsed.
    pub async fn wait_for_initialization(&self, timeout: Duration) -> bool {
        self.wait_for_initialization_with_progress(timeout, |_| {})
            .await
    }

    /// Like [`wait_for_initialization`], reporting every state transition
    /// and every poll to `on_progress`.
    ///
    /// [`wait_for_initialization`]: Self::wait_for_initialization
    pub async fn wait_for_initialization_with_progress<F>(
        &self,
        timeout: Duration,
        mut on_progress: F,
    ) -> bool
    where
        F: FnMut(InitProgress),
    {
        let start = Instant::now();
        let mut attempt: u32 = 0;
        on_progress(InitProgress {
            phase: InitPhase::NotStarted,
            attempt,
            elapsed: Duration::ZERO,
            percent: 0,
        });
        info!(
            root = %self.root.display(),
            timeout_ms = timeout.as_millis() as u64,
            "Waiting for project initialization"
        );

        loop {
            let complete = self.initialization_complete().await;
            attempt = attempt.saturating_add(1);
            let elapsed = start.elapsed();

            if complete {
                info!(attempt, elapsed_ms = elapsed.as_millis() as u64, "Project initialized");
                on_progress(InitProgress {
                    phase: InitPhase::Succeeded,
                    attempt,
                    elapsed,
                    percent: 100,
                });
                return true;
            }

            if elapsed >= timeout {
                info!(attempt, elapsed_ms = elapsed.as_millis() as u64, "Initialization wait timed out");
                on_progress(InitProgress {
                    phase: InitPhase::TimedOut,
                    attempt,
                    elapsed,
                    percent: 100,
                });
                return false;
            }

            on_progress(InitProgress {
                phase: InitPhase::Polling,
                attempt,
                elapsed,
                percent: percent_of(elapsed, timeout),
            });
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Checks the required documents.
    pub async fn validate_project_structure(&self) -> StructureValidation {
        validation::validate_structure(&self.root, &paths::REQUIRED_FILES).await
    }

    /// Waits for initialization, then validates the structure. `success`
    /// is the validation result, not just the wait's.
    pub async fn wait_for_initialization_with_validation(
        &self,
        timeout: Duration,
    ) -> InitializationOutcome {
        self.wait_for_initialization_with_validation_and_progress(timeout, |_| {})
            .await
    }

    pub async fn wait_for_initialization_with_validation_and_progress<F>(
        &self,
        timeout: Duration,
        on_progress: F,
    ) -> InitializationOutcome
    where
        F: FnMut(InitProgress),
    {
        if !self
            .wait_for_initialization_with_progress(timeout, on_progress)
            .await
        {
            return InitializationOutcome {
                success: false,
                validation: None,
            };
        }

        let validation = self.validate_project_structure().await;
        if !validation.valid {
            info!(
                missing = ?validation.missing_files,
                invalid = ?validation.invalid_files,
                "Project structure incomplete"
            );
        }
        InitializationOutcome {
            success: validation.valid,
            validation: Some(validation),
        }
    }
}
