//! Progress Tracker
//!
//! Per-request progress state. Percentages only move forward: an update that
//! would go backwards is clamped to the last reported value.
//!
//! Running requests publish snapshots into a [`ProgressRegistry`] so their
//! state can be polled by task id. Snapshots stay readable for a while after
//! the request ends.

use mini_moka::sync::{Cache, ConcurrentCacheExt};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How long a snapshot stays readable after its last update
const SNAPSHOT_IDLE: Duration = Duration::from_secs(600);

/// Upper bound on tracked requests
const MAX_TRACKED: u64 = 1_000;

/// Pipeline milestones
pub mod milestones {
    pub const ACCEPTED: u8 = 5;
    pub const PROMPT_BUILT: u8 = 10;
    pub const PROVIDER_STARTED: u8 = 20;
    pub const FIRST_BYTES: u8 = 30;
    /// Upper bound of the streaming band that starts at [`FIRST_BYTES`]
    pub const STREAMING_MAX: u8 = 75;
    pub const PROVIDER_FINISHED: u8 = 80;
    pub const EXTRACTED: u8 = 90;
    pub const NORMALIZED: u8 = 95;
    pub const DONE: u8 = 100;
}

/// One recorded progress update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStep {
    pub percent: u8,
    pub message: String,
    pub timestamp: String,
}

/// Lifecycle of a tracked request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Point-in-time view of a tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub task_id: String,
    pub status: ProgressStatus,
    pub percent: u8,
    pub message: String,
    pub elapsed_ms: u64,
    pub history: Vec<ProgressStep>,
}

#[derive(Debug)]
pub struct ProgressTracker {
    task_id: String,
    status: ProgressStatus,
    percent: u8,
    message: String,
    history: Vec<ProgressStep>,
    started: Instant,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::with_task_id(Uuid::new_v4().to_string())
    }

    pub fn with_task_id(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: ProgressStatus::Running,
            percent: 0,
            message: String::new(),
            history: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn status(&self) -> ProgressStatus {
        self.status
    }

    /// Whether no update has been recorded yet
    pub fn is_fresh(&self) -> bool {
        self.history.is_empty()
    }

    /// Record an update and return the percentage actually applied.
    pub fn update(&mut self, percent: u8, message: impl Into<String>) -> u8 {
        let applied = percent.min(milestones::DONE).max(self.percent);
        self.percent = applied;
        self.message = message.into();
        self.history.push(ProgressStep {
            percent: applied,
            message: self.message.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
        applied
    }

    /// Mark the request finished. Only the first call takes effect.
    pub fn finish(&mut self, status: ProgressStatus, message: impl Into<String>) {
        if self.status != ProgressStatus::Running {
            return;
        }
        self.status = status;
        let percent = if status == ProgressStatus::Completed {
            milestones::DONE
        } else {
            self.percent
        };
        self.update(percent, message);
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            task_id: self.task_id.clone(),
            status: self.status,
            percent: self.percent,
            message: self.message.clone(),
            elapsed_ms: self.elapsed_ms(),
            history: self.history.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Latest snapshot of every recent request, keyed by task id
#[derive(Clone)]
pub struct ProgressRegistry {
    snapshots: Cache<String, ProgressSnapshot>,
}

impl Default for ProgressRegistry {
    fn default() -> Self {
        Self::new(MAX_TRACKED, SNAPSHOT_IDLE)
    }
}

impl ProgressRegistry {
    pub fn new(max_tracked: u64, idle: Duration) -> Self {
        Self {
            snapshots: Cache::builder()
                .max_capacity(max_tracked)
                .time_to_idle(idle)
                .build(),
        }
    }

    pub fn publish(&self, snapshot: ProgressSnapshot) {
        self.snapshots.insert(snapshot.task_id.clone(), snapshot);
    }

    pub fn get(&self, task_id: &str) -> Option<ProgressSnapshot> {
        self.snapshots.get(&task_id.to_string())
    }

    pub fn remove(&self, task_id: &str) {
        self.snapshots.invalidate(&task_id.to_string());
    }

    pub fn len(&self) -> u64 {
        self.snapshots.sync();
        self.snapshots.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Streaming-band percentage after `sentences` sentences.
pub fn streaming_percent(sentences: usize) -> u8 {
    let span = (milestones::STREAMING_MAX - milestones::FIRST_BYTES) as usize;
    milestones::FIRST_BYTES + sentences.min(span) as u8
}
