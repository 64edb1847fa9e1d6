//! App record: desired + last-observed state of one deployed unit.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::AppId;
use super::state::AppStatus;

/// Maximum number of log entries kept per App.
pub const MAX_LOG_ENTRIES: usize = 50;

/// One human-readable lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// A deployed unit of tenant code bound to a runtime container.
///
/// Design:
/// - The registry owns every App; callers mutate only through `AppRegistry::update`.
/// - Status changes go through [`App::transition`] so illegal edges are refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    pub owner: String,
    pub display_name: String,
    /// Detected runtime tag (`node`, `python`, ...).
    pub runtime: String,
    /// Selected entrypoint, relative to the working directory.
    pub entrypoint: Option<String>,
    /// Ordered entrypoint candidates found at deploy time.
    #[serde(default)]
    pub entrypoint_candidates: Vec<String>,
    /// Plan name at deploy time.
    pub plan: String,
    pub container_ref: Option<String>,
    pub workdir: PathBuf,

    pub status: AppStatus,
    pub ram_used_mb: u64,
    pub cpu_used_pct: f64,
    /// Consecutive sync cycles without a backing container.
    pub missing_cycles: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub logs: VecDeque<AppLogEntry>,
}

impl App {
    /// New App in `Provisioning`.
    pub fn new(
        id: AppId,
        owner: impl Into<String>,
        plan: impl Into<String>,
        workdir: PathBuf,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            display_name: id.to_string(),
            id,
            owner: owner.into(),
            runtime: String::new(),
            entrypoint: None,
            entrypoint_candidates: Vec::new(),
            plan: plan.into(),
            container_ref: None,
            workdir,
            status: AppStatus::Provisioning,
            ram_used_mb: 0,
            cpu_used_pct: 0.0,
            missing_cycles: 0,
            start_time: None,
            created_at: now,
            logs: VecDeque::new(),
        }
    }

    /// Move to `next` if the edge is allowed. Returns whether the status changed.
    pub fn transition(&mut self, next: AppStatus) -> Result<bool, InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let changed = self.status != next;
        self.status = next;
        Ok(changed)
    }

    /// Append a log entry, dropping the oldest beyond [`MAX_LOG_ENTRIES`].
    pub fn log(&mut self, at: DateTime<Utc>, message: impl Into<String>) {
        self.logs.push_back(AppLogEntry {
            at,
            message: message.into(),
        });
        while self.logs.len() > MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
    }

    /// Container is present: reset the miss counter.
    pub fn mark_present(&mut self) {
        self.missing_cycles = 0;
    }

    /// Container could not be found this cycle.
    pub fn mark_missing(&mut self) {
        self.missing_cycles = self.missing_cycles.saturating_add(1);
        self.ram_used_mb = 0;
        self.cpu_used_pct = 0.0;
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }

    pub fn container_name(&self) -> String {
        self.id.container_name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: AppStatus,
    pub to: AppStatus,
}
