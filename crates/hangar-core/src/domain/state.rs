//! App status state machine.

use serde::{Deserialize, Serialize};

/// Observed status of an App.
///
/// State transitions:
/// - Provisioning -> Running (runtime confirmed start)
/// - Provisioning -> Stopped | Unreachable (create failed, record kept)
/// - Running <-> Stopped (explicit stop, crash, restart)
/// - Running | Stopped -> Unreachable (container missing)
/// - Unreachable -> Running | Stopped (container found again)
/// - Stopped | Unreachable -> Provisioning (re-provisioned by the watchdog)
/// - any non-terminal -> Deleting
///
/// Deleting is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Provisioning,
    Running,
    Stopped,
    Unreachable,
    Deleting,
}

impl AppStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AppStatus::Deleting)
    }

    /// Is `self -> next` an allowed edge? Self-loops are allowed and are no-ops.
    pub fn can_transition_to(self, next: AppStatus) -> bool {
        use AppStatus::*;

        if self == next {
            return true;
        }
        match (self, next) {
            (Deleting, _) => false,
            (_, Deleting) => true,
            (Provisioning, Running | Stopped | Unreachable) => true,
            (Running, Stopped | Unreachable) => true,
            (Stopped, Running | Unreachable | Provisioning) => true,
            (Unreachable, Running | Stopped | Provisioning) => true,
            // Running -> Provisioning; self-loops returned above
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppStatus::Provisioning => "provisioning",
            AppStatus::Running => "running",
            AppStatus::Stopped => "stopped",
            AppStatus::Unreachable => "unreachable",
            AppStatus::Deleting => "deleting",
        }
    }
}

impl std::fmt::Display for AppStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
