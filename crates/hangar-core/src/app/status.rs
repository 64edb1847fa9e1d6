//! Status - registry-wide counts for health reporting.

use serde::{Deserialize, Serialize};

use crate::domain::{App, AppStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub provisioning: usize,
    pub running: usize,
    pub stopped: usize,
    pub unreachable: usize,
    pub deleting: usize,
}

impl StatusCounts {
    pub fn of(apps: &[App]) -> Self {
        let mut counts = Self::default();
        for app in apps {
            match app.status {
                AppStatus::Provisioning => counts.provisioning += 1,
                AppStatus::Running => counts.running += 1,
                AppStatus::Stopped => counts.stopped += 1,
                AppStatus::Unreachable => counts.unreachable += 1,
                AppStatus::Deleting => counts.deleting += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.provisioning + self.running + self.stopped + self.unreachable + self.deleting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AppId;
    use chrono::Utc;
    use std::path::PathBuf;

    #[test]
    fn counts_by_status() {
        let mut apps = Vec::new();
        for (id, status) in [
            ("app-a", AppStatus::Running),
            ("app-b", AppStatus::Running),
            ("app-c", AppStatus::Unreachable),
        ] {
            let mut app = App::new(AppId::parse(id).unwrap(), "alice", "p", PathBuf::new(), Utc::now());
            app.status = status;
            apps.push(app);
        }
        let counts = StatusCounts::of(&apps);
        assert_eq!(counts.running, 2);
        assert_eq!(counts.unreachable, 1);
        assert_eq!(counts.total(), 3);
    }
}
