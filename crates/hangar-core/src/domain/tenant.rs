//! Tenant identity as consumed by the orchestrator.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Member,
    Admin,
}

/// An authenticated owner of Apps. `username` never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub username: String,
    pub plan: String,
    #[serde(default)]
    pub role: Role,
}

impl Tenant {
    pub fn new(username: impl Into<String>, plan: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            plan: plan.into(),
            role: Role::Member,
        }
    }
}
