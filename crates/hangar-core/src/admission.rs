//! Admission control - quota gate evaluated before any artifact is written.
//!
//! `check_eligibility` は純粋関数（副作用なし）。Registry の読み取りスナップショットと
//! Plan から「新しい App を受け付けるか」を決める。直列化は `AdmissionLocks` が担う。
//!
//! RAM 使用量は fast sync が最後に観測した値なので、この判定は結果整合的。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::errors::QuotaExceeded;
use crate::domain::{App, Plan};

/// Per-tenant locks held from the quota check until the new App is in the registry.
///
/// Every path that adds an App (deploy, watchdog restore) goes through here.
#[derive(Debug, Default)]
pub struct AdmissionLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AdmissionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, tenant: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(tenant.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Aggregated usage of one tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TenantUsage {
    pub app_count: usize,
    pub ram_used_mb: u64,
}

impl TenantUsage {
    /// Sum over the tenant's Apps. Apps of other owners are ignored.
    pub fn of(owner: &str, apps: &[App]) -> Self {
        apps.iter()
            .filter(|app| app.owner == owner)
            .fold(TenantUsage::default(), |acc, app| TenantUsage {
                app_count: acc.app_count + 1,
                ram_used_mb: acc.ram_used_mb + app.ram_used_mb,
            })
    }

    /// `MemoryMB - ramUsed`, may be negative when the tenant is over budget.
    pub fn headroom_mb(&self, plan: &Plan) -> i64 {
        plan.memory_mb as i64 - self.ram_used_mb as i64
    }
}

/// Decide whether one more App fits the plan.
pub fn check_eligibility(plan: &Plan, usage: &TenantUsage) -> Result<(), QuotaExceeded> {
    if usage.app_count >= plan.max_projects as usize {
        return Err(QuotaExceeded::TooManyApps {
            count: usage.app_count,
            max: plan.max_projects,
        });
    }
    let headroom = usage.headroom_mb(plan);
    if headroom < plan.per_app_mb as i64 {
        return Err(QuotaExceeded::InsufficientMemory {
            available_mb: headroom,
            required_mb: plan.per_app_mb,
        });
    }
    Ok(())
}

/// `GET /deploy/validate` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    pub eligible: bool,
    pub message: String,
}

impl Eligibility {
    pub fn from_result(result: &Result<(), QuotaExceeded>) -> Self {
        match result {
            Ok(()) => Self {
                eligible: true,
                message: "eligible to deploy".to_string(),
            },
            Err(reason) => Self {
                eligible: false,
                message: reason.to_string(),
            },
        }
    }
}
