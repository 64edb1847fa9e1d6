//! StaticTenantDirectory - 設定ファイル由来の固定テナント表

use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::Tenant;
use crate::ports::TenantDirectory;

/// In-memory tenant table. `upsert` lets an identity collaborator push changes.
#[derive(Debug, Default)]
pub struct StaticTenantDirectory {
    tenants: RwLock<HashMap<String, Tenant>>,
}

impl StaticTenantDirectory {
    pub fn new(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        Self {
            tenants: RwLock::new(
                tenants
                    .into_iter()
                    .map(|t| (t.username.clone(), t))
                    .collect(),
            ),
        }
    }

    pub fn upsert(&self, tenant: Tenant) {
        self.tenants
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tenant.username.clone(), tenant);
    }
}

impl TenantDirectory for StaticTenantDirectory {
    fn lookup(&self, username: &str) -> Option<Tenant> {
        self.tenants
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(username)
            .cloned()
    }
}
