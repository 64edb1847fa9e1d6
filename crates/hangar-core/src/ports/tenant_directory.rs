//! TenantDirectory port - 外部の identity collaborator
//!
//! セッション発行や認証はこの crate の範囲外。ここでは `(username, plan)` を引くだけ。

use crate::domain::Tenant;

pub trait TenantDirectory: Send + Sync {
    fn lookup(&self, username: &str) -> Option<Tenant>;
}
