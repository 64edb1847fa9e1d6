//! Errors - エラー型と分類
//!
//! - **DeployError**: pipeline が呼び出し元へ同期的に返すエラー
//! - **RuntimeError**: container runtime 呼び出しの失敗（App の状態に吸収される）
//! - **PersistenceError**: snapshot 書き込みの失敗（ログのみ、致命的ではない）

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use super::ids::AppId;

/// ValidationError は artifact やリクエスト項目の不備
///
/// `code` は機械可読な分類、`message` は人間向けの詳細。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Quota rejection produced by admission control.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum QuotaExceeded {
    #[error("project limit reached ({count}/{max})")]
    TooManyApps { count: usize, max: u32 },

    #[error("insufficient memory: {available_mb} MB free, {required_mb} MB required per app")]
    InsufficientMemory { available_mb: i64, required_mb: u64 },
}

impl QuotaExceeded {
    pub fn code(&self) -> &'static str {
        match self {
            QuotaExceeded::TooManyApps { .. } => "too_many_apps",
            QuotaExceeded::InsufficientMemory { .. } => "insufficient_memory",
        }
    }
}

/// Errors returned synchronously by the deploy surface.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(#[from] QuotaExceeded),

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("app not found: {0}")]
    AppNotFound(AppId),

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        DeployError::Validation(ValidationError::new(code, message))
    }
}

/// Container runtime failures.
///
/// `Timeout` は「不明」扱い: 次のサイクルで再試行し、状態は変更しない。
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    #[error("runtime call timed out: {op}")]
    Timeout { op: &'static str },

    #[error("runtime {op} failed: {message}")]
    OperationFailed { op: &'static str, message: String },
}

impl RuntimeError {
    pub fn failed(op: &'static str, message: impl Into<String>) -> Self {
        RuntimeError::OperationFailed {
            op,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RuntimeError::Timeout { .. })
    }
}

/// Registry snapshot I/O failures.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("snapshot write task failed: {0}")]
    Join(String),
}

/// Startup configuration problems. These are the only fatal errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("plan table is empty; refusing to start without quotas")]
    EmptyPlanTable,

    #[error("tenant {username} references unknown plan {plan}")]
    UnknownPlan { username: String, plan: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_codes_are_stable() {
        let too_many = QuotaExceeded::TooManyApps { count: 1, max: 1 };
        let memory = QuotaExceeded::InsufficientMemory {
            available_mb: 0,
            required_mb: 256,
        };
        assert_eq!(too_many.code(), "too_many_apps");
        assert_eq!(memory.code(), "insufficient_memory");
        assert!(too_many.to_string().contains("1/1"));
    }

    #[test]
    fn quota_serializes_with_reason_tag() {
        let value = serde_json::to_value(QuotaExceeded::TooManyApps { count: 2, max: 2 }).unwrap();
        assert_eq!(value["reason"], "too_many_apps");
        assert_eq!(value["max"], 2);
    }

    #[test]
    fn deploy_error_wraps_validation() {
        let err = DeployError::validation("empty_artifact", "upload is empty");
        assert!(matches!(err, DeployError::Validation(ref v) if v.code == "empty_artifact"));
        assert!(err.to_string().contains("upload is empty"));
    }
}
