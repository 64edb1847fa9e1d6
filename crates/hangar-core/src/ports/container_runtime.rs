//! ContainerRuntime port - container engine の抽象化
//!
//! すべての runtime 操作（存在確認・作成・状態確認・再起動・削除）はこの trait を通る。
//! handler や loop から直接 CLI を叩かない。
//!
//! # 実装
//! - **DockerCli**: `docker` CLI を subprocess で呼ぶ（本番用）
//! - **InMemoryRuntime**: 呼び出し回数を記録するモック（テスト・開発用）

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::RuntimeError;
use crate::domain::plan::{Feature, Plan};

/// Restart behaviour requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    Never,
    UnlessStopped,
}

/// Everything the engine needs to create one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub workdir: PathBuf,
    pub command: Vec<String>,
    pub memory_mb: u64,
    pub cpu_cores: f64,
    pub hardened: bool,
    pub restart: RestartPolicy,
    pub labels: BTreeMap<String, String>,
}

impl ContainerSpec {
    /// Base spec with the plan's ceilings and feature effects applied.
    pub fn for_plan(
        name: impl Into<String>,
        image: impl Into<String>,
        workdir: PathBuf,
        command: Vec<String>,
        plan: &Plan,
    ) -> Self {
        let mut spec = Self {
            name: name.into(),
            image: image.into(),
            workdir,
            command,
            memory_mb: plan.memory_mb,
            cpu_cores: plan.cpu_cores,
            hardened: false,
            restart: RestartPolicy::Never,
            labels: BTreeMap::from([("hangar.plan".to_string(), plan.id.clone())]),
        };
        for feature in plan.features.iter() {
            match feature {
                Feature::Shield => spec.hardened = true,
                Feature::AlwaysOn => spec.restart = RestartPolicy::UnlessStopped,
                Feature::CustomDomain => {
                    spec.labels
                        .insert("hangar.routing".to_string(), "custom-domain".to_string());
                }
            }
        }
        spec
    }
}

/// Resource usage observed for a running container.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContainerStats {
    pub ram_mb: u64,
    pub cpu_pct: f64,
}

/// Runtime Adapter.
///
/// # 契約
/// - 各呼び出しはブロッキング I/O を含む可能性があるため、呼び出し側が timeout で包む
/// - `create` は既存の container があればエラーを返してよい（呼び出し側が `exists` で確認する）
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Is the engine reachable?
    async fn ping(&self) -> Result<(), RuntimeError>;

    async fn exists(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Create and start a container. Returns the engine's handle.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Is the container running?
    async fn inspect(&self, name: &str) -> Result<bool, RuntimeError>;

    async fn stats(&self, name: &str) -> Result<ContainerStats, RuntimeError>;

    async fn restart(&self, name: &str) -> Result<(), RuntimeError>;

    async fn remove(&self, name: &str) -> Result<(), RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::FeatureSet;

    fn plan(features: FeatureSet) -> Plan {
        Plan {
            id: "pro".to_string(),
            memory_mb: 512,
            per_app_mb: 128,
            cpu_cores: 0.5,
            max_projects: 3,
            features,
        }
    }

    #[test]
    fn spec_takes_plan_ceilings() {
        let spec = ContainerSpec::for_plan(
            "hangar-app-1",
            "node:20-alpine",
            PathBuf::from("/srv/app"),
            vec!["node".into(), "index.js".into()],
            &plan(FeatureSet::empty()),
        );
        assert_eq!(spec.memory_mb, 512);
        assert_eq!(spec.cpu_cores, 0.5);
        assert!(!spec.hardened);
        assert_eq!(spec.restart, RestartPolicy::Never);
        assert_eq!(spec.labels["hangar.plan"], "pro");
    }

    #[test]
    fn features_shape_the_spec() {
        let features = FeatureSet::empty()
            .with(Feature::Shield)
            .with(Feature::AlwaysOn)
            .with(Feature::CustomDomain);
        let spec = ContainerSpec::for_plan(
            "hangar-app-1",
            "python:3.12-slim",
            PathBuf::from("/srv/app"),
            vec![],
            &plan(features),
        );
        assert!(spec.hardened);
        assert_eq!(spec.restart, RestartPolicy::UnlessStopped);
        assert_eq!(spec.labels["hangar.routing"], "custom-domain");
    }
}
