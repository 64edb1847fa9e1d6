#![allow(dead_code)]

use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use hangar_core::app::{Orchestrator, OrchestratorBuilder};
use hangar_core::config::OrchestratorConfig;
use hangar_core::deploy::{DeployRequest, StorageLayout};
use hangar_core::domain::{FeatureSet, Plan, Tenant};
use hangar_core::impls::InMemoryRuntime;
use hangar_core::ports::FixedClock;

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub runtime: Arc<InMemoryRuntime>,
    pub clock: Arc<FixedClock>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn layout(&self) -> StorageLayout {
        StorageLayout::under(self.dir.path())
    }
}

/// `test` plan: MemoryMB=256, PerAppMB=256, MaxProjects=1.
pub fn test_plan() -> Plan {
    Plan {
        id: "test".into(),
        memory_mb: 256,
        per_app_mb: 256,
        cpu_cores: 0.5,
        max_projects: 1,
        features: FeatureSet::empty(),
    }
}

pub fn harness_with(plan: Plan) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = OrchestratorConfig::default();
    config.data_root = dir.path().to_path_buf();
    config.plans.insert(plan.id.clone(), plan.clone());
    config.tenants.push(Tenant::new("alice", &plan.id));
    config.tenants.push(Tenant::new("bob", &plan.id));
    config.reconciler.availability_retry_ms = 5;
    config.reconciler.availability_max_wait_ms = 20;
    config.reconciler.runtime_call_timeout_ms = 200;

    let runtime = Arc::new(InMemoryRuntime::new());
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let orchestrator = OrchestratorBuilder::new(config)
        .runtime(runtime.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    Harness {
        dir,
        runtime,
        clock,
        orchestrator,
    }
}

pub fn harness() -> Harness {
    harness_with(test_plan())
}

fn header(path: &str, len: usize) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_size(len as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    let name = &mut header.as_old_mut().name;
    name[..path.len()].copy_from_slice(path.as_bytes());
    header.set_cksum();
    header
}

pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, body) in files {
        builder.append(&header(path, body.len()), body.as_bytes()).unwrap();
    }
    let tar = builder.into_inner().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

pub fn upload(username: &str, files: &[(&str, &str)]) -> DeployRequest {
    DeployRequest {
        username: username.into(),
        filename: "site.tar.gz".into(),
        bytes: tar_gz(files),
        plan: None,
        custom_id: None,
    }
}

/// Poll `cond` until it holds or one second passes.
pub async fn eventually<F, Fut>(mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if cond().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
