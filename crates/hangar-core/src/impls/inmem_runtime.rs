//! InMemoryRuntime - 開発・テスト用の container runtime
//!
//! # 学習ポイント
//! - 呼び出し回数（create/restart/remove）を記録し、reconcile の冪等性を検証する
//! - 障害注入: runtime 不達、create 失敗、応答遅延
//! - container の消失・停止をテストから直接操作できる

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::RuntimeError;
use crate::ports::{ContainerRuntime, ContainerSpec, ContainerStats};

#[derive(Debug, Clone)]
struct FakeContainer {
    spec: ContainerSpec,
    running: bool,
    stats: ContainerStats,
}

/// Snapshot of mutating calls issued so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeCalls {
    pub create: usize,
    pub restart: usize,
    pub remove: usize,
}

#[derive(Debug)]
pub struct InMemoryRuntime {
    containers: Mutex<HashMap<String, FakeContainer>>,
    creates: AtomicUsize,
    restarts: AtomicUsize,
    removes: AtomicUsize,
    available: AtomicBool,
    fail_create: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            creates: AtomicUsize::new(0),
            restarts: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            available: AtomicBool::new(true),
            fail_create: AtomicBool::new(false),
            latency: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> RuntimeCalls {
        RuntimeCalls {
            create: self.creates.load(Ordering::SeqCst),
            restart: self.restarts.load(Ordering::SeqCst),
            remove: self.removes.load(Ordering::SeqCst),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Every call sleeps this long before answering.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.lock_latency() = latency;
    }

    /// Simulate a crash (container stays, but stops).
    pub fn stop(&self, name: &str) {
        if let Some(c) = self.lock().get_mut(name) {
            c.running = false;
        }
    }

    /// Simulate the container vanishing behind our back.
    pub fn vanish(&self, name: &str) {
        self.lock().remove(name);
    }

    pub fn set_stats(&self, name: &str, stats: ContainerStats) {
        if let Some(c) = self.lock().get_mut(name) {
            c.stats = stats;
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.lock().get(name).is_some_and(|c| c.running)
    }

    pub fn spec_of(&self, name: &str) -> Option<ContainerSpec> {
        self.lock().get(name).map(|c| c.spec.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, FakeContainer>> {
        self.containers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_latency(&self) -> std::sync::MutexGuard<'_, Option<Duration>> {
        self.latency.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn enter(&self) -> Result<(), RuntimeError> {
        let latency = *self.lock_latency();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("in-memory runtime switched off".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.enter().await
    }

    async fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        self.enter().await?;
        Ok(self.lock().contains_key(name))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.enter().await?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RuntimeError::failed("create", "injected failure"));
        }
        let mut containers = self.lock();
        if containers.contains_key(&spec.name) {
            return Err(RuntimeError::failed(
                "create",
                format!("container {} already exists", spec.name),
            ));
        }
        containers.insert(
            spec.name.clone(),
            FakeContainer {
                spec: spec.clone(),
                running: true,
                stats: ContainerStats::default(),
            },
        );
        Ok(spec.name.clone())
    }

    async fn inspect(&self, name: &str) -> Result<bool, RuntimeError> {
        self.enter().await?;
        self.lock()
            .get(name)
            .map(|c| c.running)
            .ok_or_else(|| RuntimeError::failed("inspect", format!("no such container: {name}")))
    }

    async fn stats(&self, name: &str) -> Result<ContainerStats, RuntimeError> {
        self.enter().await?;
        self.lock()
            .get(name)
            .map(|c| if c.running { c.stats } else { ContainerStats::default() })
            .ok_or_else(|| RuntimeError::failed("stats", format!("no such container: {name}")))
    }

    async fn restart(&self, name: &str) -> Result<(), RuntimeError> {
        self.enter().await?;
        self.restarts.fetch_add(1, Ordering::SeqCst);
        match self.lock().get_mut(name) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(RuntimeError::failed("restart", format!("no such container: {name}"))),
        }
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        self.enter().await?;
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.lock().remove(name);
        Ok(())
    }
}
