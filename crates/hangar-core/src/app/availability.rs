//! Runtime availability guard + per-call timeouts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::errors::RuntimeError;
use crate::ports::ContainerRuntime;

/// Retry policy for reaching the container engine.
///
/// Fixed interval, capped total wait.
#[derive(Debug, Clone, Copy)]
pub struct AvailabilityPolicy {
    /// Delay between pings.
    pub retry_interval: Duration,

    /// Give up once this much time has passed since the first ping.
    pub max_wait: Duration,

    /// Upper bound for any single runtime call.
    pub call_timeout: Duration,
}

impl Default for AvailabilityPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(30),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Run one runtime call under `limit`; an elapsed timer becomes [`RuntimeError::Timeout`].
pub async fn timed<T, F>(op: &'static str, limit: Duration, call: F) -> Result<T, RuntimeError>
where
    F: Future<Output = Result<T, RuntimeError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RuntimeError::Timeout { op }),
    }
}

#[derive(Clone)]
pub struct AvailabilityGuard {
    runtime: Arc<dyn ContainerRuntime>,
    policy: AvailabilityPolicy,
}

impl AvailabilityGuard {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, policy: AvailabilityPolicy) -> Self {
        Self { runtime, policy }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn call_timeout(&self) -> Duration {
        self.policy.call_timeout
    }

    /// Ping until the engine answers or `max_wait` runs out.
    pub async fn wait_available(&self) -> Result<(), RuntimeError> {
        let deadline = Instant::now() + self.policy.max_wait;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let last = match timed("ping", self.policy.call_timeout, self.runtime.ping()).await {
                Ok(()) => {
                    if attempts > 1 {
                        debug!(attempts, "container runtime reachable again");
                    }
                    return Ok(());
                }
                Err(e) => e,
            };
            if Instant::now() + self.policy.retry_interval > deadline {
                warn!(attempts, error = %last, "container runtime unavailable");
                return Err(RuntimeError::Unavailable(format!(
                    "gave up after {attempts} attempts: {last}"
                )));
            }
            tokio::time::sleep(self.policy.retry_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryRuntime;

    fn quick() -> AvailabilityPolicy {
        AvailabilityPolicy {
            retry_interval: Duration::from_millis(10),
            max_wait: Duration::from_millis(60),
            call_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn available_runtime_passes_immediately() {
        let guard = AvailabilityGuard::new(Arc::new(InMemoryRuntime::new()), quick());
        assert!(guard.wait_available().await.is_ok());
    }

    #[tokio::test]
    async fn gives_up_after_max_wait() {
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.set_available(false);
        let guard = AvailabilityGuard::new(runtime, quick());

        let started = std::time::Instant::now();
        let err = guard.wait_available().await.unwrap_err();

        assert!(matches!(err, RuntimeError::Unavailable(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn recovers_when_runtime_comes_back() {
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.set_available(false);
        let guard = AvailabilityGuard::new(runtime.clone(), AvailabilityPolicy {
            max_wait: Duration::from_secs(2),
            ..quick()
        });

        let flip = {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                runtime.set_available(true);
            })
        };
        assert!(guard.wait_available().await.is_ok());
        flip.await.unwrap();
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let runtime = InMemoryRuntime::new();
        runtime.set_latency(Some(Duration::from_millis(200)));
        let err = timed("exists", Duration::from_millis(20), runtime.exists("x"))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
