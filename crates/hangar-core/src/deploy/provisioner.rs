//! Provisioner - create-if-absent / restart-if-stopped for one App container.
//!
//! Shared by the deploy pipeline (first start) and the watchdog (self-healing).
//! A container name is provisioned by at most one task at a time.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::detect::RuntimeKind;
use crate::app::availability::{timed, AvailabilityGuard};
use crate::domain::errors::RuntimeError;
use crate::domain::{App, AppId, AppStatus, PlanTable};
use crate::ports::{Clock, ContainerSpec};
use crate::registry::AppRegistry;

/// Everything needed to (re)create an App's container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRecipe {
    pub id: AppId,
    pub plan: String,
    pub runtime: RuntimeKind,
    pub entrypoint: String,
    pub workdir: PathBuf,
}

impl ContainerRecipe {
    /// `None` until an entrypoint is chosen or when the runtime is unknown.
    pub fn from_app(app: &App) -> Option<Self> {
        Some(Self {
            id: app.id.clone(),
            plan: app.plan.clone(),
            runtime: RuntimeKind::parse(&app.runtime)?,
            entrypoint: app.entrypoint.clone()?,
            workdir: app.workdir.clone(),
        })
    }

    pub fn container_name(&self) -> String {
        self.id.container_name()
    }
}

/// What `ensure_running` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created { container_ref: String },
    Restarted,
    AlreadyRunning,
    /// Another task is provisioning the same container.
    InFlight,
}

/// Removes the name from the in-flight set when dropped.
struct InFlightSlot<'a> {
    set: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.name);
    }
}

fn lock(set: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Provisioner {
    guard: AvailabilityGuard,
    registry: Arc<AppRegistry>,
    plans: Arc<PlanTable>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashSet<String>>,
}

impl Provisioner {
    pub fn new(
        guard: AvailabilityGuard,
        registry: Arc<AppRegistry>,
        plans: Arc<PlanTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            guard,
            registry,
            plans,
            clock,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, name: &str) -> Option<InFlightSlot<'_>> {
        if !lock(&self.in_flight).insert(name.to_string()) {
            return None;
        }
        Some(InFlightSlot {
            set: &self.in_flight,
            name: name.to_string(),
        })
    }

    pub fn spec_for(&self, recipe: &ContainerRecipe) -> ContainerSpec {
        let plan = self.plans.get(&recipe.plan);
        ContainerSpec::for_plan(
            recipe.container_name(),
            recipe.runtime.image(),
            recipe.workdir.clone(),
            recipe.runtime.command(&recipe.entrypoint),
            &plan,
        )
    }

    /// Make sure the container exists and runs. Never creates a duplicate.
    pub async fn ensure_running(
        &self,
        recipe: &ContainerRecipe,
    ) -> Result<ProvisionOutcome, RuntimeError> {
        let name = recipe.container_name();
        let Some(_slot) = self.claim(&name) else {
            debug!(container = %name, "provisioning already in flight");
            return Ok(ProvisionOutcome::InFlight);
        };

        self.guard.wait_available().await?;
        let runtime = self.guard.runtime();
        let limit = self.guard.call_timeout();

        if timed("exists", limit, runtime.exists(&name)).await? {
            if timed("inspect", limit, runtime.inspect(&name)).await? {
                return Ok(ProvisionOutcome::AlreadyRunning);
            }
            timed("restart", limit, runtime.restart(&name)).await?;
            return Ok(ProvisionOutcome::Restarted);
        }

        let spec = self.spec_for(recipe);
        let container_ref = timed("create", limit, runtime.create(&spec)).await?;
        Ok(ProvisionOutcome::Created { container_ref })
    }

    /// Remove the container, waiting for the runtime if needed.
    pub async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        self.guard.wait_available().await?;
        timed("remove", self.guard.call_timeout(), self.guard.runtime().remove(name)).await
    }

    /// Provision a registered App and fold the result back into its record.
    pub async fn provision_app(&self, id: &AppId) -> Option<ProvisionOutcome> {
        let app = self.registry.get(id).await?;
        if app.status.is_terminal() {
            return None;
        }
        let Some(recipe) = ContainerRecipe::from_app(&app) else {
            debug!(app_id = %id, "no entrypoint selected yet; provisioning deferred");
            return None;
        };
        let result = self.ensure_running(&recipe).await;
        self.record(id, &recipe, result).await
    }

    /// Fold a provisioning result into the registry.
    ///
    /// Failures stay on the App's log trail; the record itself is kept.
    pub async fn record(
        &self,
        id: &AppId,
        recipe: &ContainerRecipe,
        result: Result<ProvisionOutcome, RuntimeError>,
    ) -> Option<ProvisionOutcome> {
        let now = self.clock.now();
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(app_id = %id, error = %e, "provisioning failed");
                self.registry
                    .update(id, |app| {
                        app.log(now, format!("provisioning failed: {e}"));
                        let next = match &e {
                            // unknown: leave status for the next cycle
                            RuntimeError::Timeout { .. } => return,
                            RuntimeError::Unavailable(_) => AppStatus::Unreachable,
                            RuntimeError::OperationFailed { .. } => AppStatus::Stopped,
                        };
                        let _ = app.transition(next);
                    })
                    .await;
                return None;
            }
        };

        if outcome == ProvisionOutcome::InFlight {
            return Some(outcome);
        }

        let applied = self
            .registry
            .update(id, |app| {
                if app.status.is_terminal() {
                    return false;
                }
                let _ = app.transition(AppStatus::Running);
                app.mark_present();
                match &outcome {
                    ProvisionOutcome::Created { container_ref } => {
                        app.container_ref = Some(container_ref.clone());
                        app.start_time = Some(now);
                        app.log(now, "container created");
                    }
                    ProvisionOutcome::Restarted => {
                        app.container_ref.get_or_insert_with(|| recipe.container_name());
                        app.start_time = Some(now);
                        app.log(now, "container restarted");
                    }
                    ProvisionOutcome::AlreadyRunning => {
                        app.container_ref.get_or_insert_with(|| recipe.container_name());
                        app.start_time.get_or_insert(now);
                    }
                    ProvisionOutcome::InFlight => {}
                }
                true
            })
            .await
            .unwrap_or(false);

        if applied {
            info!(app_id = %id, ?outcome, "app provisioned");
        } else if matches!(outcome, ProvisionOutcome::Created { .. }) {
            // the App was deleted while its container was being created
            let name = recipe.container_name();
            warn!(app_id = %id, container = %name, "app gone after create; removing container");
            if let Err(e) = self.remove(&name).await {
                warn!(container = %name, error = %e, "orphan container removal failed");
            }
        }
        Some(outcome)
    }
}
