//! Domain model (ids, apps, plans, tenants, errors).

pub mod app;
pub mod errors;
pub mod ids;
pub mod plan;
pub mod state;
pub mod tenant;

pub use app::{App, AppLogEntry, InvalidTransition, MAX_LOG_ENTRIES};
pub use errors::{
    ConfigError, DeployError, PersistenceError, QuotaExceeded, RuntimeError, ValidationError,
};
pub use ids::AppId;
pub use plan::{Feature, FeatureSet, Plan, PlanTable};
pub use state::AppStatus;
pub use tenant::{Role, Tenant};
