//! Deploy surface (axum)
//!
//! Tenant identity は外部の認証レイヤーが `x-hangar-user` ヘッダーで渡す。
//! handler は runtime 呼び出しを待たない（provisioning は spawn されたタスクで走る）。

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::async_trait;
use axum::extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::routing::{delete, get, post};
use chrono::{DateTime, Utc};
use hangar_core::admission::Eligibility;
use hangar_core::app::{Orchestrator, StatusCounts};
use hangar_core::deploy::DeployRequest;
use hangar_core::domain::{App, AppId, DeployError};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::{ApiError, ApiResult};

pub const USER_HEADER: &str = "x-hangar-user";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            version: env!("CARGO_PKG_VERSION"),
            started_at: Utc::now(),
        }
    }
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/deploy", post(deploy))
        .route("/deploy/validate", get(validate))
        .route(
            "/deploy/entrypoints/:app_id",
            get(entrypoints).post(select_entrypoint),
        )
        .route("/apps", get(list_apps))
        .route("/apps/:app_id", delete(delete_app))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Authenticated username taken from [`USER_HEADER`].
pub struct TenantUser(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for TenantUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| TenantUser(v.to_string()))
            .ok_or(ApiError::Unauthenticated)
    }
}

fn parse_app_id(raw: &str) -> ApiResult<AppId> {
    Ok(AppId::parse(raw).map_err(DeployError::from)?)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
    pub apps: StatusCounts,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version,
        started_at: state.started_at,
        apps: state.orchestrator.status().await,
    })
}

#[derive(Debug, Serialize)]
pub struct DeployBody {
    pub app: App,
    #[serde(rename = "entryPoints")]
    pub entry_points: Vec<String>,
}

/// `POST /deploy`: multipart `file` plus optional `plan` and `customID`.
async fn deploy(
    State(state): State<AppState>,
    TenantUser(username): TenantUser,
    mut multipart: Multipart,
) -> ApiResult<Json<DeployBody>> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut plan = None;
    let mut custom_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request("invalid_multipart", e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request("invalid_multipart", e.to_string()))?;
                upload = Some((filename, bytes.to_vec()));
            }
            "plan" | "customID" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request("invalid_multipart", e.to_string()))?;
                let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
                if name == "plan" {
                    plan = value;
                } else {
                    custom_id = value;
                }
            }
            _ => {}
        }
    }

    let (filename, bytes) =
        upload.ok_or_else(|| ApiError::bad_request("missing_file", "multipart field `file` is required"))?;

    let response = state
        .orchestrator
        .pipeline
        .deploy(DeployRequest {
            username,
            filename,
            bytes,
            plan,
            custom_id,
        })
        .await?;

    Ok(Json(DeployBody {
        app: response.app,
        entry_points: response.entry_points,
    }))
}

async fn validate(
    State(state): State<AppState>,
    TenantUser(username): TenantUser,
) -> ApiResult<Json<Eligibility>> {
    Ok(Json(state.orchestrator.pipeline.eligibility(&username).await?))
}

#[derive(Debug, Serialize)]
pub struct EntrypointsBody {
    #[serde(rename = "entryPoints")]
    pub entry_points: Vec<String>,
}

async fn entrypoints(
    State(state): State<AppState>,
    TenantUser(username): TenantUser,
    Path(app_id): Path<String>,
) -> ApiResult<Json<EntrypointsBody>> {
    let id = parse_app_id(&app_id)?;
    let entry_points = state.orchestrator.pipeline.entrypoints(&username, &id).await?;
    Ok(Json(EntrypointsBody { entry_points }))
}

#[derive(Debug, Deserialize)]
pub struct SelectEntrypointRequest {
    #[serde(rename = "entryPoint")]
    pub entry_point: String,
}

async fn select_entrypoint(
    State(state): State<AppState>,
    TenantUser(username): TenantUser,
    Path(app_id): Path<String>,
    Json(req): Json<SelectEntrypointRequest>,
) -> ApiResult<Json<App>> {
    let id = parse_app_id(&app_id)?;
    let app = state
        .orchestrator
        .pipeline
        .select_entrypoint(&username, &id, &req.entry_point)
        .await?;
    Ok(Json(app))
}

async fn list_apps(
    State(state): State<AppState>,
    TenantUser(username): TenantUser,
) -> ApiResult<Json<Vec<App>>> {
    Ok(Json(state.orchestrator.pipeline.list_apps(&username).await?))
}

async fn delete_app(
    State(state): State<AppState>,
    TenantUser(username): TenantUser,
    Path(app_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_app_id(&app_id)?;
    state.orchestrator.pipeline.delete_app(&username, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
