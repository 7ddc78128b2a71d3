//! Machine endpoints.
//!
//! Machines are the upstream-facing resource: creating one declares desired
//! capacity, deleting one triggers the reset cascade on its bound host.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use ferrum_api::{BootstrapPayload, LabelSelector, Machine, ObjectMeta, ObjectRef, MACHINE_GUARD};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::error::ApiError;
use crate::state::AppState;

/// Machine routes, mounted at /v1/machines.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_machines).post(create_machine))
        .route("/{name}", get(get_machine).delete(delete_machine))
}

/// Request body for creating a machine.
#[derive(Debug, Deserialize)]
pub struct CreateMachineRequest {
    pub name: String,
    #[serde(default)]
    pub selector: Option<LabelSelector>,
    /// Inline bootstrap payload for the host this machine binds to.
    #[serde(default)]
    pub bootstrap: Option<BootstrapPayload>,
}

#[derive(Debug, Serialize)]
pub struct ListMachinesResponse {
    pub items: Vec<Machine>,
}

/// Declare desired capacity.
///
/// POST /v1/machines
async fn create_machine(
    State(state): State<AppState>,
    Json(req): Json<CreateMachineRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.is_empty() {
        return Err(ApiError::bad_request(
            "invalid_machine_name",
            "Machine name cannot be empty",
        ));
    }

    let mut meta = ObjectMeta::new(state.namespace(), &req.name);
    meta.add_finalizer(MACHINE_GUARD);

    let mut machine = Machine::new(meta);
    machine.selector = req.selector;

    if let Some(bootstrap) = req.bootstrap {
        let secret_name = format!("machine-{}-bootstrap", req.name);
        state.put_bootstrap_secret(&secret_name, bootstrap).await;
        machine.bootstrap_secret_ref = Some(ObjectRef::new(state.namespace(), secret_name));
    }

    let machine = state.machines().create(machine).await?;
    info!(machine = %machine.meta.name, "Machine created");
    Ok((StatusCode::CREATED, Json(machine)))
}

/// List machines.
///
/// GET /v1/machines
async fn list_machines(
    State(state): State<AppState>,
) -> Result<Json<ListMachinesResponse>, ApiError> {
    let items = state.machines().list(state.namespace()).await?;
    Ok(Json(ListMachinesResponse { items }))
}

/// Get a single machine.
///
/// GET /v1/machines/{name}
async fn get_machine(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Machine>, ApiError> {
    let machine = state
        .machines()
        .get(state.namespace(), &name)
        .await?
        .ok_or_else(|| {
            ApiError::not_found("machine_not_found", format!("Machine {name} not found"))
        })?;
    Ok(Json(machine))
}

/// Mark a machine for deletion. The lifecycle reconciler cascades the reset
/// request to the bound host before releasing the record.
///
/// DELETE /v1/machines/{name}
async fn delete_machine(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.machines().mark_deleted(state.namespace(), &name).await?;
    info!(machine = %name, "Machine marked for deletion");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_machine_request_deserialization() {
        let json = r##"{
            "name": "worker-1",
            "selector": {"match_labels": {"fleet": "edge"}},
            "bootstrap": {"format": "cloud-config", "config": "#cloud-config\n"}
        }"##;
        let req: CreateMachineRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.name, "worker-1");
        assert!(req.selector.is_some());
        assert_eq!(req.bootstrap.unwrap().format, "cloud-config");
    }
}
