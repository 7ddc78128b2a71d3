//! Registration and host endpoints.
//!
//! These are the agent-facing APIs: agents fetch their Registration, create
//! their Host record under it, patch lifecycle markers, fetch the bootstrap
//! payload, and mark the Host for deletion during reset.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use ferrum_api::{
    BootstrapPayload, Host, HostPatch, HostPhase, ObjectMeta, Registration, RegistrationConfig,
    RESET_GUARD,
};
use serde::Deserialize;
use tracing::info;

use crate::api::error::ApiError;
use crate::state::AppState;

/// Registration routes, mounted at /v1/registrations.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{name}", get(get_registration).put(put_registration))
        .route("/{name}/hosts", post(create_host))
        .route(
            "/{name}/hosts/{host}",
            patch(patch_host).delete(delete_host),
        )
        .route("/{name}/hosts/{host}/bootstrap", get(get_bootstrap))
}

/// Request body for seeding or replacing a Registration.
#[derive(Debug, Deserialize)]
pub struct PutRegistrationRequest {
    #[serde(default)]
    pub host_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub host_annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub config: RegistrationConfig,
}

/// Request body for registering a new host.
#[derive(Debug, Deserialize)]
pub struct CreateHostRequest {
    pub name: String,
    pub public_key: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Get a registration.
///
/// GET /v1/registrations/{name}
async fn get_registration(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Registration>, ApiError> {
    let registration = state
        .registrations()
        .get(state.namespace(), &name)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(
                "registration_not_found",
                format!("Registration {name} not found"),
            )
        })?;
    Ok(Json(registration))
}

/// Create or replace a registration.
///
/// PUT /v1/registrations/{name}
async fn put_registration(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<PutRegistrationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.registrations();

    let mut registration = Registration::new(ObjectMeta::new(state.namespace(), &name));
    registration.host_labels = req.host_labels;
    registration.host_annotations = req.host_annotations;
    registration.config = req.config;

    match store.get(state.namespace(), &name).await? {
        Some(existing) => {
            registration.meta = existing.meta;
            let registration = store.update(registration).await?;
            Ok((StatusCode::OK, Json(registration)))
        }
        None => {
            let registration = store.create(registration).await?;
            info!(registration = %name, "Registration created");
            Ok((StatusCode::CREATED, Json(registration)))
        }
    }
}

/// Register a new host under a registration.
///
/// POST /v1/registrations/{name}/hosts
///
/// The new Host carries the registration's propagated labels/annotations
/// (request-supplied entries win) and the reset finalizer guard. Returns 409
/// when the name is already taken.
async fn create_host(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<CreateHostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.is_empty() {
        return Err(ApiError::bad_request(
            "invalid_host_name",
            "Host name cannot be empty",
        ));
    }

    let registration = state
        .registrations()
        .get(state.namespace(), &name)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(
                "registration_not_found",
                format!("Registration {name} not found"),
            )
        })?;

    let mut meta = ObjectMeta::new(state.namespace(), &req.name);
    meta.labels = registration.host_labels.clone();
    meta.labels.extend(req.labels);
    meta.annotations = registration.host_annotations.clone();
    meta.annotations.extend(req.annotations);
    meta.add_finalizer(RESET_GUARD);

    let mut host = Host::new(meta, req.public_key);
    host.phase = Some(HostPhase::Registering);

    let host = state.hosts().create(host).await.map_err(|e| {
        if matches!(e, crate::store::StoreError::AlreadyExists { .. }) {
            ApiError::conflict(
                "host_name_taken",
                format!("Host {} already registered", req.name),
            )
        } else {
            e.into()
        }
    })?;

    info!(registration = %name, host = %host.meta.name, "Host registered");
    Ok((StatusCode::CREATED, Json(host)))
}

/// Apply a partial update to a host. Returns the full updated Host.
///
/// PATCH /v1/registrations/{name}/hosts/{host}
async fn patch_host(
    State(state): State<AppState>,
    Path((_name, host_name)): Path<(String, String)>,
    Json(patch): Json<HostPatch>,
) -> Result<Json<Host>, ApiError> {
    let mut host = state
        .hosts()
        .get(state.namespace(), &host_name)
        .await?
        .ok_or_else(|| {
            ApiError::not_found("host_not_found", format!("Host {host_name} not found"))
        })?;

    if patch.bootstrapped == Some(true) && host.bootstrap_secret_ref.is_none() {
        return Err(ApiError::bad_request(
            ferrum_api::reason::MISSING_BOOTSTRAP_SECRET,
            "Host has no bootstrap payload assigned",
        ));
    }

    patch.apply(&mut host);
    let host = state.hosts().update(host).await?;
    Ok(Json(host))
}

/// Fetch the bootstrap payload assigned to a host.
///
/// GET /v1/registrations/{name}/hosts/{host}/bootstrap
async fn get_bootstrap(
    State(state): State<AppState>,
    Path((_name, host_name)): Path<(String, String)>,
) -> Result<Json<BootstrapPayload>, ApiError> {
    let host = state
        .hosts()
        .get(state.namespace(), &host_name)
        .await?
        .ok_or_else(|| {
            ApiError::not_found("host_not_found", format!("Host {host_name} not found"))
        })?;

    let secret_ref = host.bootstrap_secret_ref.as_ref().ok_or_else(|| {
        ApiError::not_found(
            ferrum_api::reason::MISSING_BOOTSTRAP_SECRET,
            format!("Host {host_name} has no bootstrap payload assigned"),
        )
    })?;

    let payload = state
        .get_bootstrap_secret(&secret_ref.name)
        .await
        .ok_or_else(|| {
            ApiError::not_found(
                "bootstrap_secret_not_found",
                format!("Bootstrap payload {} not found", secret_ref.name),
            )
        })?;

    Ok(Json(payload))
}

/// Mark a host for deletion. The record survives until its finalizers clear.
///
/// DELETE /v1/registrations/{name}/hosts/{host}
async fn delete_host(
    State(state): State<AppState>,
    Path((_name, host_name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.hosts().mark_deleted(state.namespace(), &host_name).await?;
    info!(host = %host_name, "Host marked for deletion");
    Ok(StatusCode::NO_CONTENT)
}
