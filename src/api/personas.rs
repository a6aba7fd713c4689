//! Persona endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::model::{now_string, Persona};

use super::types::CreatePersonaRequest;
use super::{owner_from, store_error, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_personas).post(create_persona))
        .route("/:id", get(get_persona).delete(delete_persona))
}

async fn list_personas(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Persona>>, (StatusCode, String)> {
    state
        .store
        .list_personas(&owner_from(&headers))
        .await
        .map(Json)
        .map_err(store_error)
}

async fn create_persona(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreatePersonaRequest>,
) -> Result<Json<Persona>, (StatusCode, String)> {
    if req.name.trim().is_empty() || req.prompt_template.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Name and prompt template are required".to_string(),
        ));
    }
    let persona = Persona {
        id: Uuid::new_v4(),
        owner: owner_from(&headers),
        name: req.name,
        prompt_template: req.prompt_template,
        suggested_role: req.suggested_role,
        tags: req.tags,
        shared: req.shared,
        usage_count: 0,
        created_at: now_string(),
    };
    state
        .store
        .create_persona(&persona)
        .await
        .map_err(store_error)?;
    Ok(Json(persona))
}

async fn get_persona(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<Persona>, (StatusCode, String)> {
    let owner = owner_from(&headers);
    state
        .store
        .get_persona(id)
        .await
        .map_err(store_error)?
        .filter(|p| p.owner == owner || p.shared)
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Persona {} not found", id)))
}

async fn delete_persona(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let owner = owner_from(&headers);
    // Only the owner deletes; shared visibility does not grant that.
    state
        .store
        .get_persona(id)
        .await
        .map_err(store_error)?
        .filter(|p| p.owner == owner)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Persona {} not found", id)))?;
    state
        .store
        .delete_persona(id)
        .await
        .map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}
