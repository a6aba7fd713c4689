//! Session lifecycle endpoints.
//!
//! Starting a session returns a handle immediately; callers observe
//! outcomes by polling status and messages, never via an exception from
//! the start call. "Paused on rate/budget" stays distinguishable from
//! "failed" so clients can offer retry-later versus start-fallback.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::{FallbackRecord, Message, Session};
use crate::scheduler::StartSessionRequest;

use super::types::{CreateSessionRequest, FallbackRequest, SessionHandle};
use super::{error_response, owner_from, store_error, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_sessions).post(create_session))
        .route("/:id", get(get_session))
        .route("/:id/messages", get(list_messages))
        .route("/:id/pause", post(pause_session))
        .route("/:id/resume", post(resume_session))
        .route("/:id/stop", post(stop_session))
        .route("/:id/fallback", post(run_fallback))
        .route("/:id/events", get(session_events))
}

/// Fetch a session and enforce ownership.
async fn owned_session(
    state: &AppState,
    id: Uuid,
    owner: &str,
) -> Result<Session, (StatusCode, String)> {
    state
        .store
        .get_session(id)
        .await
        .map_err(store_error)?
        .filter(|s| s.owner == owner)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Session {} not found", id)))
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Session>>, (StatusCode, String)> {
    state
        .store
        .list_sessions(&owner_from(&headers))
        .await
        .map(Json)
        .map_err(store_error)
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<SessionHandle>, (StatusCode, String)> {
    let session = state
        .scheduler
        .start(StartSessionRequest {
            team_id: req.team_id,
            project_id: req.project_id,
            owner: owner_from(&headers),
            prompt: req.prompt,
            max_iterations: req
                .max_iterations
                .unwrap_or(state.config.default_max_iterations),
        })
        .await
        .map_err(error_response)?;
    state.scheduler.spawn(session.id);
    Ok(Json(SessionHandle {
        id: session.id,
        status: session.status,
    }))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<Session>, (StatusCode, String)> {
    owned_session(&state, id, &owner_from(&headers))
        .await
        .map(Json)
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<Vec<Message>>, (StatusCode, String)> {
    owned_session(&state, id, &owner_from(&headers)).await?;
    state
        .store
        .list_messages(id)
        .await
        .map(Json)
        .map_err(store_error)
}

async fn pause_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<Session>, (StatusCode, String)> {
    owned_session(&state, id, &owner_from(&headers)).await?;
    state.scheduler.pause(id).await.map(Json).map_err(error_response)
}

async fn resume_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<Session>, (StatusCode, String)> {
    owned_session(&state, id, &owner_from(&headers)).await?;
    state
        .scheduler
        .resume(id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn stop_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<Session>, (StatusCode, String)> {
    owned_session(&state, id, &owner_from(&headers)).await?;
    state.scheduler.stop(id).await.map(Json).map_err(error_response)
}

async fn run_fallback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Json(req): Json<FallbackRequest>,
) -> Result<Json<FallbackRecord>, (StatusCode, String)> {
    owned_session(&state, id, &owner_from(&headers)).await?;
    state
        .fallback
        .run(id, req.provider, req.model)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Server-sent progress events for one session.
async fn session_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    owned_session(&state, id, &owner_from(&headers)).await?;
    let rx = state.progress.subscribe();

    let stream = futures::stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.session_id == id => {
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    return Some((Ok(Event::default().data(data)), rx));
                }
                Ok(_) => continue,
                // Slow consumers skip ahead instead of ending the stream.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(stream))
}
