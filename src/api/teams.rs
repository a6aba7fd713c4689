//! Team, agent, rule, and role-adaptation endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::model::{
    now_string, Agent, RoleAssignmentHistory, RoleAssignmentRule, Team,
};
use crate::roles::{parse_condition, RoleChange};

use super::types::*;
use super::{error_response, owner_from, store_error, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_teams).post(create_team))
        .route("/:id", get(get_team).put(update_team).delete(delete_team))
        .route("/:id/activate", post(activate_team))
        .route("/:id/agents", get(list_agents).post(create_agent))
        .route(
            "/:id/agents/:agent_id",
            put(update_agent).delete(delete_agent),
        )
        .route("/:id/rules", get(list_rules).post(create_rule))
        .route("/:id/rules/:rule_id", delete(delete_rule))
        .route("/:id/roles/assign", post(assign_roles))
        .route("/:id/roles/trigger", post(trigger_roles))
        .route("/:id/roles/history", get(role_history))
}

/// Fetch a team and enforce ownership. Foreign teams read as missing.
async fn owned_team(
    state: &AppState,
    id: Uuid,
    owner: &str,
) -> Result<Team, (StatusCode, String)> {
    state
        .store
        .get_team(id)
        .await
        .map_err(store_error)?
        .filter(|t| t.owner == owner)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Team {} not found", id)))
}

async fn list_teams(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Team>>, (StatusCode, String)> {
    let owner = owner_from(&headers);
    state
        .store
        .list_teams(&owner)
        .await
        .map(Json)
        .map_err(store_error)
}

async fn create_team(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateTeamRequest>,
) -> Result<Json<Team>, (StatusCode, String)> {
    if req.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Name cannot be empty".to_string()));
    }
    let owner = owner_from(&headers);
    let team = Team {
        id: Uuid::new_v4(),
        owner: owner.clone(),
        project_id: req.project_id,
        name: req.name,
        is_active: false,
        budget_limit_cents: req.budget_limit_cents.unwrap_or(1_000),
        budget_used_cents: 0,
        created_at: now_string(),
        updated_at: now_string(),
    };
    state.store.create_team(&team).await.map_err(store_error)?;
    if req.activate {
        state
            .store
            .set_active_team(&owner, team.id)
            .await
            .map_err(store_error)?;
    }
    Ok(Json(team))
}

async fn get_team(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<Team>, (StatusCode, String)> {
    owned_team(&state, id, &owner_from(&headers)).await.map(Json)
}

async fn update_team(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Json(req): Json<UpdateTeamRequest>,
) -> Result<Json<Team>, (StatusCode, String)> {
    let mut team = owned_team(&state, id, &owner_from(&headers)).await?;
    if let Some(name) = req.name {
        team.name = name;
    }
    if let Some(project_id) = req.project_id {
        team.project_id = Some(project_id);
    }
    if let Some(limit) = req.budget_limit_cents {
        team.budget_limit_cents = limit;
    }
    state.store.update_team(&team).await.map_err(store_error)?;
    Ok(Json(team))
}

async fn delete_team(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    owned_team(&state, id, &owner_from(&headers)).await?;
    state.store.delete_team(id).await.map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_team(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<Team>, (StatusCode, String)> {
    let owner = owner_from(&headers);
    owned_team(&state, id, &owner).await?;
    state
        .store
        .set_active_team(&owner, id)
        .await
        .map_err(store_error)?;
    owned_team(&state, id, &owner).await.map(Json)
}

// ==================== Agents ====================

async fn list_agents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<Vec<Agent>>, (StatusCode, String)> {
    owned_team(&state, id, &owner_from(&headers)).await?;
    state
        .store
        .list_agents(id)
        .await
        .map(Json)
        .map_err(store_error)
}

async fn create_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Json(req): Json<CreateAgentRequest>,
) -> Result<Json<Agent>, (StatusCode, String)> {
    owned_team(&state, id, &owner_from(&headers)).await?;
    if req.name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Name cannot be empty".to_string()));
    }
    let agent = Agent {
        id: Uuid::new_v4(),
        team_id: id,
        name: req.name,
        role: req.role.clone(),
        current_role: req.role,
        provider: req.provider,
        model: req.model,
        system_prompt: req.system_prompt,
        execution_order: req.execution_order,
        enabled: req.enabled,
        adaptive: req.adaptive,
        allowed_roles: req.allowed_roles,
        persona_id: req.persona_id,
        created_at: now_string(),
    };
    state.store.create_agent(&agent).await.map_err(store_error)?;
    Ok(Json(agent))
}

async fn update_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath((id, agent_id)): AxumPath<(Uuid, Uuid)>,
    Json(req): Json<UpdateAgentRequest>,
) -> Result<Json<Agent>, (StatusCode, String)> {
    owned_team(&state, id, &owner_from(&headers)).await?;
    let mut agent = state
        .store
        .get_agent(agent_id)
        .await
        .map_err(store_error)?
        .filter(|a| a.team_id == id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Agent {} not found", agent_id)))?;

    if let Some(name) = req.name {
        agent.name = name;
    }
    if let Some(role) = req.role {
        // Changing the base role resets any adaptation.
        agent.role = role.clone();
        agent.current_role = role;
    }
    if let Some(provider) = req.provider {
        agent.provider = provider;
    }
    if let Some(model) = req.model {
        agent.model = model;
    }
    if let Some(system_prompt) = req.system_prompt {
        agent.system_prompt = system_prompt;
    }
    if let Some(order) = req.execution_order {
        agent.execution_order = order;
    }
    if let Some(enabled) = req.enabled {
        agent.enabled = enabled;
    }
    if let Some(adaptive) = req.adaptive {
        agent.adaptive = adaptive;
    }
    if let Some(allowed_roles) = req.allowed_roles {
        agent.allowed_roles = allowed_roles;
    }
    if let Some(persona_id) = req.persona_id {
        agent.persona_id = Some(persona_id);
    }
    state.store.update_agent(&agent).await.map_err(store_error)?;
    Ok(Json(agent))
}

async fn delete_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath((id, agent_id)): AxumPath<(Uuid, Uuid)>,
) -> Result<StatusCode, (StatusCode, String)> {
    owned_team(&state, id, &owner_from(&headers)).await?;
    state
        .store
        .delete_agent(agent_id)
        .await
        .map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ==================== Role rules ====================

async fn list_rules(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<Vec<RoleAssignmentRule>>, (StatusCode, String)> {
    owned_team(&state, id, &owner_from(&headers)).await?;
    state
        .store
        .list_rules(id, None)
        .await
        .map(Json)
        .map_err(store_error)
}

async fn create_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Json(req): Json<CreateRuleRequest>,
) -> Result<Json<RoleAssignmentRule>, (StatusCode, String)> {
    owned_team(&state, id, &owner_from(&headers)).await?;
    // Reject conditions the engine would skip at trigger time.
    if let Err(e) = parse_condition(&req.condition) {
        return Err((StatusCode::BAD_REQUEST, e));
    }
    let rule = RoleAssignmentRule {
        id: Uuid::new_v4(),
        team_id: id,
        trigger: req.trigger,
        from_role: req.from_role,
        condition: req.condition,
        to_role: req.to_role,
        priority: req.priority,
        enabled: req.enabled,
        created_at: now_string(),
    };
    state.store.create_rule(&rule).await.map_err(store_error)?;
    Ok(Json(rule))
}

async fn delete_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath((id, rule_id)): AxumPath<(Uuid, Uuid)>,
) -> Result<StatusCode, (StatusCode, String)> {
    owned_team(&state, id, &owner_from(&headers)).await?;
    state.store.delete_rule(rule_id).await.map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ==================== Role adaptation ====================

async fn assign_roles(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Json(req): Json<AssignRolesRequest>,
) -> Result<Json<Vec<RoleChange>>, (StatusCode, String)> {
    owned_team(&state, id, &owner_from(&headers)).await?;
    state
        .roles
        .assign(id, &req.requirements, req.workload, &req.context)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn trigger_roles(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
    Json(req): Json<TriggerRolesRequest>,
) -> Result<Json<Vec<RoleChange>>, (StatusCode, String)> {
    owned_team(&state, id, &owner_from(&headers)).await?;
    state
        .roles
        .trigger(id, req.trigger, &req.context)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn role_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<Uuid>,
) -> Result<Json<Vec<RoleAssignmentHistory>>, (StatusCode, String)> {
    owned_team(&state, id, &owner_from(&headers)).await?;
    state
        .store
        .list_role_history(id)
        .await
        .map(Json)
        .map_err(store_error)
}
