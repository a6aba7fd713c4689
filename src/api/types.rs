//! API request and response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::Provider;
use crate::model::{AgentRole, TriggerKind};
use crate::roles::{ProjectRequirements, TriggerContext, WorkloadSnapshot};

// ==================== Teams ====================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
    pub project_id: Option<Uuid>,
    /// Budget limit in cents (default: 1000 = $10)
    pub budget_limit_cents: Option<u64>,
    /// Make this the owner's active team
    #[serde(default)]
    pub activate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTeamRequest {
    pub name: Option<String>,
    pub project_id: Option<Uuid>,
    pub budget_limit_cents: Option<u64>,
}

// ==================== Agents ====================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub role: AgentRole,
    pub provider: Provider,
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    pub execution_order: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub adaptive: bool,
    #[serde(default)]
    pub allowed_roles: Vec<AgentRole>,
    pub persona_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAgentRequest {
    pub name: Option<String>,
    pub role: Option<AgentRole>,
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub execution_order: Option<u32>,
    pub enabled: Option<bool>,
    pub adaptive: Option<bool>,
    pub allowed_roles: Option<Vec<AgentRole>>,
    pub persona_id: Option<Uuid>,
}

// ==================== Personas ====================

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePersonaRequest {
    pub name: String,
    pub prompt_template: String,
    pub suggested_role: Option<AgentRole>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub shared: bool,
}

// ==================== Role rules ====================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRuleRequest {
    pub trigger: TriggerKind,
    pub from_role: AgentRole,
    /// `metric > number` or `metric == "literal"`
    pub condition: String,
    pub to_role: AgentRole,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignRolesRequest {
    pub requirements: ProjectRequirements,
    pub workload: WorkloadSnapshot,
    #[serde(default)]
    pub context: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerRolesRequest {
    pub trigger: TriggerKind,
    #[serde(default)]
    pub context: TriggerContext,
}

// ==================== Sessions ====================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub team_id: Uuid,
    pub project_id: Option<Uuid>,
    pub prompt: String,
    pub max_iterations: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FallbackRequest {
    pub provider: Provider,
    pub model: Option<String>,
}

/// Session handle returned from session creation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionHandle {
    pub id: Uuid,
    pub status: crate::model::SessionStatus,
}

fn default_true() -> bool {
    true
}
