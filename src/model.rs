//! Core data model: teams, agents, personas, sessions, messages, role rules.
//!
//! All money is tracked in cents as `u64` with saturating arithmetic.
//! Timestamps are RFC 3339 strings; ordering relies on them only within a
//! single session where they are produced monotonically by the scheduler.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::Provider;

/// Current UTC time as an RFC 3339 string.
pub fn now_string() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ==================== Roles ====================

/// Role an agent plays in the pipeline.
///
/// The base set is fixed; anything else round-trips as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentRole {
    Planner,
    Coder,
    Tester,
    Reviewer,
    Coordinator,
    Custom(String),
}

impl From<String> for AgentRole {
    fn from(s: String) -> Self {
        match s.as_str() {
            "planner" => Self::Planner,
            "coder" => Self::Coder,
            "tester" => Self::Tester,
            "reviewer" => Self::Reviewer,
            "coordinator" => Self::Coordinator,
            _ => Self::Custom(s),
        }
    }
}

impl From<AgentRole> for String {
    fn from(role: AgentRole) -> Self {
        role.as_str().to_string()
    }
}

impl AgentRole {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Planner => "planner",
            Self::Coder => "coder",
            Self::Tester => "tester",
            Self::Reviewer => "reviewer",
            Self::Coordinator => "coordinator",
            Self::Custom(s) => s,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==================== Team ====================

/// A budgeted, ordered set of agents belonging to a user.
///
/// # Invariants
/// - `budget_used_cents <= budget_limit_cents` is checked before new
///   cost-incurring work (advisory, not transactionally enforced).
/// - At most one team per owner has `is_active == true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    pub name: String,
    /// Single-active-per-owner flag
    #[serde(default)]
    pub is_active: bool,
    pub budget_limit_cents: u64,
    /// Monotonic spend ledger, incremented once per successful agent turn
    pub budget_used_cents: u64,
    pub created_at: String,
    pub updated_at: String,
}

impl Team {
    /// Remaining budget in cents.
    pub fn remaining_budget_cents(&self) -> u64 {
        self.budget_limit_cents.saturating_sub(self.budget_used_cents)
    }
}

// ==================== Agent ====================

/// A single role-bound LLM configuration at a fixed pipeline position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    /// Base role as configured
    pub role: AgentRole,
    /// Active role, possibly adapted between iterations
    pub current_role: AgentRole,
    pub provider: Provider,
    pub model: String,
    pub system_prompt: String,
    pub execution_order: u32,
    pub enabled: bool,
    /// Whether the role adaptation engine may reassign this agent
    #[serde(default)]
    pub adaptive: bool,
    /// Roles this agent may be adapted into; the sole hard constraint on
    /// role drift
    #[serde(default)]
    pub allowed_roles: Vec<AgentRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<Uuid>,
    pub created_at: String,
}

impl Agent {
    /// Check whether this agent is permitted to take on `role`.
    pub fn can_assume(&self, role: &AgentRole) -> bool {
        self.allowed_roles.contains(role)
    }
}

// ==================== Persona ====================

/// Reusable named system-prompt template, optionally shared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: Uuid,
    pub owner: String,
    pub name: String,
    pub prompt_template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_role: Option<AgentRole>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Visible to other owners when true
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub usage_count: u64,
    pub created_at: String,
}

// ==================== Session ====================

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Terminal states absorb all further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Legal transitions of the session state machine:
    /// `running → {paused, completed, failed}`, `paused → {running, completed}`.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        match self {
            Self::Running => matches!(
                next,
                Self::Paused | Self::Completed | Self::Failed
            ),
            Self::Paused => matches!(next, Self::Running | Self::Completed),
            Self::Completed | Self::Failed => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One bounded run of a team's pipeline against a specific prompt.
///
/// Created `running`; mutated solely by the scheduler each iteration.
/// The store is the source of truth; there is no in-process session map.
/// `version` is bumped on every store mutation so multiple orchestration
/// workers can safely serve the same session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub team_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    pub owner: String,
    pub initial_prompt: String,
    pub status: SessionStatus,
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub total_cost_cents: u64,
    #[serde(default)]
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
}

// ==================== Message ====================

/// Kind of message in the session log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Input,
    Output,
    Error,
    ToolCall,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
            Self::Error => write!(f, "error"),
            Self::ToolCall => write!(f, "tool_call"),
        }
    }
}

/// Append-only log entry per (session, agent, iteration).
///
/// Immutable once written; totally ordered within a session by
/// (iteration, execution_order, created_at). Forms the audit trail and the
/// context source for downstream agents and status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    pub iteration: u32,
    pub execution_order: u32,
    pub kind: MessageKind,
    pub content: String,
    pub cost_cents: u64,
    pub created_at: String,
}

// ==================== Role assignment ====================

/// What causes a rule-driven role reassignment to be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    TaskCompletion,
    ErrorThreshold,
    ComplexityIncrease,
    Manual,
    TimeBased,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TaskCompletion => write!(f, "task_completion"),
            Self::ErrorThreshold => write!(f, "error_threshold"),
            Self::ComplexityIncrease => write!(f, "complexity_increase"),
            Self::Manual => write!(f, "manual"),
            Self::TimeBased => write!(f, "time_based"),
        }
    }
}

/// Team-scoped mapping of trigger + source role + condition → target role.
///
/// The condition is a single comparison (`metric > number`,
/// `metric == "literal"`) evaluated against the trigger context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignmentRule {
    pub id: Uuid,
    pub team_id: Uuid,
    pub trigger: TriggerKind,
    pub from_role: AgentRole,
    pub condition: String,
    pub to_role: AgentRole,
    /// Higher priority rules are evaluated first
    pub priority: i32,
    pub enabled: bool,
    pub created_at: String,
}

/// Append-only record of every role change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignmentHistory {
    pub id: Uuid,
    pub team_id: Uuid,
    pub agent_id: Uuid,
    pub from_role: AgentRole,
    pub to_role: AgentRole,
    pub trigger: TriggerKind,
    pub context: String,
    pub created_at: String,
}

// ==================== Fallback ====================

/// The single-agent recovery response for a session (upserted, not appended).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackRecord {
    pub session_id: Uuid,
    pub provider: Provider,
    pub response: String,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        assert_eq!(AgentRole::from("coder".to_string()), AgentRole::Coder);
        assert_eq!(
            AgentRole::from("devops".to_string()),
            AgentRole::Custom("devops".to_string())
        );
        assert_eq!(String::from(AgentRole::Coordinator), "coordinator");
    }

    #[test]
    fn test_session_transitions() {
        use SessionStatus::*;
        assert!(Running.can_transition_to(Paused));
        assert!(Running.can_transition_to(Failed));
        assert!(Paused.can_transition_to(Running));
        assert!(Paused.can_transition_to(Completed));
        assert!(!Paused.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Running));
        assert!(Completed.is_terminal());
    }

    #[test]
    fn test_remaining_budget_saturates() {
        let team = Team {
            id: Uuid::new_v4(),
            owner: "user".into(),
            project_id: None,
            name: "t".into(),
            is_active: true,
            budget_limit_cents: 100,
            budget_used_cents: 150,
            created_at: now_string(),
            updated_at: now_string(),
        };
        assert_eq!(team.remaining_budget_cents(), 0);
    }
}
