//! Storage module with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database (production)
//!
//! The store is the source of truth for session state: there is no
//! in-process session map, and every session mutation bumps the session's
//! `version` counter so several orchestration workers can safely serve the
//! same records.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{
    Agent, AgentRole, FallbackRecord, Message, Persona, RoleAssignmentHistory,
    RoleAssignmentRule, Session, SessionStatus, Team, TriggerKind,
};

pub type SharedStore = Arc<dyn Store>;

/// Persistence contract for the orchestration core.
///
/// Ordering guarantees:
/// - `list_agents` returns agents in ascending `execution_order`.
/// - `list_messages` returns messages ordered by
///   (iteration, execution_order, created_at).
/// - `list_rules` returns rules in descending priority.
#[async_trait]
pub trait Store: Send + Sync {
    fn is_persistent(&self) -> bool;

    // ==================== Teams ====================

    async fn create_team(&self, team: &Team) -> Result<(), String>;
    async fn get_team(&self, id: Uuid) -> Result<Option<Team>, String>;
    async fn list_teams(&self, owner: &str) -> Result<Vec<Team>, String>;
    async fn update_team(&self, team: &Team) -> Result<(), String>;
    /// Deletes the team's agents and rules with it.
    async fn delete_team(&self, id: Uuid) -> Result<(), String>;
    /// Atomic ledger increment; safe under concurrent sessions.
    async fn add_team_cost(&self, id: Uuid, cost_cents: u64) -> Result<(), String>;
    /// Makes `id` the owner's single active team.
    async fn set_active_team(&self, owner: &str, id: Uuid) -> Result<(), String>;

    // ==================== Agents ====================

    async fn create_agent(&self, agent: &Agent) -> Result<(), String>;
    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, String>;
    async fn list_agents(&self, team_id: Uuid) -> Result<Vec<Agent>, String>;
    async fn update_agent(&self, agent: &Agent) -> Result<(), String>;
    async fn delete_agent(&self, id: Uuid) -> Result<(), String>;
    /// Updates only `current_role` (role adaptation path).
    async fn set_agent_role(&self, id: Uuid, role: &AgentRole) -> Result<(), String>;

    // ==================== Personas ====================

    async fn create_persona(&self, persona: &Persona) -> Result<(), String>;
    async fn get_persona(&self, id: Uuid) -> Result<Option<Persona>, String>;
    /// The owner's personas plus shared ones.
    async fn list_personas(&self, owner: &str) -> Result<Vec<Persona>, String>;
    async fn delete_persona(&self, id: Uuid) -> Result<(), String>;
    async fn increment_persona_usage(&self, id: Uuid) -> Result<(), String>;

    // ==================== Sessions ====================

    async fn create_session(&self, session: &Session) -> Result<(), String>;
    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, String>;
    async fn list_sessions(&self, owner: &str) -> Result<Vec<Session>, String>;
    /// Writes the loop-owned fields (current_iteration, total_cost_cents)
    /// and bumps the version counter; returns the new version. Status is
    /// deliberately NOT written here: a concurrent control signal must not
    /// be clobbered by the loop persisting its progress mid-iteration.
    async fn update_session(&self, session: &Session) -> Result<u64, String>;
    /// Status-only write (control signals); bumps the version counter.
    async fn set_session_status(&self, id: Uuid, status: SessionStatus) -> Result<(), String>;

    // ==================== Messages ====================

    async fn append_message(&self, message: &Message) -> Result<(), String>;
    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<Message>, String>;

    // ==================== Role rules & history ====================

    async fn create_rule(&self, rule: &RoleAssignmentRule) -> Result<(), String>;
    async fn list_rules(
        &self,
        team_id: Uuid,
        trigger: Option<TriggerKind>,
    ) -> Result<Vec<RoleAssignmentRule>, String>;
    async fn delete_rule(&self, id: Uuid) -> Result<(), String>;
    async fn append_role_history(&self, entry: &RoleAssignmentHistory) -> Result<(), String>;
    async fn list_role_history(&self, team_id: Uuid)
        -> Result<Vec<RoleAssignmentHistory>, String>;

    // ==================== Fallback ====================

    /// One record per session; reruns overwrite.
    async fn upsert_fallback(&self, record: &FallbackRecord) -> Result<(), String>;
    async fn get_fallback(&self, session_id: Uuid) -> Result<Option<FallbackRecord>, String>;
}
