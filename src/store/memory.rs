//! In-memory store backend (non-persistent, for testing).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{
    now_string, Agent, AgentRole, FallbackRecord, Message, Persona, RoleAssignmentHistory,
    RoleAssignmentRule, Session, SessionStatus, Team, TriggerKind,
};

use super::Store;

#[derive(Default)]
struct Inner {
    teams: HashMap<Uuid, Team>,
    agents: HashMap<Uuid, Agent>,
    personas: HashMap<Uuid, Persona>,
    sessions: HashMap<Uuid, Session>,
    messages: Vec<Message>,
    rules: HashMap<Uuid, RoleAssignmentRule>,
    history: Vec<RoleAssignmentHistory>,
    fallbacks: HashMap<Uuid, FallbackRecord>,
}

/// In-memory backend. Mirrors the sqlite backend's ordering guarantees so
/// tests exercise the same contract production runs against.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn is_persistent(&self) -> bool {
        false
    }

    // ==================== Teams ====================

    async fn create_team(&self, team: &Team) -> Result<(), String> {
        self.inner.write().await.teams.insert(team.id, team.clone());
        Ok(())
    }

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>, String> {
        Ok(self.inner.read().await.teams.get(&id).cloned())
    }

    async fn list_teams(&self, owner: &str) -> Result<Vec<Team>, String> {
        let inner = self.inner.read().await;
        let mut teams: Vec<Team> = inner
            .teams
            .values()
            .filter(|t| t.owner == owner)
            .cloned()
            .collect();
        teams.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(teams)
    }

    async fn update_team(&self, team: &Team) -> Result<(), String> {
        let mut inner = self.inner.write().await;
        match inner.teams.get_mut(&team.id) {
            Some(existing) => {
                *existing = team.clone();
                existing.updated_at = now_string();
                Ok(())
            }
            None => Err(format!("team {} not found", team.id)),
        }
    }

    async fn delete_team(&self, id: Uuid) -> Result<(), String> {
        let mut inner = self.inner.write().await;
        inner.teams.remove(&id);
        inner.agents.retain(|_, a| a.team_id != id);
        inner.rules.retain(|_, r| r.team_id != id);
        Ok(())
    }

    async fn add_team_cost(&self, id: Uuid, cost_cents: u64) -> Result<(), String> {
        let mut inner = self.inner.write().await;
        let team = inner
            .teams
            .get_mut(&id)
            .ok_or_else(|| format!("team {} not found", id))?;
        team.budget_used_cents = team.budget_used_cents.saturating_add(cost_cents);
        team.updated_at = now_string();
        Ok(())
    }

    async fn set_active_team(&self, owner: &str, id: Uuid) -> Result<(), String> {
        let mut inner = self.inner.write().await;
        if !inner.teams.contains_key(&id) {
            return Err(format!("team {} not found", id));
        }
        for team in inner.teams.values_mut() {
            if team.owner == owner {
                team.is_active = team.id == id;
            }
        }
        Ok(())
    }

    // ==================== Agents ====================

    async fn create_agent(&self, agent: &Agent) -> Result<(), String> {
        self.inner
            .write()
            .await
            .agents
            .insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, String> {
        Ok(self.inner.read().await.agents.get(&id).cloned())
    }

    async fn list_agents(&self, team_id: Uuid) -> Result<Vec<Agent>, String> {
        let inner = self.inner.read().await;
        let mut agents: Vec<Agent> = inner
            .agents
            .values()
            .filter(|a| a.team_id == team_id)
            .cloned()
            .collect();
        agents.sort_by_key(|a| a.execution_order);
        Ok(agents)
    }

    async fn update_agent(&self, agent: &Agent) -> Result<(), String> {
        let mut inner = self.inner.write().await;
        match inner.agents.get_mut(&agent.id) {
            Some(existing) => {
                *existing = agent.clone();
                Ok(())
            }
            None => Err(format!("agent {} not found", agent.id)),
        }
    }

    async fn delete_agent(&self, id: Uuid) -> Result<(), String> {
        self.inner.write().await.agents.remove(&id);
        Ok(())
    }

    async fn set_agent_role(&self, id: Uuid, role: &AgentRole) -> Result<(), String> {
        let mut inner = self.inner.write().await;
        let agent = inner
            .agents
            .get_mut(&id)
            .ok_or_else(|| format!("agent {} not found", id))?;
        agent.current_role = role.clone();
        Ok(())
    }

    // ==================== Personas ====================

    async fn create_persona(&self, persona: &Persona) -> Result<(), String> {
        self.inner
            .write()
            .await
            .personas
            .insert(persona.id, persona.clone());
        Ok(())
    }

    async fn get_persona(&self, id: Uuid) -> Result<Option<Persona>, String> {
        Ok(self.inner.read().await.personas.get(&id).cloned())
    }

    async fn list_personas(&self, owner: &str) -> Result<Vec<Persona>, String> {
        let inner = self.inner.read().await;
        let mut personas: Vec<Persona> = inner
            .personas
            .values()
            .filter(|p| p.owner == owner || p.shared)
            .cloned()
            .collect();
        personas.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(personas)
    }

    async fn delete_persona(&self, id: Uuid) -> Result<(), String> {
        self.inner.write().await.personas.remove(&id);
        Ok(())
    }

    async fn increment_persona_usage(&self, id: Uuid) -> Result<(), String> {
        let mut inner = self.inner.write().await;
        if let Some(persona) = inner.personas.get_mut(&id) {
            persona.usage_count = persona.usage_count.saturating_add(1);
        }
        Ok(())
    }

    // ==================== Sessions ====================

    async fn create_session(&self, session: &Session) -> Result<(), String> {
        self.inner
            .write()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, String> {
        Ok(self.inner.read().await.sessions.get(&id).cloned())
    }

    async fn list_sessions(&self, owner: &str) -> Result<Vec<Session>, String> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn update_session(&self, session: &Session) -> Result<u64, String> {
        let mut inner = self.inner.write().await;
        let existing = inner
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| format!("session {} not found", session.id))?;
        // Status is owned by set_session_status; a control signal written
        // there must survive the loop persisting its progress.
        existing.current_iteration = session.current_iteration;
        existing.total_cost_cents = session.total_cost_cents;
        existing.version += 1;
        existing.updated_at = now_string();
        Ok(existing.version)
    }

    async fn set_session_status(&self, id: Uuid, status: SessionStatus) -> Result<(), String> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| format!("session {} not found", id))?;
        session.status = status;
        session.version += 1;
        session.updated_at = now_string();
        Ok(())
    }

    // ==================== Messages ====================

    async fn append_message(&self, message: &Message) -> Result<(), String> {
        self.inner.write().await.messages.push(message.clone());
        Ok(())
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<Message>, String> {
        let inner = self.inner.read().await;
        let mut messages: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| {
            (a.iteration, a.execution_order, &a.created_at)
                .cmp(&(b.iteration, b.execution_order, &b.created_at))
        });
        Ok(messages)
    }

    // ==================== Role rules & history ====================

    async fn create_rule(&self, rule: &RoleAssignmentRule) -> Result<(), String> {
        self.inner.write().await.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn list_rules(
        &self,
        team_id: Uuid,
        trigger: Option<TriggerKind>,
    ) -> Result<Vec<RoleAssignmentRule>, String> {
        let inner = self.inner.read().await;
        let mut rules: Vec<RoleAssignmentRule> = inner
            .rules
            .values()
            .filter(|r| r.team_id == team_id && trigger.map_or(true, |t| r.trigger == t))
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(rules)
    }

    async fn delete_rule(&self, id: Uuid) -> Result<(), String> {
        self.inner.write().await.rules.remove(&id);
        Ok(())
    }

    async fn append_role_history(&self, entry: &RoleAssignmentHistory) -> Result<(), String> {
        self.inner.write().await.history.push(entry.clone());
        Ok(())
    }

    async fn list_role_history(
        &self,
        team_id: Uuid,
    ) -> Result<Vec<RoleAssignmentHistory>, String> {
        Ok(self
            .inner
            .read()
            .await
            .history
            .iter()
            .filter(|h| h.team_id == team_id)
            .cloned()
            .collect())
    }

    // ==================== Fallback ====================

    async fn upsert_fallback(&self, record: &FallbackRecord) -> Result<(), String> {
        let mut inner = self.inner.write().await;
        let mut record = record.clone();
        if let Some(existing) = inner.fallbacks.get(&record.session_id) {
            record.created_at = existing.created_at.clone();
        }
        record.updated_at = now_string();
        inner.fallbacks.insert(record.session_id, record);
        Ok(())
    }

    async fn get_fallback(&self, session_id: Uuid) -> Result<Option<FallbackRecord>, String> {
        Ok(self.inner.read().await.fallbacks.get(&session_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;

    fn team(owner: &str) -> Team {
        Team {
            id: Uuid::new_v4(),
            owner: owner.into(),
            project_id: None,
            name: "team".into(),
            is_active: false,
            budget_limit_cents: 1_000,
            budget_used_cents: 0,
            created_at: now_string(),
            updated_at: now_string(),
        }
    }

    fn agent(team_id: Uuid, order: u32) -> Agent {
        Agent {
            id: Uuid::new_v4(),
            team_id,
            name: format!("agent-{}", order),
            role: AgentRole::Coder,
            current_role: AgentRole::Coder,
            provider: Provider::OpenAi,
            model: "gpt-test".into(),
            system_prompt: String::new(),
            execution_order: order,
            enabled: true,
            adaptive: false,
            allowed_roles: vec![],
            persona_id: None,
            created_at: now_string(),
        }
    }

    #[tokio::test]
    async fn test_agents_ordered_by_execution_order() {
        let store = InMemoryStore::new();
        let t = team("u");
        store.create_team(&t).await.unwrap();
        for order in [3, 1, 2] {
            store.create_agent(&agent(t.id, order)).await.unwrap();
        }
        let agents = store.list_agents(t.id).await.unwrap();
        let orders: Vec<u32> = agents.iter().map(|a| a.execution_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_single_active_team_per_owner() {
        let store = InMemoryStore::new();
        let a = team("u");
        let b = team("u");
        store.create_team(&a).await.unwrap();
        store.create_team(&b).await.unwrap();
        store.set_active_team("u", a.id).await.unwrap();
        store.set_active_team("u", b.id).await.unwrap();
        let active: Vec<Uuid> = store
            .list_teams("u")
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.is_active)
            .map(|t| t.id)
            .collect();
        assert_eq!(active, vec![b.id]);
    }

    #[tokio::test]
    async fn test_update_session_bumps_version() {
        let store = InMemoryStore::new();
        let t = team("u");
        store.create_team(&t).await.unwrap();
        let session = Session {
            id: Uuid::new_v4(),
            team_id: t.id,
            project_id: None,
            owner: "u".into(),
            initial_prompt: "p".into(),
            status: SessionStatus::Running,
            current_iteration: 0,
            max_iterations: 3,
            total_cost_cents: 0,
            version: 0,
            created_at: now_string(),
            updated_at: now_string(),
        };
        store.create_session(&session).await.unwrap();
        let v1 = store.update_session(&session).await.unwrap();
        let v2 = store.update_session(&session).await.unwrap();
        assert_eq!((v1, v2), (1, 2));
        assert_eq!(store.get_session(session.id).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_team_delete_cascades() {
        let store = InMemoryStore::new();
        let t = team("u");
        store.create_team(&t).await.unwrap();
        let a = agent(t.id, 1);
        store.create_agent(&a).await.unwrap();
        store.delete_team(t.id).await.unwrap();
        assert!(store.get_agent(a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fallback_upsert_overwrites() {
        let store = InMemoryStore::new();
        let session_id = Uuid::new_v4();
        let record = FallbackRecord {
            session_id,
            provider: Provider::OpenAi,
            response: "first".into(),
            created_at: now_string(),
            updated_at: now_string(),
        };
        store.upsert_fallback(&record).await.unwrap();
        let mut second = record.clone();
        second.response = "second".into();
        store.upsert_fallback(&second).await.unwrap();
        let got = store.get_fallback(session_id).await.unwrap().unwrap();
        assert_eq!(got.response, "second");
        assert_eq!(got.created_at, record.created_at);
    }
}
