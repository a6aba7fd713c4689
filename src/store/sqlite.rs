//! SQLite store backend.
//!
//! One connection behind an async mutex; every query runs on the blocking
//! pool. List-valued columns (allowed roles, tags) are stored as JSON text.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::llm::Provider;
use crate::model::{
    now_string, Agent, AgentRole, FallbackRecord, Message, MessageKind, Persona,
    RoleAssignmentHistory, RoleAssignmentRule, Session, SessionStatus, Team, TriggerKind,
};

use super::Store;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS teams (
    id TEXT PRIMARY KEY NOT NULL,
    owner TEXT NOT NULL,
    project_id TEXT,
    name TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 0,
    budget_limit_cents INTEGER NOT NULL DEFAULT 0,
    budget_used_cents INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_teams_owner ON teams(owner);

CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY NOT NULL,
    team_id TEXT NOT NULL,
    name TEXT NOT NULL,
    role TEXT NOT NULL,
    current_role TEXT NOT NULL,
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    system_prompt TEXT NOT NULL DEFAULT '',
    execution_order INTEGER NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    adaptive INTEGER NOT NULL DEFAULT 0,
    allowed_roles TEXT NOT NULL DEFAULT '[]',
    persona_id TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (team_id) REFERENCES teams(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_agents_team_order ON agents(team_id, execution_order);

CREATE TABLE IF NOT EXISTS personas (
    id TEXT PRIMARY KEY NOT NULL,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    prompt_template TEXT NOT NULL,
    suggested_role TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    shared INTEGER NOT NULL DEFAULT 0,
    usage_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_personas_owner ON personas(owner);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY NOT NULL,
    team_id TEXT NOT NULL,
    project_id TEXT,
    owner TEXT NOT NULL,
    initial_prompt TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'running',
    current_iteration INTEGER NOT NULL DEFAULT 0,
    max_iterations INTEGER NOT NULL,
    total_cost_cents INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (team_id) REFERENCES teams(id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_owner_status ON sessions(owner, status);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY NOT NULL,
    session_id TEXT NOT NULL,
    agent_id TEXT,
    iteration INTEGER NOT NULL,
    execution_order INTEGER NOT NULL,
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    cost_cents INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_session
    ON messages(session_id, iteration, execution_order, created_at);

CREATE TABLE IF NOT EXISTS role_rules (
    id TEXT PRIMARY KEY NOT NULL,
    team_id TEXT NOT NULL,
    trigger_kind TEXT NOT NULL,
    from_role TEXT NOT NULL,
    condition TEXT NOT NULL,
    to_role TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    FOREIGN KEY (team_id) REFERENCES teams(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_rules_team_trigger ON role_rules(team_id, trigger_kind, priority DESC);

CREATE TABLE IF NOT EXISTS role_history (
    id TEXT PRIMARY KEY NOT NULL,
    team_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    from_role TEXT NOT NULL,
    to_role TEXT NOT NULL,
    trigger_kind TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_role_history_team ON role_history(team_id, created_at);

CREATE TABLE IF NOT EXISTS fallback_records (
    session_id TEXT PRIMARY KEY NOT NULL,
    provider TEXT NOT NULL,
    response TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);
"#;

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`.
    pub async fn new(db_path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create store dir: {}", e))?;
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| format!("Failed to open SQLite database: {}", e))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| format!("Failed to run schema: {}", e))?;
            Ok::<_, String>(conn)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, used by tests that need real SQL behavior.
    pub async fn open_in_memory() -> Result<Self, String> {
        let conn = tokio::task::spawn_blocking(|| {
            let conn = Connection::open_in_memory()
                .map_err(|e| format!("Failed to open in-memory database: {}", e))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| format!("Failed to run schema: {}", e))?;
            Ok::<_, String>(conn)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_team(row: &Row<'_>) -> rusqlite::Result<Team> {
        Ok(Team {
            id: parse_uuid(row.get::<_, String>(0)?),
            owner: row.get(1)?,
            project_id: row.get::<_, Option<String>>(2)?.map(parse_uuid),
            name: row.get(3)?,
            is_active: row.get::<_, i64>(4)? != 0,
            budget_limit_cents: row.get::<_, i64>(5)? as u64,
            budget_used_cents: row.get::<_, i64>(6)? as u64,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn row_to_agent(row: &Row<'_>) -> rusqlite::Result<Agent> {
        let allowed_json: String = row.get(11)?;
        let allowed: Vec<String> = serde_json::from_str(&allowed_json).unwrap_or_default();
        Ok(Agent {
            id: parse_uuid(row.get::<_, String>(0)?),
            team_id: parse_uuid(row.get::<_, String>(1)?),
            name: row.get(2)?,
            role: AgentRole::from(row.get::<_, String>(3)?),
            current_role: AgentRole::from(row.get::<_, String>(4)?),
            provider: Provider::from(row.get::<_, String>(5)?),
            model: row.get(6)?,
            system_prompt: row.get(7)?,
            execution_order: row.get::<_, i64>(8)? as u32,
            enabled: row.get::<_, i64>(9)? != 0,
            adaptive: row.get::<_, i64>(10)? != 0,
            allowed_roles: allowed.into_iter().map(AgentRole::from).collect(),
            persona_id: row.get::<_, Option<String>>(12)?.map(parse_uuid),
            created_at: row.get(13)?,
        })
    }

    fn row_to_persona(row: &Row<'_>) -> rusqlite::Result<Persona> {
        let tags_json: String = row.get(5)?;
        Ok(Persona {
            id: parse_uuid(row.get::<_, String>(0)?),
            owner: row.get(1)?,
            name: row.get(2)?,
            prompt_template: row.get(3)?,
            suggested_role: row.get::<_, Option<String>>(4)?.map(AgentRole::from),
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            shared: row.get::<_, i64>(6)? != 0,
            usage_count: row.get::<_, i64>(7)? as u64,
            created_at: row.get(8)?,
        })
    }

    fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
        Ok(Session {
            id: parse_uuid(row.get::<_, String>(0)?),
            team_id: parse_uuid(row.get::<_, String>(1)?),
            project_id: row.get::<_, Option<String>>(2)?.map(parse_uuid),
            owner: row.get(3)?,
            initial_prompt: row.get(4)?,
            status: parse_status(&row.get::<_, String>(5)?),
            current_iteration: row.get::<_, i64>(6)? as u32,
            max_iterations: row.get::<_, i64>(7)? as u32,
            total_cost_cents: row.get::<_, i64>(8)? as u64,
            version: row.get::<_, i64>(9)? as u64,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
        Ok(Message {
            id: parse_uuid(row.get::<_, String>(0)?),
            session_id: parse_uuid(row.get::<_, String>(1)?),
            agent_id: row.get::<_, Option<String>>(2)?.map(parse_uuid),
            iteration: row.get::<_, i64>(3)? as u32,
            execution_order: row.get::<_, i64>(4)? as u32,
            kind: parse_kind(&row.get::<_, String>(5)?),
            content: row.get(6)?,
            cost_cents: row.get::<_, i64>(7)? as u64,
            created_at: row.get(8)?,
        })
    }

    fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<RoleAssignmentRule> {
        Ok(RoleAssignmentRule {
            id: parse_uuid(row.get::<_, String>(0)?),
            team_id: parse_uuid(row.get::<_, String>(1)?),
            trigger: parse_trigger(&row.get::<_, String>(2)?),
            from_role: AgentRole::from(row.get::<_, String>(3)?),
            condition: row.get(4)?,
            to_role: AgentRole::from(row.get::<_, String>(5)?),
            priority: row.get::<_, i64>(6)? as i32,
            enabled: row.get::<_, i64>(7)? != 0,
            created_at: row.get(8)?,
        })
    }

    fn row_to_history(row: &Row<'_>) -> rusqlite::Result<RoleAssignmentHistory> {
        Ok(RoleAssignmentHistory {
            id: parse_uuid(row.get::<_, String>(0)?),
            team_id: parse_uuid(row.get::<_, String>(1)?),
            agent_id: parse_uuid(row.get::<_, String>(2)?),
            from_role: AgentRole::from(row.get::<_, String>(3)?),
            to_role: AgentRole::from(row.get::<_, String>(4)?),
            trigger: parse_trigger(&row.get::<_, String>(5)?),
            context: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_default()
}

fn parse_status(s: &str) -> SessionStatus {
    match s {
        "running" => SessionStatus::Running,
        "paused" => SessionStatus::Paused,
        "completed" => SessionStatus::Completed,
        _ => SessionStatus::Failed,
    }
}

fn parse_kind(s: &str) -> MessageKind {
    match s {
        "input" => MessageKind::Input,
        "output" => MessageKind::Output,
        "tool_call" => MessageKind::ToolCall,
        _ => MessageKind::Error,
    }
}

fn parse_trigger(s: &str) -> TriggerKind {
    match s {
        "task_completion" => TriggerKind::TaskCompletion,
        "error_threshold" => TriggerKind::ErrorThreshold,
        "complexity_increase" => TriggerKind::ComplexityIncrease,
        "time_based" => TriggerKind::TimeBased,
        _ => TriggerKind::Manual,
    }
}

fn roles_json(roles: &[AgentRole]) -> String {
    let strings: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
    serde_json::to_string(&strings).unwrap_or_else(|_| "[]".to_string())
}

#[async_trait]
impl Store for SqliteStore {
    fn is_persistent(&self) -> bool {
        true
    }

    // ==================== Teams ====================

    async fn create_team(&self, team: &Team) -> Result<(), String> {
        let conn = self.conn.clone();
        let team = team.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO teams (id, owner, project_id, name, is_active,
                                    budget_limit_cents, budget_used_cents, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    team.id.to_string(),
                    team.owner,
                    team.project_id.map(|p| p.to_string()),
                    team.name,
                    team.is_active as i64,
                    team.budget_limit_cents as i64,
                    team.budget_used_cents as i64,
                    team.created_at,
                    team.updated_at,
                ],
            )
            .map_err(|e| format!("Failed to insert team: {}", e))?;
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>, String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT id, owner, project_id, name, is_active,
                        budget_limit_cents, budget_used_cents, created_at, updated_at
                 FROM teams WHERE id = ?1",
                params![id.to_string()],
                Self::row_to_team,
            )
            .optional()
            .map_err(|e| format!("Failed to get team: {}", e))
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn list_teams(&self, owner: &str) -> Result<Vec<Team>, String> {
        let conn = self.conn.clone();
        let owner = owner.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(
                    "SELECT id, owner, project_id, name, is_active,
                            budget_limit_cents, budget_used_cents, created_at, updated_at
                     FROM teams WHERE owner = ?1 ORDER BY created_at",
                )
                .map_err(|e| format!("Failed to prepare: {}", e))?;
            let teams = stmt
                .query_map(params![owner], Self::row_to_team)
                .map_err(|e| format!("Failed to query teams: {}", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| format!("Failed to read team row: {}", e))?;
            Ok(teams)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn update_team(&self, team: &Team) -> Result<(), String> {
        let conn = self.conn.clone();
        let team = team.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let changed = conn
                .execute(
                    "UPDATE teams SET name = ?2, project_id = ?3, is_active = ?4,
                            budget_limit_cents = ?5, updated_at = ?6
                     WHERE id = ?1",
                    params![
                        team.id.to_string(),
                        team.name,
                        team.project_id.map(|p| p.to_string()),
                        team.is_active as i64,
                        team.budget_limit_cents as i64,
                        now_string(),
                    ],
                )
                .map_err(|e| format!("Failed to update team: {}", e))?;
            if changed == 0 {
                return Err(format!("team {} not found", team.id));
            }
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn delete_team(&self, id: Uuid) -> Result<(), String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute("DELETE FROM teams WHERE id = ?1", params![id.to_string()])
                .map_err(|e| format!("Failed to delete team: {}", e))?;
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn add_team_cost(&self, id: Uuid, cost_cents: u64) -> Result<(), String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let changed = conn
                .execute(
                    "UPDATE teams SET budget_used_cents = budget_used_cents + ?2, updated_at = ?3
                     WHERE id = ?1",
                    params![id.to_string(), cost_cents as i64, now_string()],
                )
                .map_err(|e| format!("Failed to add team cost: {}", e))?;
            if changed == 0 {
                return Err(format!("team {} not found", id));
            }
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn set_active_team(&self, owner: &str, id: Uuid) -> Result<(), String> {
        let conn = self.conn.clone();
        let owner = owner.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn
                .transaction()
                .map_err(|e| format!("Failed to begin transaction: {}", e))?;
            tx.execute(
                "UPDATE teams SET is_active = 0 WHERE owner = ?1",
                params![owner],
            )
            .map_err(|e| format!("Failed to clear active team: {}", e))?;
            let changed = tx
                .execute(
                    "UPDATE teams SET is_active = 1 WHERE id = ?1 AND owner = ?2",
                    params![id.to_string(), owner],
                )
                .map_err(|e| format!("Failed to set active team: {}", e))?;
            if changed == 0 {
                return Err(format!("team {} not found", id));
            }
            tx.commit()
                .map_err(|e| format!("Failed to commit: {}", e))?;
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    // ==================== Agents ====================

    async fn create_agent(&self, agent: &Agent) -> Result<(), String> {
        let conn = self.conn.clone();
        let agent = agent.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO agents (id, team_id, name, role, current_role, provider, model,
                                     system_prompt, execution_order, enabled, adaptive,
                                     allowed_roles, persona_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    agent.id.to_string(),
                    agent.team_id.to_string(),
                    agent.name,
                    agent.role.as_str(),
                    agent.current_role.as_str(),
                    agent.provider.as_str(),
                    agent.model,
                    agent.system_prompt,
                    agent.execution_order as i64,
                    agent.enabled as i64,
                    agent.adaptive as i64,
                    roles_json(&agent.allowed_roles),
                    agent.persona_id.map(|p| p.to_string()),
                    agent.created_at,
                ],
            )
            .map_err(|e| format!("Failed to insert agent: {}", e))?;
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT id, team_id, name, role, current_role, provider, model, system_prompt,
                        execution_order, enabled, adaptive, allowed_roles, persona_id, created_at
                 FROM agents WHERE id = ?1",
                params![id.to_string()],
                Self::row_to_agent,
            )
            .optional()
            .map_err(|e| format!("Failed to get agent: {}", e))
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn list_agents(&self, team_id: Uuid) -> Result<Vec<Agent>, String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(
                    "SELECT id, team_id, name, role, current_role, provider, model, system_prompt,
                            execution_order, enabled, adaptive, allowed_roles, persona_id, created_at
                     FROM agents WHERE team_id = ?1 ORDER BY execution_order",
                )
                .map_err(|e| format!("Failed to prepare: {}", e))?;
            let agents = stmt
                .query_map(params![team_id.to_string()], Self::row_to_agent)
                .map_err(|e| format!("Failed to query agents: {}", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| format!("Failed to read agent row: {}", e))?;
            Ok(agents)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn update_agent(&self, agent: &Agent) -> Result<(), String> {
        let conn = self.conn.clone();
        let agent = agent.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let changed = conn
                .execute(
                    "UPDATE agents SET name = ?2, role = ?3, current_role = ?4, provider = ?5,
                            model = ?6, system_prompt = ?7, execution_order = ?8, enabled = ?9,
                            adaptive = ?10, allowed_roles = ?11, persona_id = ?12
                     WHERE id = ?1",
                    params![
                        agent.id.to_string(),
                        agent.name,
                        agent.role.as_str(),
                        agent.current_role.as_str(),
                        agent.provider.as_str(),
                        agent.model,
                        agent.system_prompt,
                        agent.execution_order as i64,
                        agent.enabled as i64,
                        agent.adaptive as i64,
                        roles_json(&agent.allowed_roles),
                        agent.persona_id.map(|p| p.to_string()),
                    ],
                )
                .map_err(|e| format!("Failed to update agent: {}", e))?;
            if changed == 0 {
                return Err(format!("agent {} not found", agent.id));
            }
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn delete_agent(&self, id: Uuid) -> Result<(), String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute("DELETE FROM agents WHERE id = ?1", params![id.to_string()])
                .map_err(|e| format!("Failed to delete agent: {}", e))?;
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn set_agent_role(&self, id: Uuid, role: &AgentRole) -> Result<(), String> {
        let conn = self.conn.clone();
        let role = role.as_str().to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let changed = conn
                .execute(
                    "UPDATE agents SET current_role = ?2 WHERE id = ?1",
                    params![id.to_string(), role],
                )
                .map_err(|e| format!("Failed to set agent role: {}", e))?;
            if changed == 0 {
                return Err(format!("agent {} not found", id));
            }
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    // ==================== Personas ====================

    async fn create_persona(&self, persona: &Persona) -> Result<(), String> {
        let conn = self.conn.clone();
        let persona = persona.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO personas (id, owner, name, prompt_template, suggested_role,
                                       tags, shared, usage_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    persona.id.to_string(),
                    persona.owner,
                    persona.name,
                    persona.prompt_template,
                    persona.suggested_role.as_ref().map(|r| r.as_str().to_string()),
                    serde_json::to_string(&persona.tags).unwrap_or_else(|_| "[]".into()),
                    persona.shared as i64,
                    persona.usage_count as i64,
                    persona.created_at,
                ],
            )
            .map_err(|e| format!("Failed to insert persona: {}", e))?;
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn get_persona(&self, id: Uuid) -> Result<Option<Persona>, String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT id, owner, name, prompt_template, suggested_role, tags, shared,
                        usage_count, created_at
                 FROM personas WHERE id = ?1",
                params![id.to_string()],
                Self::row_to_persona,
            )
            .optional()
            .map_err(|e| format!("Failed to get persona: {}", e))
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn list_personas(&self, owner: &str) -> Result<Vec<Persona>, String> {
        let conn = self.conn.clone();
        let owner = owner.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(
                    "SELECT id, owner, name, prompt_template, suggested_role, tags, shared,
                            usage_count, created_at
                     FROM personas WHERE owner = ?1 OR shared = 1 ORDER BY created_at",
                )
                .map_err(|e| format!("Failed to prepare: {}", e))?;
            let personas = stmt
                .query_map(params![owner], Self::row_to_persona)
                .map_err(|e| format!("Failed to query personas: {}", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| format!("Failed to read persona row: {}", e))?;
            Ok(personas)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn delete_persona(&self, id: Uuid) -> Result<(), String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "DELETE FROM personas WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(|e| format!("Failed to delete persona: {}", e))?;
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn increment_persona_usage(&self, id: Uuid) -> Result<(), String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "UPDATE personas SET usage_count = usage_count + 1 WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(|e| format!("Failed to increment persona usage: {}", e))?;
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    // ==================== Sessions ====================

    async fn create_session(&self, session: &Session) -> Result<(), String> {
        let conn = self.conn.clone();
        let session = session.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO sessions (id, team_id, project_id, owner, initial_prompt, status,
                                       current_iteration, max_iterations, total_cost_cents,
                                       version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    session.id.to_string(),
                    session.team_id.to_string(),
                    session.project_id.map(|p| p.to_string()),
                    session.owner,
                    session.initial_prompt,
                    session.status.to_string(),
                    session.current_iteration as i64,
                    session.max_iterations as i64,
                    session.total_cost_cents as i64,
                    session.version as i64,
                    session.created_at,
                    session.updated_at,
                ],
            )
            .map_err(|e| format!("Failed to insert session: {}", e))?;
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT id, team_id, project_id, owner, initial_prompt, status,
                        current_iteration, max_iterations, total_cost_cents, version,
                        created_at, updated_at
                 FROM sessions WHERE id = ?1",
                params![id.to_string()],
                Self::row_to_session,
            )
            .optional()
            .map_err(|e| format!("Failed to get session: {}", e))
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn list_sessions(&self, owner: &str) -> Result<Vec<Session>, String> {
        let conn = self.conn.clone();
        let owner = owner.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(
                    "SELECT id, team_id, project_id, owner, initial_prompt, status,
                            current_iteration, max_iterations, total_cost_cents, version,
                            created_at, updated_at
                     FROM sessions WHERE owner = ?1 ORDER BY created_at DESC",
                )
                .map_err(|e| format!("Failed to prepare: {}", e))?;
            let sessions = stmt
                .query_map(params![owner], Self::row_to_session)
                .map_err(|e| format!("Failed to query sessions: {}", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| format!("Failed to read session row: {}", e))?;
            Ok(sessions)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn update_session(&self, session: &Session) -> Result<u64, String> {
        let conn = self.conn.clone();
        let session = session.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let changed = conn
                .execute(
                    "UPDATE sessions SET current_iteration = ?2, total_cost_cents = ?3,
                            version = version + 1, updated_at = ?4
                     WHERE id = ?1",
                    params![
                        session.id.to_string(),
                        session.current_iteration as i64,
                        session.total_cost_cents as i64,
                        now_string(),
                    ],
                )
                .map_err(|e| format!("Failed to update session: {}", e))?;
            if changed == 0 {
                return Err(format!("session {} not found", session.id));
            }
            let version: i64 = conn
                .query_row(
                    "SELECT version FROM sessions WHERE id = ?1",
                    params![session.id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| format!("Failed to read session version: {}", e))?;
            Ok(version as u64)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn set_session_status(&self, id: Uuid, status: SessionStatus) -> Result<(), String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let changed = conn
                .execute(
                    "UPDATE sessions SET status = ?2, version = version + 1, updated_at = ?3
                     WHERE id = ?1",
                    params![id.to_string(), status.to_string(), now_string()],
                )
                .map_err(|e| format!("Failed to set session status: {}", e))?;
            if changed == 0 {
                return Err(format!("session {} not found", id));
            }
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    // ==================== Messages ====================

    async fn append_message(&self, message: &Message) -> Result<(), String> {
        let conn = self.conn.clone();
        let message = message.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO messages (id, session_id, agent_id, iteration, execution_order,
                                       kind, content, cost_cents, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    message.id.to_string(),
                    message.session_id.to_string(),
                    message.agent_id.map(|a| a.to_string()),
                    message.iteration as i64,
                    message.execution_order as i64,
                    message.kind.to_string(),
                    message.content,
                    message.cost_cents as i64,
                    message.created_at,
                ],
            )
            .map_err(|e| format!("Failed to insert message: {}", e))?;
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<Message>, String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(
                    "SELECT id, session_id, agent_id, iteration, execution_order, kind,
                            content, cost_cents, created_at
                     FROM messages WHERE session_id = ?1
                     ORDER BY iteration, execution_order, created_at",
                )
                .map_err(|e| format!("Failed to prepare: {}", e))?;
            let messages = stmt
                .query_map(params![session_id.to_string()], Self::row_to_message)
                .map_err(|e| format!("Failed to query messages: {}", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| format!("Failed to read message row: {}", e))?;
            Ok(messages)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    // ==================== Role rules & history ====================

    async fn create_rule(&self, rule: &RoleAssignmentRule) -> Result<(), String> {
        let conn = self.conn.clone();
        let rule = rule.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO role_rules (id, team_id, trigger_kind, from_role, condition, to_role,
                                         priority, enabled, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    rule.id.to_string(),
                    rule.team_id.to_string(),
                    rule.trigger.to_string(),
                    rule.from_role.as_str(),
                    rule.condition,
                    rule.to_role.as_str(),
                    rule.priority as i64,
                    rule.enabled as i64,
                    rule.created_at,
                ],
            )
            .map_err(|e| format!("Failed to insert rule: {}", e))?;
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn list_rules(
        &self,
        team_id: Uuid,
        trigger: Option<TriggerKind>,
    ) -> Result<Vec<RoleAssignmentRule>, String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let rules = match trigger {
                Some(t) => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT id, team_id, trigger_kind, from_role, condition, to_role,
                                    priority, enabled, created_at
                             FROM role_rules WHERE team_id = ?1 AND trigger_kind = ?2
                             ORDER BY priority DESC",
                        )
                        .map_err(|e| format!("Failed to prepare: {}", e))?;
                    let rows = stmt
                        .query_map(
                            params![team_id.to_string(), t.to_string()],
                            Self::row_to_rule,
                        )
                        .map_err(|e| format!("Failed to query rules: {}", e))?
                        .collect::<rusqlite::Result<Vec<_>>>();
                    rows
                }
                None => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT id, team_id, trigger_kind, from_role, condition, to_role,
                                    priority, enabled, created_at
                             FROM role_rules WHERE team_id = ?1 ORDER BY priority DESC",
                        )
                        .map_err(|e| format!("Failed to prepare: {}", e))?;
                    let rows = stmt
                        .query_map(params![team_id.to_string()], Self::row_to_rule)
                        .map_err(|e| format!("Failed to query rules: {}", e))?
                        .collect::<rusqlite::Result<Vec<_>>>();
                    rows
                }
            }
            .map_err(|e| format!("Failed to read rule row: {}", e))?;
            Ok(rules)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn delete_rule(&self, id: Uuid) -> Result<(), String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "DELETE FROM role_rules WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(|e| format!("Failed to delete rule: {}", e))?;
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn append_role_history(&self, entry: &RoleAssignmentHistory) -> Result<(), String> {
        let conn = self.conn.clone();
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO role_history (id, team_id, agent_id, from_role, to_role,
                                           trigger_kind, context, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.id.to_string(),
                    entry.team_id.to_string(),
                    entry.agent_id.to_string(),
                    entry.from_role.as_str(),
                    entry.to_role.as_str(),
                    entry.trigger.to_string(),
                    entry.context,
                    entry.created_at,
                ],
            )
            .map_err(|e| format!("Failed to insert role history: {}", e))?;
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn list_role_history(
        &self,
        team_id: Uuid,
    ) -> Result<Vec<RoleAssignmentHistory>, String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(
                    "SELECT id, team_id, agent_id, from_role, to_role, trigger_kind, context, created_at
                     FROM role_history WHERE team_id = ?1 ORDER BY created_at",
                )
                .map_err(|e| format!("Failed to prepare: {}", e))?;
            let entries = stmt
                .query_map(params![team_id.to_string()], Self::row_to_history)
                .map_err(|e| format!("Failed to query role history: {}", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| format!("Failed to read history row: {}", e))?;
            Ok(entries)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    // ==================== Fallback ====================

    async fn upsert_fallback(&self, record: &FallbackRecord) -> Result<(), String> {
        let conn = self.conn.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO fallback_records (session_id, provider, response, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(session_id) DO UPDATE SET
                     provider = excluded.provider,
                     response = excluded.response,
                     updated_at = excluded.updated_at",
                params![
                    record.session_id.to_string(),
                    record.provider.as_str(),
                    record.response,
                    record.created_at,
                    now_string(),
                ],
            )
            .map_err(|e| format!("Failed to upsert fallback record: {}", e))?;
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn get_fallback(&self, session_id: Uuid) -> Result<Option<FallbackRecord>, String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT session_id, provider, response, created_at, updated_at
                 FROM fallback_records WHERE session_id = ?1",
                params![session_id.to_string()],
                |row| {
                    Ok(FallbackRecord {
                        session_id: parse_uuid(row.get::<_, String>(0)?),
                        provider: Provider::from(row.get::<_, String>(1)?),
                        response: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(|e| format!("Failed to get fallback record: {}", e))
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }
}
