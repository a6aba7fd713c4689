//! Role adaptation engine.
//!
//! Two paths reassign an agent's active role between iterations:
//! on-demand assignment scored from project requirements and workload, and
//! rule-triggered reassignment driven by team-scoped rules with a small
//! condition grammar. Both paths enforce one hard constraint: the target
//! role must be in the agent's allowed-role set.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::model::{now_string, AgentRole, RoleAssignmentHistory, TriggerKind};
use crate::store::SharedStore;

/// Complexity tier of the project being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Low,
    Medium,
    High,
}

/// What the project needs, as assessed by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRequirements {
    pub complexity: ComplexityTier,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
}

/// Current team workload, normalized to 0.0..=1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkloadSnapshot {
    pub utilization: f64,
}

/// Utilization above this forces a coordinator if one is allowed.
const OVERLOAD_THRESHOLD: f64 = 0.8;

/// A role change produced by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleChange {
    pub agent_id: Uuid,
    pub agent_name: String,
    pub from: AgentRole,
    pub to: AgentRole,
    pub reason: String,
}

/// Context values a trigger carries, evaluated by rule conditions.
///
/// Values are JSON so numeric metrics (`errors: 4`) and string facts
/// (`phase: "testing"`) travel in one bag.
pub type TriggerContext = HashMap<String, serde_json::Value>;

/// Role adaptation engine. Mutations (current_role, history) go through the
/// store so changes survive worker restarts like everything else.
pub struct RoleEngine {
    store: SharedStore,
}

impl RoleEngine {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// On-demand assignment: score each adaptable agent against the
    /// requirements, workload, and free-text context, and move it to its
    /// best allowed role. Returns the changes applied.
    pub async fn assign(
        &self,
        team_id: Uuid,
        requirements: &ProjectRequirements,
        workload: WorkloadSnapshot,
        context: &str,
    ) -> Result<Vec<RoleChange>> {
        let agents = self
            .store
            .list_agents(team_id)
            .await
            .map_err(OrchestratorError::Store)?;

        let scores = score_roles(requirements, context);
        let mut changes = Vec::new();

        for agent in agents.iter().filter(|a| a.adaptive) {
            let target = if workload.utilization > OVERLOAD_THRESHOLD
                && agent.can_assume(&AgentRole::Coordinator)
                && agent.current_role != AgentRole::Coordinator
            {
                Some((
                    AgentRole::Coordinator,
                    format!(
                        "workload utilization {:.2} exceeds {:.1}",
                        workload.utilization, OVERLOAD_THRESHOLD
                    ),
                ))
            } else {
                best_allowed_role(&agent.allowed_roles, &agent.current_role, &scores)
            };

            let Some((to, reason)) = target else {
                continue;
            };
            // The allowed-role set is the sole hard constraint on drift.
            if !agent.can_assume(&to) {
                continue;
            }

            self.store
                .set_agent_role(agent.id, &to)
                .await
                .map_err(OrchestratorError::Store)?;
            self.record_change(team_id, agent.id, &agent.current_role, &to, TriggerKind::Manual, context)
                .await?;
            changes.push(RoleChange {
                agent_id: agent.id,
                agent_name: agent.name.clone(),
                from: agent.current_role.clone(),
                to,
                reason,
            });
        }

        Ok(changes)
    }

    /// Rule-triggered reassignment: evaluate the team's enabled rules for
    /// `trigger`, highest priority first, against the trigger context.
    /// Each agent changes at most once per trigger.
    pub async fn trigger(
        &self,
        team_id: Uuid,
        trigger: TriggerKind,
        context: &TriggerContext,
    ) -> Result<Vec<RoleChange>> {
        let rules = self
            .store
            .list_rules(team_id, Some(trigger))
            .await
            .map_err(OrchestratorError::Store)?;
        let agents = self
            .store
            .list_agents(team_id)
            .await
            .map_err(OrchestratorError::Store)?;

        let context_text = serde_json::to_string(context).unwrap_or_default();
        let mut changed: Vec<Uuid> = Vec::new();
        let mut changes = Vec::new();

        for rule in rules.iter().filter(|r| r.enabled) {
            let condition = match parse_condition(&rule.condition) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(rule = %rule.id, "Skipping rule with bad condition: {}", e);
                    continue;
                }
            };
            if !condition.evaluate(context) {
                continue;
            }

            let candidates: Vec<_> = agents
                .iter()
                .filter(|a| a.current_role == rule.from_role && !changed.contains(&a.id))
                .collect();
            for agent in candidates {
                if !agent.can_assume(&rule.to_role) {
                    tracing::debug!(
                        agent = %agent.name,
                        role = %rule.to_role,
                        "Rule matched but target role is not allowed"
                    );
                    continue;
                }

                self.store
                    .set_agent_role(agent.id, &rule.to_role)
                    .await
                    .map_err(OrchestratorError::Store)?;
                self.record_change(
                    team_id,
                    agent.id,
                    &agent.current_role,
                    &rule.to_role,
                    trigger,
                    &context_text,
                )
                .await?;

                changed.push(agent.id);
                changes.push(RoleChange {
                    agent_id: agent.id,
                    agent_name: agent.name.clone(),
                    from: agent.current_role.clone(),
                    to: rule.to_role.clone(),
                    reason: format!("rule matched: {}", rule.condition),
                });
            }
        }

        Ok(changes)
    }

    async fn record_change(
        &self,
        team_id: Uuid,
        agent_id: Uuid,
        from: &AgentRole,
        to: &AgentRole,
        trigger: TriggerKind,
        context: &str,
    ) -> Result<()> {
        self.store
            .append_role_history(&RoleAssignmentHistory {
                id: Uuid::new_v4(),
                team_id,
                agent_id,
                from_role: from.clone(),
                to_role: to.clone(),
                trigger,
                context: context.to_string(),
                created_at: now_string(),
            })
            .await
            .map_err(OrchestratorError::Store)
    }
}

// ==================== Scoring ====================

/// Fixed decision table plus keyword matches on free-text context.
fn score_roles(requirements: &ProjectRequirements, context: &str) -> HashMap<AgentRole, i32> {
    let mut scores: HashMap<AgentRole, i32> = HashMap::new();
    let mut bump = |role: AgentRole, n: i32| *scores.entry(role).or_default() += n;

    // A coder is always needed.
    bump(AgentRole::Coder, 2);

    match requirements.complexity {
        ComplexityTier::Low => bump(AgentRole::Coder, 2),
        ComplexityTier::Medium => {
            bump(AgentRole::Planner, 1);
            bump(AgentRole::Tester, 1);
        }
        ComplexityTier::High => {
            bump(AgentRole::Planner, 2);
            bump(AgentRole::Reviewer, 2);
            bump(AgentRole::Tester, 1);
        }
    }

    for domain in &requirements.domains {
        let d = domain.to_lowercase();
        if d.contains("test") || d.contains("qa") {
            bump(AgentRole::Tester, 2);
        }
        if d.contains("security") || d.contains("compliance") {
            bump(AgentRole::Reviewer, 2);
        }
    }

    if requirements.tech_stack.len() > 3 {
        bump(AgentRole::Planner, 1);
    }

    let text = context.to_lowercase();
    for (keyword, role) in [
        ("test", AgentRole::Tester),
        ("review", AgentRole::Reviewer),
        ("quality", AgentRole::Reviewer),
        ("plan", AgentRole::Planner),
        ("architecture", AgentRole::Planner),
        ("design", AgentRole::Planner),
        ("implement", AgentRole::Coder),
        ("build", AgentRole::Coder),
        ("coordinate", AgentRole::Coordinator),
    ] {
        if text.contains(keyword) {
            bump(role, 1);
        }
    }

    scores
}

/// The best-scoring allowed role, if it strictly beats the current one.
fn best_allowed_role(
    allowed: &[AgentRole],
    current: &AgentRole,
    scores: &HashMap<AgentRole, i32>,
) -> Option<(AgentRole, String)> {
    let current_score = scores.get(current).copied().unwrap_or(0);
    let best = allowed
        .iter()
        .map(|role| (role, scores.get(role).copied().unwrap_or(0)))
        .max_by_key(|(_, score)| *score)?;

    if best.1 > current_score && best.0 != current {
        Some((
            best.0.clone(),
            format!("{} scored {} vs current {}", best.0, best.1, current_score),
        ))
    } else {
        None
    }
}

// ==================== Condition grammar ====================

#[derive(Debug, Clone, PartialEq)]
enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Literal(String),
}

/// One parsed condition: `metric <op> operand`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    metric: String,
    op: Comparison,
    operand: Operand,
}

impl Condition {
    /// Evaluate against a trigger context. A missing metric never matches.
    pub fn evaluate(&self, context: &TriggerContext) -> bool {
        let Some(value) = context.get(&self.metric) else {
            return false;
        };
        match (&self.operand, value) {
            (Operand::Number(n), serde_json::Value::Number(v)) => {
                let Some(v) = v.as_f64() else { return false };
                match self.op {
                    Comparison::Gt => v > *n,
                    Comparison::Ge => v >= *n,
                    Comparison::Lt => v < *n,
                    Comparison::Le => v <= *n,
                    Comparison::Eq => (v - *n).abs() < f64::EPSILON,
                }
            }
            (Operand::Literal(s), serde_json::Value::String(v)) => {
                self.op == Comparison::Eq && v == s
            }
            _ => false,
        }
    }
}

/// Parse `metric > number` / `metric == "literal"` style conditions.
pub fn parse_condition(input: &str) -> std::result::Result<Condition, String> {
    let input = input.trim();
    // Longest operators first so ">=" is not read as ">".
    for (symbol, op) in [
        (">=", Comparison::Ge),
        ("<=", Comparison::Le),
        ("==", Comparison::Eq),
        (">", Comparison::Gt),
        ("<", Comparison::Lt),
    ] {
        if let Some((left, right)) = input.split_once(symbol) {
            let metric = left.trim();
            let rhs = right.trim();
            if metric.is_empty() || rhs.is_empty() {
                return Err(format!("incomplete condition: {:?}", input));
            }
            let operand = if let Some(literal) = rhs.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
                if op != Comparison::Eq {
                    return Err(format!("string literals only support ==: {:?}", input));
                }
                Operand::Literal(literal.to_string())
            } else {
                Operand::Number(
                    rhs.parse::<f64>()
                        .map_err(|_| format!("not a number: {:?}", rhs))?,
                )
            };
            return Ok(Condition {
                metric: metric.to_string(),
                op,
                operand,
            });
        }
    }
    Err(format!("no comparison operator in condition: {:?}", input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;
    use crate::model::{Agent, RoleAssignmentRule, Team};
    use crate::store::{InMemoryStore, Store};
    use std::sync::Arc;

    fn ctx(pairs: &[(&str, serde_json::Value)]) -> TriggerContext {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_condition_parsing() {
        let c = parse_condition("errors > 3").unwrap();
        assert!(c.evaluate(&ctx(&[("errors", serde_json::json!(4))])));
        assert!(!c.evaluate(&ctx(&[("errors", serde_json::json!(3))])));
        assert!(!c.evaluate(&ctx(&[])));

        let c = parse_condition("phase == \"testing\"").unwrap();
        assert!(c.evaluate(&ctx(&[("phase", serde_json::json!("testing"))])));
        assert!(!c.evaluate(&ctx(&[("phase", serde_json::json!("build"))])));

        let c = parse_condition("utilization >= 0.8").unwrap();
        assert!(c.evaluate(&ctx(&[("utilization", serde_json::json!(0.8))])));

        assert!(parse_condition("no operator here").is_err());
        assert!(parse_condition("phase > \"testing\"").is_err());
        assert!(parse_condition("errors > banana").is_err());
    }

    async fn seed_team(store: &dyn Store) -> (Uuid, Agent) {
        let team = Team {
            id: Uuid::new_v4(),
            owner: "u".into(),
            project_id: None,
            name: "t".into(),
            is_active: true,
            budget_limit_cents: 1_000,
            budget_used_cents: 0,
            created_at: now_string(),
            updated_at: now_string(),
        };
        store.create_team(&team).await.unwrap();
        let agent = Agent {
            id: Uuid::new_v4(),
            team_id: team.id,
            name: "worker".into(),
            role: AgentRole::Coder,
            current_role: AgentRole::Coder,
            provider: Provider::OpenAi,
            model: "m".into(),
            system_prompt: String::new(),
            execution_order: 1,
            enabled: true,
            adaptive: true,
            allowed_roles: vec![AgentRole::Coder, AgentRole::Tester],
            persona_id: None,
            created_at: now_string(),
        };
        store.create_agent(&agent).await.unwrap();
        (team.id, agent)
    }

    fn rule(team_id: Uuid, to: AgentRole, condition: &str, priority: i32) -> RoleAssignmentRule {
        RoleAssignmentRule {
            id: Uuid::new_v4(),
            team_id,
            trigger: TriggerKind::ErrorThreshold,
            from_role: AgentRole::Coder,
            condition: condition.into(),
            to_role: to,
            priority,
            enabled: true,
            created_at: now_string(),
        }
    }

    #[tokio::test]
    async fn test_trigger_reassigns_and_records_history() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let (team_id, agent) = seed_team(store.as_ref()).await;
        store
            .create_rule(&rule(team_id, AgentRole::Tester, "errors > 3", 1))
            .await
            .unwrap();

        let engine = RoleEngine::new(store.clone());
        let changes = engine
            .trigger(
                team_id,
                TriggerKind::ErrorThreshold,
                &ctx(&[("errors", serde_json::json!(5))]),
            )
            .await
            .unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to, AgentRole::Tester);
        let got = store.get_agent(agent.id).await.unwrap().unwrap();
        assert_eq!(got.current_role, AgentRole::Tester);
        let history = store.list_role_history(team_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].trigger, TriggerKind::ErrorThreshold);
    }

    #[tokio::test]
    async fn test_trigger_never_escapes_allowed_roles() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let (team_id, agent) = seed_team(store.as_ref()).await;
        // Reviewer is not in the agent's allowed set.
        store
            .create_rule(&rule(team_id, AgentRole::Reviewer, "errors > 0", 100))
            .await
            .unwrap();

        let engine = RoleEngine::new(store.clone());
        let changes = engine
            .trigger(
                team_id,
                TriggerKind::ErrorThreshold,
                &ctx(&[("errors", serde_json::json!(10))]),
            )
            .await
            .unwrap();

        assert!(changes.is_empty());
        let got = store.get_agent(agent.id).await.unwrap().unwrap();
        assert_eq!(got.current_role, AgentRole::Coder);
        assert!(store.list_role_history(team_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_higher_priority_rule_wins() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let (team_id, agent) = seed_team(store.as_ref()).await;
        store
            .create_rule(&rule(team_id, AgentRole::Tester, "errors > 0", 10))
            .await
            .unwrap();
        // Lower priority, would also match, but the agent is already changed.
        store
            .create_rule(&rule(team_id, AgentRole::Coder, "errors > 0", 1))
            .await
            .unwrap();

        let engine = RoleEngine::new(store.clone());
        let changes = engine
            .trigger(
                team_id,
                TriggerKind::ErrorThreshold,
                &ctx(&[("errors", serde_json::json!(1))]),
            )
            .await
            .unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to, AgentRole::Tester);
        let got = store.get_agent(agent.id).await.unwrap().unwrap();
        assert_eq!(got.current_role, AgentRole::Tester);
    }

    #[tokio::test]
    async fn test_assign_prefers_tester_for_testing_context() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let (team_id, agent) = seed_team(store.as_ref()).await;

        let engine = RoleEngine::new(store.clone());
        let changes = engine
            .assign(
                team_id,
                &ProjectRequirements {
                    complexity: ComplexityTier::High,
                    domains: vec!["testing".into()],
                    tech_stack: vec![],
                },
                WorkloadSnapshot { utilization: 0.2 },
                "the test suite needs attention",
            )
            .await
            .unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to, AgentRole::Tester);
        let got = store.get_agent(agent.id).await.unwrap().unwrap();
        assert_eq!(got.current_role, AgentRole::Tester);
    }

    #[tokio::test]
    async fn test_overload_forces_coordinator_only_if_allowed() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let (team_id, _) = seed_team(store.as_ref()).await;

        let engine = RoleEngine::new(store.clone());
        // allowed_roles has no Coordinator, so overload must not move anyone
        // there.
        let changes = engine
            .assign(
                team_id,
                &ProjectRequirements {
                    complexity: ComplexityTier::Low,
                    domains: vec![],
                    tech_stack: vec![],
                },
                WorkloadSnapshot { utilization: 0.95 },
                "",
            )
            .await
            .unwrap();
        assert!(changes.iter().all(|c| c.to != AgentRole::Coordinator));
    }
}
