//! Session scheduler: the iteration loop and session state machine.
//!
//! Drives a team's enabled agents in execution order, once per iteration,
//! feeding each agent's output to the next as context. Session state lives
//! only in the store; control signals (pause/resume/stop) are store writes
//! the loop observes at iteration boundaries, never mid-iteration.
//!
//! This layer performs no automatic retry and never lets a failure escape:
//! every exit path leaves the session terminal or paused with the reason in
//! the message log.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::guard::{GuardDecision, RateBudgetGuard};
use crate::invoker::{estimate_turn_cost_cents, AgentInvoker, InvokeOutcome};
use crate::model::{
    now_string, Agent, AgentRole, Message, MessageKind, Session, SessionStatus, Team,
};
use crate::progress::{Progress, ProgressEvent, ProgressPhase};
use crate::store::SharedStore;

/// Request to start a new session.
#[derive(Debug, Clone)]
pub struct StartSessionRequest {
    pub team_id: Uuid,
    pub project_id: Option<Uuid>,
    pub owner: String,
    pub prompt: String,
    pub max_iterations: u32,
}

/// Drives sessions. Cheap to share; every running session is an independent
/// tokio task over the same scheduler.
pub struct SessionScheduler {
    store: SharedStore,
    guard: Arc<RateBudgetGuard>,
    invoker: Arc<AgentInvoker>,
    progress: Arc<dyn Progress>,
}

impl SessionScheduler {
    pub fn new(
        store: SharedStore,
        guard: Arc<RateBudgetGuard>,
        invoker: Arc<AgentInvoker>,
        progress: Arc<dyn Progress>,
    ) -> Self {
        Self {
            store,
            guard,
            invoker,
            progress,
        }
    }

    /// Validate and persist a new running session. Does not start the loop;
    /// callers either `spawn` it or drive `run` themselves.
    pub async fn start(&self, req: StartSessionRequest) -> Result<Session> {
        let team = self
            .store
            .get_team(req.team_id)
            .await
            .map_err(OrchestratorError::Store)?
            .ok_or_else(|| {
                OrchestratorError::Validation(format!("team {} not found", req.team_id))
            })?;
        if team.owner != req.owner {
            return Err(OrchestratorError::Validation(format!(
                "team {} does not belong to {}",
                req.team_id, req.owner
            )));
        }
        let agents = self
            .store
            .list_agents(req.team_id)
            .await
            .map_err(OrchestratorError::Store)?;
        if !agents.iter().any(|a| a.enabled) {
            return Err(OrchestratorError::Validation(
                "team has no enabled agents".to_string(),
            ));
        }
        if req.prompt.trim().is_empty() {
            return Err(OrchestratorError::Validation("prompt is empty".to_string()));
        }

        let session = Session {
            id: Uuid::new_v4(),
            team_id: req.team_id,
            project_id: req.project_id.or(team.project_id),
            owner: req.owner,
            initial_prompt: req.prompt,
            status: SessionStatus::Running,
            current_iteration: 0,
            max_iterations: req.max_iterations.max(1),
            total_cost_cents: 0,
            version: 0,
            created_at: now_string(),
            updated_at: now_string(),
        };
        self.store
            .create_session(&session)
            .await
            .map_err(OrchestratorError::Store)?;

        // The initial prompt opens the audit trail.
        self.persist_message(
            &session,
            None,
            0,
            0,
            MessageKind::Input,
            session.initial_prompt.clone(),
            0,
        )
        .await?;

        self.emit(&session, None, "session started", ProgressPhase::SessionStarted);
        Ok(session)
    }

    /// Run the session loop as a detached task.
    pub fn spawn(self: &Arc<Self>, session_id: Uuid) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.run(session_id).await;
        });
    }

    /// Run the session loop to a paused or terminal state.
    ///
    /// Never returns an error: an uncaught failure marks the session
    /// `failed` with the reason in the message log.
    pub async fn run(&self, session_id: Uuid) {
        if let Err(e) = self.run_inner(session_id).await {
            tracing::error!(session = %session_id, "Session loop failed: {}", e);
            if let Ok(Some(session)) = self.store.get_session(session_id).await {
                if !session.status.is_terminal() {
                    let _ = self
                        .persist_message(
                            &session,
                            None,
                            session.current_iteration,
                            u32::MAX,
                            MessageKind::Error,
                            format!("session failed: {}", e),
                            0,
                        )
                        .await;
                    let _ = self
                        .store
                        .set_session_status(session_id, SessionStatus::Failed)
                        .await;
                    self.emit(&session, None, "session failed", ProgressPhase::SessionFailed);
                }
            }
        }
    }

    async fn run_inner(&self, session_id: Uuid) -> Result<()> {
        loop {
            // Status is re-read from the store at every iteration boundary;
            // control signals written there take effect here, never
            // mid-iteration.
            let Some(mut session) = self
                .store
                .get_session(session_id)
                .await
                .map_err(OrchestratorError::Store)?
            else {
                return Err(OrchestratorError::Validation(format!(
                    "session {} disappeared",
                    session_id
                )));
            };

            match session.status {
                SessionStatus::Paused => {
                    self.emit(&session, None, "session paused", ProgressPhase::SessionPaused);
                    return Ok(());
                }
                SessionStatus::Completed | SessionStatus::Failed => return Ok(()),
                SessionStatus::Running => {}
            }

            if session.current_iteration >= session.max_iterations {
                self.complete(&session, "max iterations reached").await?;
                return Ok(());
            }

            session.current_iteration += 1;
            self.store
                .update_session(&session)
                .await
                .map_err(OrchestratorError::Store)?;
            self.emit(
                &session,
                None,
                &format!(
                    "iteration {} of {}",
                    session.current_iteration, session.max_iterations
                ),
                ProgressPhase::IterationStarted,
            );

            let agents: Vec<Agent> = self
                .store
                .list_agents(session.team_id)
                .await
                .map_err(OrchestratorError::Store)?
                .into_iter()
                .filter(|a| a.enabled)
                .collect();
            if agents.is_empty() {
                return Err(OrchestratorError::Validation(
                    "team has no enabled agents".to_string(),
                ));
            }

            let mut context = self.latest_context(session_id).await?;

            for agent in &agents {
                if !self
                    .run_agent_turn(&mut session, agent, &mut context)
                    .await?
                {
                    // The turn ended the iteration (paused or failed).
                    return Ok(());
                }
            }

            if let Some(coordinator) = agents
                .iter()
                .find(|a| a.current_role == AgentRole::Coordinator)
            {
                if !self.coordinator_votes_continue(&session, coordinator, &context).await {
                    self.complete(&session, "coordinator voted to stop").await?;
                    return Ok(());
                }
            }
        }
    }

    /// Run one agent's turn. Returns `false` when the session left the
    /// running state and the loop must stop.
    async fn run_agent_turn(
        &self,
        session: &mut Session,
        agent: &Agent,
        context: &mut String,
    ) -> Result<bool> {
        let estimate = estimate_turn_cost_cents(&agent.provider, context.len());

        // Team is re-read per turn so concurrent sessions' ledger commits
        // are visible; a failed lookup fails open inside the guard.
        let team: Option<Team> = self
            .store
            .get_team(session.team_id)
            .await
            .unwrap_or_default();

        let decision = match self.guard.check_rate(&session.owner, estimate) {
            GuardDecision::Allowed => self.guard.check_budget(team.as_ref(), estimate),
            denied => denied,
        };
        if let GuardDecision::Denied { reason, reset_at } = decision {
            let mut content = format!("paused by guard: {}", reason);
            if let Some(reset) = reset_at {
                content.push_str(&format!(" (resets at {})", reset.to_rfc3339()));
            }
            self.persist_message(
                session,
                Some(agent.id),
                session.current_iteration,
                agent.execution_order,
                MessageKind::Error,
                content,
                0,
            )
            .await?;
            self.store
                .set_session_status(session.id, SessionStatus::Paused)
                .await
                .map_err(OrchestratorError::Store)?;
            self.emit(
                session,
                Some(&agent.name),
                "paused on rate/budget limit",
                ProgressPhase::SessionPaused,
            );
            return Ok(false);
        }

        self.emit(session, Some(&agent.name), "agent started", ProgressPhase::AgentStarted);

        match self.invoker.invoke(agent, context, session).await {
            InvokeOutcome::Success {
                output,
                cost_cents,
                tokens,
                action_results,
            } => {
                *context = output.clone();
                session.total_cost_cents = session.total_cost_cents.saturating_add(cost_cents);
                self.store
                    .update_session(session)
                    .await
                    .map_err(OrchestratorError::Store)?;
                self.store
                    .add_team_cost(session.team_id, cost_cents)
                    .await
                    .map_err(OrchestratorError::Store)?;
                self.guard
                    .log_usage(&session.owner, &agent.provider, tokens, cost_cents);

                let kind = if action_results.is_empty() {
                    MessageKind::Output
                } else {
                    MessageKind::ToolCall
                };
                self.persist_message(
                    session,
                    Some(agent.id),
                    session.current_iteration,
                    agent.execution_order,
                    kind,
                    output,
                    cost_cents,
                )
                .await?;
                if !action_results.is_empty() {
                    self.emit(
                        session,
                        Some(&agent.name),
                        &format!("{} tool actions applied", action_results.len()),
                        ProgressPhase::ToolActions,
                    );
                }
                self.emit(session, Some(&agent.name), "agent finished", ProgressPhase::AgentFinished);
                Ok(true)
            }
            InvokeOutcome::Failure(failure) if failure.is_critical() => {
                self.persist_message(
                    session,
                    Some(agent.id),
                    session.current_iteration,
                    agent.execution_order,
                    MessageKind::Error,
                    failure.message(),
                    0,
                )
                .await?;
                self.store
                    .set_session_status(session.id, SessionStatus::Failed)
                    .await
                    .map_err(OrchestratorError::Store)?;
                self.emit(
                    session,
                    Some(&agent.name),
                    "critical failure, session failed",
                    ProgressPhase::SessionFailed,
                );
                Ok(false)
            }
            InvokeOutcome::Failure(failure) if failure.pauses_session() => {
                self.persist_message(
                    session,
                    Some(agent.id),
                    session.current_iteration,
                    agent.execution_order,
                    MessageKind::Error,
                    format!("paused by provider: {}", failure.message()),
                    0,
                )
                .await?;
                self.store
                    .set_session_status(session.id, SessionStatus::Paused)
                    .await
                    .map_err(OrchestratorError::Store)?;
                self.emit(
                    session,
                    Some(&agent.name),
                    "paused on provider rate/budget condition",
                    ProgressPhase::SessionPaused,
                );
                Ok(false)
            }
            InvokeOutcome::Failure(failure) => {
                // Recoverable: the pipeline continues with the context
                // unchanged and a placeholder in the audit trail.
                self.persist_message(
                    session,
                    Some(agent.id),
                    session.current_iteration,
                    agent.execution_order,
                    MessageKind::Error,
                    format!("[agent {} unavailable: {}]", agent.name, failure.message()),
                    0,
                )
                .await?;
                self.emit(
                    session,
                    Some(&agent.name),
                    "agent unavailable, continuing",
                    ProgressPhase::AgentFinished,
                );
                Ok(true)
            }
        }
    }

    /// Ask the coordinator whether another iteration should run. Anything
    /// but an explicit first-line CONTINUE stops the loop, including a
    /// failed call.
    async fn coordinator_votes_continue(
        &self,
        session: &Session,
        coordinator: &Agent,
        context: &str,
    ) -> bool {
        let question = format!(
            "The team has completed iteration {} of {} for the task below.\n\
             Task: {}\n\nLatest result:\n{}\n\n\
             Should the team run another iteration? Reply with a single word \
             on the first line: CONTINUE or STOP.",
            session.current_iteration, session.max_iterations, session.initial_prompt, context,
        );
        match self.invoker.ask(coordinator, &question, session).await {
            Ok(answer) => wants_continue(&answer),
            Err(e) => {
                tracing::warn!(
                    session = %session.id,
                    "Coordinator vote failed, stopping: {}",
                    e.message()
                );
                false
            }
        }
    }

    async fn complete(&self, session: &Session, reason: &str) -> Result<()> {
        self.store
            .set_session_status(session.id, SessionStatus::Completed)
            .await
            .map_err(OrchestratorError::Store)?;
        self.emit(session, None, reason, ProgressPhase::SessionCompleted);
        Ok(())
    }

    /// The most recent successful output, used to rebuild context when a
    /// paused session resumes. Placeholders are error messages and are
    /// never picked up.
    async fn latest_context(&self, session_id: Uuid) -> Result<String> {
        let messages = self
            .store
            .list_messages(session_id)
            .await
            .map_err(OrchestratorError::Store)?;
        Ok(messages
            .iter()
            .rev()
            .find(|m| matches!(m.kind, MessageKind::Output | MessageKind::ToolCall))
            .map(|m| m.content.clone())
            .unwrap_or_default())
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_message(
        &self,
        session: &Session,
        agent_id: Option<Uuid>,
        iteration: u32,
        execution_order: u32,
        kind: MessageKind,
        content: String,
        cost_cents: u64,
    ) -> Result<()> {
        self.store
            .append_message(&Message {
                id: Uuid::new_v4(),
                session_id: session.id,
                agent_id,
                iteration,
                execution_order,
                kind,
                content,
                cost_cents,
                created_at: now_string(),
            })
            .await
            .map_err(OrchestratorError::Store)
    }

    fn emit(&self, session: &Session, agent_name: Option<&str>, text: &str, phase: ProgressPhase) {
        self.progress.emit(ProgressEvent {
            project_id: session.project_id,
            session_id: session.id,
            agent_name: agent_name.map(str::to_string),
            text: text.to_string(),
            phase,
            timestamp: now_string(),
        });
    }

    // ==================== Control signals ====================

    /// Pause a running session. Takes effect at the next iteration boundary.
    pub async fn pause(&self, session_id: Uuid) -> Result<Session> {
        self.transition(session_id, SessionStatus::Paused).await
    }

    /// Resume a paused session and restart its loop.
    pub async fn resume(self: &Arc<Self>, session_id: Uuid) -> Result<Session> {
        let session = self.transition(session_id, SessionStatus::Running).await?;
        self.emit(&session, None, "session resumed", ProgressPhase::SessionResumed);
        self.spawn(session_id);
        Ok(session)
    }

    /// Stop a session. A user-requested stop completes the session rather
    /// than failing it.
    pub async fn stop(&self, session_id: Uuid) -> Result<Session> {
        self.transition(session_id, SessionStatus::Completed).await
    }

    async fn transition(&self, session_id: Uuid, to: SessionStatus) -> Result<Session> {
        let Some(session) = self
            .store
            .get_session(session_id)
            .await
            .map_err(OrchestratorError::Store)?
        else {
            return Err(OrchestratorError::Validation(format!(
                "session {} not found",
                session_id
            )));
        };
        if !session.status.can_transition_to(to) {
            return Err(OrchestratorError::Validation(format!(
                "cannot move session from {} to {}",
                session.status, to
            )));
        }
        self.store
            .set_session_status(session_id, to)
            .await
            .map_err(OrchestratorError::Store)?;
        self.store
            .get_session(session_id)
            .await
            .map_err(OrchestratorError::Store)?
            .ok_or_else(|| {
                OrchestratorError::Validation(format!("session {} not found", session_id))
            })
    }
}

/// Anchored first-line check, not a substring scan: the coordinator prompt
/// demands a one-word verdict and anything else means stop.
fn wants_continue(answer: &str) -> bool {
    answer
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_ascii_uppercase().starts_with("CONTINUE"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::testing::StaticCredentials;
    use crate::guard::GuardLimits;
    use crate::llm::testing::ScriptedLlm;
    use crate::llm::{Provider, ProviderError};
    use crate::progress::ProgressHub;
    use crate::store::InMemoryStore;
    use crate::workspace::LocalWorkspace;

    struct Fixture {
        scheduler: Arc<SessionScheduler>,
        store: SharedStore,
        team_id: Uuid,
        _dir: tempfile::TempDir,
    }

    /// Team of planner/coder/coordinator with per-agent model names so the
    /// scripted client can address them individually.
    async fn fixture(llm: ScriptedLlm, limits: GuardLimits, coder_credential: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store: SharedStore = Arc::new(InMemoryStore::new());

        let team = Team {
            id: Uuid::new_v4(),
            owner: "user".into(),
            project_id: Some(Uuid::new_v4()),
            name: "builders".into(),
            is_active: true,
            budget_limit_cents: 10_000,
            budget_used_cents: 0,
            created_at: now_string(),
            updated_at: now_string(),
        };
        store.create_team(&team).await.unwrap();

        let roles = [
            (AgentRole::Planner, "planner-model", Provider::OpenAi),
            (AgentRole::Coder, "coder-model", Provider::Anthropic),
            (AgentRole::Coordinator, "coordinator-model", Provider::OpenAi),
        ];
        for (order, (role, model, provider)) in roles.into_iter().enumerate() {
            store
                .create_agent(&Agent {
                    id: Uuid::new_v4(),
                    team_id: team.id,
                    name: format!("{}", role),
                    role: role.clone(),
                    current_role: role,
                    provider,
                    model: model.into(),
                    system_prompt: String::new(),
                    execution_order: order as u32 + 1,
                    enabled: true,
                    adaptive: false,
                    allowed_roles: vec![],
                    persona_id: None,
                    created_at: now_string(),
                })
                .await
                .unwrap();
        }

        let mut credentials = StaticCredentials::new().with("user", &Provider::OpenAi, "sk-oa");
        if coder_credential {
            credentials = credentials.with("user", &Provider::Anthropic, "sk-ant");
        }

        let invoker = Arc::new(AgentInvoker::new(
            Arc::new(llm),
            Arc::new(credentials),
            Arc::new(LocalWorkspace::new(dir.path())),
            store.clone(),
        ));
        let scheduler = Arc::new(SessionScheduler::new(
            store.clone(),
            Arc::new(RateBudgetGuard::new(limits)),
            invoker,
            Arc::new(ProgressHub::default()),
        ));

        Fixture {
            scheduler,
            store,
            team_id: team.id,
            _dir: dir,
        }
    }

    fn relaxed_limits() -> GuardLimits {
        GuardLimits {
            requests_per_minute: 100,
            requests_per_hour: 1_000,
            hourly_cost_cents: 100_000,
        }
    }

    fn request(team_id: Uuid, max_iterations: u32) -> StartSessionRequest {
        StartSessionRequest {
            team_id,
            project_id: None,
            owner: "user".into(),
            prompt: "build a todo app".into(),
            max_iterations,
        }
    }

    #[test]
    fn test_wants_continue_is_anchored() {
        assert!(wants_continue("CONTINUE"));
        assert!(wants_continue("\n  continue\nbecause..."));
        assert!(!wants_continue("STOP"));
        assert!(!wants_continue("We should CONTINUE"));
        assert!(!wants_continue(""));
    }

    #[tokio::test]
    async fn test_scenario_a_full_pass_completes() {
        // planner, coder, coordinator all answer; coordinator votes STOP.
        let llm = ScriptedLlm::new()
            .respond("planner-model", "1. make files")
            .respond("coder-model", "the code")
            .respond("coordinator-model", "looks done")
            .respond("coordinator-model", "STOP");
        let f = fixture(llm, relaxed_limits(), true).await;

        let session = f.scheduler.start(request(f.team_id, 1)).await.unwrap();
        f.scheduler.run(session.id).await;

        let session = f.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);

        let messages = f.store.list_messages(session.id).await.unwrap();
        let outputs: Vec<_> = messages
            .iter()
            .filter(|m| m.kind == MessageKind::Output)
            .collect();
        assert_eq!(outputs.len(), 3);
        assert!(messages.iter().all(|m| m.kind != MessageKind::Error));
        // Messages per iteration never exceed the enabled-agent count.
        assert!(
            messages
                .iter()
                .filter(|m| m.iteration == 1)
                .count()
                <= 3
        );
    }

    #[tokio::test]
    async fn test_scenario_b_missing_credential_fails_fast() {
        let llm = ScriptedLlm::new().respond("planner-model", "the plan");
        let f = fixture(llm, relaxed_limits(), false).await;

        let session = f.scheduler.start(request(f.team_id, 1)).await.unwrap();
        f.scheduler.run(session.id).await;

        let session = f.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Failed);

        let messages = f.store.list_messages(session.id).await.unwrap();
        let turn_messages: Vec<_> = messages.iter().filter(|m| m.iteration == 1).collect();
        // planner output, then the coder's critical error; no coordinator.
        assert_eq!(turn_messages.len(), 2);
        assert_eq!(turn_messages[0].kind, MessageKind::Output);
        assert_eq!(turn_messages[1].kind, MessageKind::Error);
        assert!(turn_messages[1].content.contains("no credential"));
    }

    #[tokio::test]
    async fn test_scenario_c_rate_denial_pauses_mid_iteration() {
        let llm = ScriptedLlm::new().respond("planner-model", "the plan");
        let f = fixture(
            llm,
            GuardLimits {
                requests_per_minute: 1,
                requests_per_hour: 1_000,
                hourly_cost_cents: 100_000,
            },
            true,
        )
        .await;

        let session = f.scheduler.start(request(f.team_id, 1)).await.unwrap();
        f.scheduler.run(session.id).await;

        let session = f.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Paused);

        let messages = f.store.list_messages(session.id).await.unwrap();
        let outputs = messages
            .iter()
            .filter(|m| m.iteration == 1 && m.kind == MessageKind::Output)
            .count();
        assert_eq!(outputs, 1);
        let denial = messages
            .iter()
            .find(|m| m.kind == MessageKind::Error)
            .expect("denial message");
        assert!(denial.content.contains("paused by guard"));
    }

    #[tokio::test]
    async fn test_rate_denial_on_first_agent_pauses_with_zero_outputs() {
        let llm = ScriptedLlm::new();
        let f = fixture(
            llm,
            GuardLimits {
                requests_per_minute: 0,
                requests_per_hour: 1_000,
                hourly_cost_cents: 100_000,
            },
            true,
        )
        .await;

        let session = f.scheduler.start(request(f.team_id, 1)).await.unwrap();
        f.scheduler.run(session.id).await;

        let session = f.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Paused);
        let messages = f.store.list_messages(session.id).await.unwrap();
        assert_eq!(
            messages
                .iter()
                .filter(|m| m.iteration == 1 && m.kind == MessageKind::Output)
                .count(),
            0
        );
    }

    #[tokio::test]
    async fn test_budget_ledger_matches_message_costs() {
        let llm = ScriptedLlm::new()
            .respond("planner-model", "plan")
            .respond("coder-model", "code")
            .respond("coordinator-model", "fine")
            .respond("coordinator-model", "STOP");
        let f = fixture(llm, relaxed_limits(), true).await;

        let session = f.scheduler.start(request(f.team_id, 1)).await.unwrap();
        f.scheduler.run(session.id).await;

        let team = f.store.get_team(f.team_id).await.unwrap().unwrap();
        let messages = f.store.list_messages(session.id).await.unwrap();
        let message_cost: u64 = messages.iter().map(|m| m.cost_cents).sum();
        assert!(message_cost > 0);
        assert_eq!(team.budget_used_cents, message_cost);

        let session = f.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.total_cost_cents, message_cost);
    }

    #[tokio::test]
    async fn test_recoverable_failure_keeps_context_and_continues() {
        let llm = ScriptedLlm::new()
            .respond("planner-model", "the plan survives")
            .fail("coder-model", ProviderError::transient("upstream 503"))
            .respond("coordinator-model", "fine")
            .respond("coordinator-model", "STOP");
        let f = fixture(llm, relaxed_limits(), true).await;

        let session = f.scheduler.start(request(f.team_id, 1)).await.unwrap();
        f.scheduler.run(session.id).await;

        let session = f.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);

        let messages = f.store.list_messages(session.id).await.unwrap();
        let placeholder = messages
            .iter()
            .find(|m| m.kind == MessageKind::Error)
            .expect("placeholder for the failed coder");
        assert!(placeholder.content.contains("unavailable"));
        // The coordinator ran: its output message exists after the failure.
        assert!(messages
            .iter()
            .any(|m| m.kind == MessageKind::Output && m.execution_order == 3));
    }

    #[tokio::test]
    async fn test_coordinator_continue_runs_second_iteration() {
        let llm = ScriptedLlm::new()
            .respond("planner-model", "plan 1")
            .respond("coder-model", "code 1")
            .respond("coordinator-model", "status 1")
            .respond("coordinator-model", "CONTINUE")
            .respond("planner-model", "plan 2")
            .respond("coder-model", "code 2")
            .respond("coordinator-model", "status 2")
            .respond("coordinator-model", "STOP");
        let f = fixture(llm, relaxed_limits(), true).await;

        let session = f.scheduler.start(request(f.team_id, 5)).await.unwrap();
        f.scheduler.run(session.id).await;

        let session = f.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.current_iteration, 2);
    }

    #[tokio::test]
    async fn test_max_iterations_completes_without_coordinator_stop() {
        // Coordinator keeps voting CONTINUE; the bound still ends the run.
        let mut llm = ScriptedLlm::new();
        for i in 0..3 {
            llm = llm
                .respond("planner-model", &format!("plan {}", i))
                .respond("coder-model", &format!("code {}", i))
                .respond("coordinator-model", "status")
                .respond("coordinator-model", "CONTINUE");
        }
        let f = fixture(llm, relaxed_limits(), true).await;

        let session = f.scheduler.start(request(f.team_id, 2)).await.unwrap();
        f.scheduler.run(session.id).await;

        let session = f.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.current_iteration, 2);
    }

    #[tokio::test]
    async fn test_pause_then_resume_transitions() {
        let llm = ScriptedLlm::new();
        let f = fixture(llm, relaxed_limits(), true).await;

        let session = f.scheduler.start(request(f.team_id, 3)).await.unwrap();
        let paused = f.scheduler.pause(session.id).await.unwrap();
        assert_eq!(paused.status, SessionStatus::Paused);

        let resumed = f.scheduler.resume(session.id).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Running);

        // Terminal states reject control signals.
        let other = f.scheduler.start(request(f.team_id, 3)).await.unwrap();
        f.scheduler.stop(other.id).await.unwrap();
        assert!(f.scheduler.resume(other.id).await.is_err());
        assert!(f.scheduler.pause(other.id).await.is_err());
    }

    #[tokio::test]
    async fn test_start_validates_team_and_owner() {
        let llm = ScriptedLlm::new();
        let f = fixture(llm, relaxed_limits(), true).await;

        let missing = f
            .scheduler
            .start(StartSessionRequest {
                team_id: Uuid::new_v4(),
                project_id: None,
                owner: "user".into(),
                prompt: "p".into(),
                max_iterations: 1,
            })
            .await;
        assert!(matches!(missing, Err(OrchestratorError::Validation(_))));

        let foreign = f
            .scheduler
            .start(StartSessionRequest {
                team_id: f.team_id,
                project_id: None,
                owner: "someone-else".into(),
                prompt: "p".into(),
                max_iterations: 1,
            })
            .await;
        assert!(matches!(foreign, Err(OrchestratorError::Validation(_))));
    }
}
