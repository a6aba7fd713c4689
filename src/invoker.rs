//! Agent invoker: one agent's turn of the pipeline.
//!
//! Builds the role-specific prompt, resolves the credential, calls the LLM
//! capability, extracts and applies tool actions, and estimates cost. All
//! failure paths fold into [`InvokeOutcome`]; the scheduler decides what a
//! failure means for the session.

use std::sync::Arc;

use crate::actions::{self, ActionRequest};
use crate::credentials::Credentials;
use crate::llm::{ChatMessage, LlmClient, Provider, ProviderError};
use crate::model::{Agent, AgentRole, Session};
use crate::store::SharedStore;
use crate::workspace::Workspace;

/// Assumed output size when estimating cost before a call is made.
const ESTIMATED_OUTPUT_CHARS: usize = 2_000;

/// Result of invoking one agent.
#[derive(Debug)]
pub enum InvokeOutcome {
    Success {
        /// Agent output, with applied-action results appended so the next
        /// agent sees what changed
        output: String,
        cost_cents: u64,
        tokens: u64,
        /// Result line per applied tool action (empty when none requested)
        action_results: Vec<String>,
    },
    Failure(InvokeFailure),
}

/// Why an invocation failed.
#[derive(Debug)]
pub enum InvokeFailure {
    /// No credential configured for the agent's provider. Critical.
    MissingCredential { provider: Provider },
    /// The provider call failed; severity follows the structured kind.
    Provider(ProviderError),
}

impl InvokeFailure {
    /// Critical failures halt the session.
    pub fn is_critical(&self) -> bool {
        match self {
            Self::MissingCredential { .. } => true,
            Self::Provider(e) => e.is_critical(),
        }
    }

    /// Rate/budget provider conditions pause the session instead.
    pub fn pauses_session(&self) -> bool {
        match self {
            Self::MissingCredential { .. } => false,
            Self::Provider(e) => e.pauses_session(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::MissingCredential { provider } => {
                format!("no credential configured for provider {}", provider)
            }
            Self::Provider(e) => e.to_string(),
        }
    }
}

/// Estimate tokens from characters (4 chars per token proxy).
pub fn estimate_tokens(chars: usize) -> u64 {
    (chars as u64).div_ceil(4)
}

/// Estimate cost in cents for a token count at the provider's fixed rate.
pub fn estimate_cost_cents(provider: &Provider, tokens: u64) -> u64 {
    let centicents = tokens
        .saturating_mul(provider.rate_per_1k_tokens_centicents())
        .div_ceil(1_000);
    centicents.div_ceil(100).max(1)
}

/// Cost estimate for a turn that has not run yet, used by guard pre-checks.
pub fn estimate_turn_cost_cents(provider: &Provider, context_chars: usize) -> u64 {
    estimate_cost_cents(
        provider,
        estimate_tokens(context_chars + ESTIMATED_OUTPUT_CHARS),
    )
}

/// Executes single agent turns.
pub struct AgentInvoker {
    llm: Arc<dyn LlmClient>,
    credentials: Arc<dyn Credentials>,
    workspace: Arc<dyn Workspace>,
    store: SharedStore,
}

impl AgentInvoker {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        credentials: Arc<dyn Credentials>,
        workspace: Arc<dyn Workspace>,
        store: SharedStore,
    ) -> Self {
        Self {
            llm,
            credentials,
            workspace,
            store,
        }
    }

    /// Run one agent turn against the current context.
    pub async fn invoke(&self, agent: &Agent, context: &str, session: &Session) -> InvokeOutcome {
        let system_prompt = self.build_system_prompt(agent).await;
        let user_prompt = build_user_prompt(session, context);

        let Some(credential) = self.credentials.get(&session.owner, &agent.provider).await
        else {
            return InvokeOutcome::Failure(InvokeFailure::MissingCredential {
                provider: agent.provider.clone(),
            });
        };

        let messages = [
            ChatMessage::system(&system_prompt),
            ChatMessage::user(&user_prompt),
        ];

        tracing::debug!(agent = %agent.name, role = %agent.current_role, "Invoking agent");
        let response = match self
            .llm
            .complete(&agent.provider, &credential, &messages, &agent.model)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(agent = %agent.name, "Provider call failed: {}", e);
                return InvokeOutcome::Failure(InvokeFailure::Provider(e));
            }
        };

        let tokens = estimate_tokens(
            system_prompt.len() + user_prompt.len() + response.text.len(),
        );
        let cost_cents = estimate_cost_cents(&agent.provider, tokens);

        let mut output = response.text;
        let requested = actions::extract(&output);
        let action_results = self.apply_actions(session, &requested).await;
        if !action_results.is_empty() {
            output.push_str("\n\nApplied actions:\n");
            for line in &action_results {
                output.push_str("- ");
                output.push_str(line);
                output.push('\n');
            }
        }

        InvokeOutcome::Success {
            output,
            cost_cents,
            tokens,
            action_results,
        }
    }

    /// Ask an agent a constrained question outside the pipeline: no tool
    /// actions, no cost accrual. Used for the coordinator's continue/stop
    /// vote.
    pub async fn ask(
        &self,
        agent: &Agent,
        question: &str,
        session: &Session,
    ) -> Result<String, InvokeFailure> {
        let Some(credential) = self.credentials.get(&session.owner, &agent.provider).await
        else {
            return Err(InvokeFailure::MissingCredential {
                provider: agent.provider.clone(),
            });
        };
        let messages = [
            ChatMessage::system(role_instructions(&agent.current_role)),
            ChatMessage::user(question),
        ];
        self.llm
            .complete(&agent.provider, &credential, &messages, &agent.model)
            .await
            .map(|r| r.text)
            .map_err(InvokeFailure::Provider)
    }

    /// Role instructions + action-format specification + the agent's own
    /// prompt (persona template first when one is linked).
    async fn build_system_prompt(&self, agent: &Agent) -> String {
        let mut prompt = String::new();
        prompt.push_str(role_instructions(&agent.current_role));
        prompt.push_str("\n\n");
        prompt.push_str(ACTION_FORMAT_SPEC);

        if let Some(persona_id) = agent.persona_id {
            // Persona lookup failures degrade to the agent's own prompt.
            match self.store.get_persona(persona_id).await {
                Ok(Some(persona)) => {
                    prompt.push_str("\n\n");
                    prompt.push_str(&persona.prompt_template);
                    if let Err(e) = self.store.increment_persona_usage(persona_id).await {
                        tracing::debug!("Persona usage increment failed: {}", e);
                    }
                }
                Ok(None) => {
                    tracing::debug!(agent = %agent.name, %persona_id, "Linked persona not found");
                }
                Err(e) => tracing::warn!("Persona lookup failed: {}", e),
            }
        }

        if !agent.system_prompt.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&agent.system_prompt);
        }
        prompt
    }

    async fn apply_actions(&self, session: &Session, requested: &[ActionRequest]) -> Vec<String> {
        if requested.is_empty() {
            return Vec::new();
        }
        let Some(project_id) = session.project_id else {
            tracing::warn!(session = %session.id, "Tool actions requested but session has no project");
            return requested
                .iter()
                .map(|a| format!("{}: skipped (no project)", a.describe()))
                .collect();
        };
        match self.workspace.apply_files(project_id, requested).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(session = %session.id, "Workspace unavailable: {}", e);
                vec![format!("workspace unavailable: {}", e)]
            }
        }
    }
}

fn build_user_prompt(session: &Session, context: &str) -> String {
    format!(
        "Task: {}\n\nIteration {} of {}.\n\nCurrent context from previous agents:\n{}",
        session.initial_prompt,
        session.current_iteration,
        session.max_iterations,
        if context.is_empty() {
            "(none yet - you are first)"
        } else {
            context
        },
    )
}

fn role_instructions(role: &AgentRole) -> &'static str {
    match role {
        AgentRole::Planner => {
            "You are the planning agent of a software team. Break the task into \
             concrete implementation steps, name the files to create, and keep \
             the plan short enough for the next agent to act on directly."
        }
        AgentRole::Coder => {
            "You are the coding agent of a software team. Implement the plan from \
             the context by emitting complete file contents through the action \
             format below. Prefer working code over commentary."
        }
        AgentRole::Tester => {
            "You are the testing agent of a software team. Inspect the context for \
             defects, write tests for the implemented behavior, and report \
             anything broken precisely."
        }
        AgentRole::Reviewer => {
            "You are the reviewing agent of a software team. Critique the work in \
             the context: correctness first, then clarity. Propose fixes as \
             concrete file changes when needed."
        }
        AgentRole::Coordinator => {
            "You are the coordinating agent of a software team. Assess the overall \
             progress in the context and direct what the team should focus on \
             next."
        }
        AgentRole::Custom(_) => {
            "You are a specialist agent of a software team. Apply your configured \
             expertise to move the task forward."
        }
    }
}

const ACTION_FORMAT_SPEC: &str = "\
To request file operations, end your reply with one fenced block tagged \
`actions` containing a JSON array, for example:\n\
```actions\n\
[{\"action\": \"create_file\", \"path\": \"src/app.js\", \"content\": \"...\"},\n \
{\"action\": \"build\"}]\n\
```\n\
Supported actions: create_file, update_file, delete_file (path only), build, \
preview (with \"framework\"). Omit the block when no changes are needed.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::testing::StaticCredentials;
    use crate::llm::testing::ScriptedLlm;
    use crate::model::{now_string, SessionStatus};
    use crate::store::InMemoryStore;
    use crate::workspace::LocalWorkspace;
    use uuid::Uuid;

    fn sample_agent(provider: Provider, model: &str) -> Agent {
        Agent {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            name: "coder".into(),
            role: AgentRole::Coder,
            current_role: AgentRole::Coder,
            provider,
            model: model.into(),
            system_prompt: "Keep output minimal.".into(),
            execution_order: 1,
            enabled: true,
            adaptive: false,
            allowed_roles: vec![],
            persona_id: None,
            created_at: now_string(),
        }
    }

    fn sample_session(project_id: Option<Uuid>) -> Session {
        Session {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            project_id,
            owner: "user".into(),
            initial_prompt: "build a todo app".into(),
            status: SessionStatus::Running,
            current_iteration: 1,
            max_iterations: 3,
            total_cost_cents: 0,
            version: 0,
            created_at: now_string(),
            updated_at: now_string(),
        }
    }

    fn invoker(llm: ScriptedLlm, dir: &std::path::Path) -> AgentInvoker {
        AgentInvoker::new(
            Arc::new(llm),
            Arc::new(
                StaticCredentials::new()
                    .with("user", &Provider::OpenAi, "sk-test")
                    .with("user", &Provider::Anthropic, "sk-ant"),
            ),
            Arc::new(LocalWorkspace::new(dir)),
            Arc::new(InMemoryStore::new()),
        )
    }

    #[test]
    fn test_cost_estimate_is_proportional() {
        let small = estimate_cost_cents(&Provider::OpenAi, 1_000);
        let large = estimate_cost_cents(&Provider::OpenAi, 10_000);
        assert!(large > small);
        // Minimum one cent so the ledger never records free work.
        assert_eq!(estimate_cost_cents(&Provider::OpenAi, 1), 1);
    }

    #[tokio::test]
    async fn test_successful_turn_applies_actions() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new().respond(
            "gpt-test",
            "Done.\n\n```actions\n[{\"action\": \"create_file\", \"path\": \"app.js\", \"content\": \"x\"}]\n```",
        );
        let invoker = invoker(llm, dir.path());
        let project = Uuid::new_v4();
        let session = sample_session(Some(project));
        let agent = sample_agent(Provider::OpenAi, "gpt-test");

        match invoker.invoke(&agent, "", &session).await {
            InvokeOutcome::Success {
                output,
                cost_cents,
                action_results,
                ..
            } => {
                assert!(cost_cents >= 1);
                assert_eq!(action_results.len(), 1);
                assert!(output.contains("Applied actions:"), "{}", output);
                assert!(dir.path().join(project.to_string()).join("app.js").exists());
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_credential_is_critical() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new();
        let invoker = invoker(llm, dir.path());
        let session = sample_session(None);
        let agent = sample_agent(Provider::Google, "gemini-test");

        match invoker.invoke(&agent, "ctx", &session).await {
            InvokeOutcome::Failure(f) => {
                assert!(f.is_critical());
                assert!(!f.pauses_session());
                assert!(f.message().contains("google"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_provider_failure_severity_follows_kind() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new()
            .fail("gpt-test", ProviderError::transient("upstream 503"))
            .fail("gpt-test", ProviderError::rate_limited("slow down", None));
        let invoker = invoker(llm, dir.path());
        let session = sample_session(None);
        let agent = sample_agent(Provider::OpenAi, "gpt-test");

        match invoker.invoke(&agent, "", &session).await {
            InvokeOutcome::Failure(f) => {
                assert!(!f.is_critical());
                assert!(!f.pauses_session());
            }
            other => panic!("expected failure, got {:?}", other),
        }
        match invoker.invoke(&agent, "", &session).await {
            InvokeOutcome::Failure(f) => {
                assert!(!f.is_critical());
                assert!(f.pauses_session());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_prompt_embeds_context_and_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::new().respond("gpt-test", "fine"));
        let invoker = AgentInvoker::new(
            llm.clone(),
            Arc::new(StaticCredentials::new().with("user", &Provider::OpenAi, "k")),
            Arc::new(LocalWorkspace::new(dir.path())),
            Arc::new(InMemoryStore::new()),
        );
        let session = sample_session(None);
        let agent = sample_agent(Provider::OpenAi, "gpt-test");

        invoker.invoke(&agent, "the plan is X", &session).await;
        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        let user = &calls[0].messages[1].content;
        assert!(user.contains("build a todo app"));
        assert!(user.contains("Iteration 1 of 3"));
        assert!(user.contains("the plan is X"));
    }
}
