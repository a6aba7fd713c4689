//! Degraded-mode recovery: one agent, no pipeline, no tool actions.
//!
//! When a session cannot complete, the original prompt is replayed through
//! a single agent against a caller-chosen provider and the answer is
//! upserted into the session's one FallbackRecord. Partial pipeline
//! progress is deliberately not reconciled.

use std::sync::Arc;

use uuid::Uuid;

use crate::credentials::Credentials;
use crate::error::{OrchestratorError, Result};
use crate::llm::{ChatMessage, LlmClient, Provider};
use crate::model::{now_string, FallbackRecord, SessionStatus};
use crate::progress::{Progress, ProgressEvent, ProgressPhase};
use crate::store::SharedStore;

const FALLBACK_SYSTEM_PROMPT: &str = "You are a software generation assistant. \
The multi-agent pipeline for this task could not complete, so answer the \
task directly and completely in one response.";

/// Default model per provider when the caller does not pick one.
fn default_model(provider: &Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "gpt-4o-mini",
        Provider::Anthropic => "claude-3-5-haiku",
        Provider::Google => "gemini-2.0-flash",
        Provider::Custom(_) => "default",
    }
}

pub struct FallbackHandler {
    store: SharedStore,
    llm: Arc<dyn LlmClient>,
    credentials: Arc<dyn Credentials>,
    progress: Arc<dyn Progress>,
}

impl FallbackHandler {
    pub fn new(
        store: SharedStore,
        llm: Arc<dyn LlmClient>,
        credentials: Arc<dyn Credentials>,
        progress: Arc<dyn Progress>,
    ) -> Self {
        Self {
            store,
            llm,
            credentials,
            progress,
        }
    }

    /// Replay the session's original prompt through one agent. Usable only
    /// on a non-completed session; reruns overwrite the record.
    pub async fn run(
        &self,
        session_id: Uuid,
        provider: Provider,
        model: Option<String>,
    ) -> Result<FallbackRecord> {
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

        if session.status == SessionStatus::Completed {
            return Err(OrchestratorError::Validation(
                "session completed normally; fallback is not applicable".to_string(),
            ));
        }
        if session.status != SessionStatus::Failed {
            // The session is abandoned to the fallback path; this is the one
            // place a paused session moves to failed.
            self.store
                .set_session_status(session_id, SessionStatus::Failed)
                .await
                .map_err(OrchestratorError::Store)?;
        }

        let Some(credential) = self.credentials.get(&session.owner, &provider).await else {
            return Err(OrchestratorError::Credential(format!(
                "no credential configured for provider {}",
                provider
            )));
        };

        let model = model.unwrap_or_else(|| default_model(&provider).to_string());
        let messages = [
            ChatMessage::system(FALLBACK_SYSTEM_PROMPT),
            ChatMessage::user(&session.initial_prompt),
        ];
        let response = self
            .llm
            .complete(&provider, &credential, &messages, &model)
            .await?;

        let record = FallbackRecord {
            session_id,
            provider,
            response: response.text,
            created_at: now_string(),
            updated_at: now_string(),
        };
        self.store
            .upsert_fallback(&record)
            .await
            .map_err(OrchestratorError::Store)?;

        self.progress.emit(ProgressEvent {
            project_id: session.project_id,
            session_id,
            agent_name: None,
            text: "fallback response recorded".to_string(),
            phase: ProgressPhase::Fallback,
            timestamp: now_string(),
        });

        self.store
            .get_fallback(session_id)
            .await
            .map_err(OrchestratorError::Store)?
            .ok_or_else(|| OrchestratorError::Store("fallback record vanished".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::testing::StaticCredentials;
    use crate::llm::testing::ScriptedLlm;
    use crate::model::{Session, Team};
    use crate::progress::ProgressHub;
    use crate::store::{InMemoryStore, Store};

    async fn seed_session(store: &dyn Store, status: SessionStatus) -> Session {
        let team = Team {
            id: Uuid::new_v4(),
            owner: "user".into(),
            project_id: None,
            name: "t".into(),
            is_active: true,
            budget_limit_cents: 100,
            budget_used_cents: 0,
            created_at: now_string(),
            updated_at: now_string(),
        };
        store.create_team(&team).await.unwrap();
        let session = Session {
            id: Uuid::new_v4(),
            team_id: team.id,
            project_id: None,
            owner: "user".into(),
            initial_prompt: "build a todo app".into(),
            status,
            current_iteration: 1,
            max_iterations: 3,
            total_cost_cents: 0,
            version: 0,
            created_at: now_string(),
            updated_at: now_string(),
        };
        store.create_session(&session).await.unwrap();
        session
    }

    fn handler(store: SharedStore, llm: ScriptedLlm) -> FallbackHandler {
        FallbackHandler::new(
            store,
            Arc::new(llm),
            Arc::new(StaticCredentials::new().with("user", &Provider::OpenAi, "sk")),
            Arc::new(ProgressHub::default()),
        )
    }

    #[tokio::test]
    async fn test_fallback_marks_failed_and_records_response() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let session = seed_session(store.as_ref(), SessionStatus::Paused).await;
        let llm = ScriptedLlm::new().respond("gpt-4o-mini", "here is a todo app");

        let record = handler(store.clone(), llm)
            .run(session.id, Provider::OpenAi, None)
            .await
            .unwrap();

        assert_eq!(record.response, "here is a todo app");
        let session = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn test_fallback_rejected_on_completed_session() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let session = seed_session(store.as_ref(), SessionStatus::Completed).await;

        let result = handler(store, ScriptedLlm::new())
            .run(session.id, Provider::OpenAi, None)
            .await;
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }

    #[tokio::test]
    async fn test_fallback_rerun_overwrites() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let session = seed_session(store.as_ref(), SessionStatus::Failed).await;
        let llm = ScriptedLlm::new()
            .respond("gpt-4o-mini", "first attempt")
            .respond("gpt-4o-mini", "second attempt");
        let handler = handler(store.clone(), llm);

        handler
            .run(session.id, Provider::OpenAi, None)
            .await
            .unwrap();
        let record = handler
            .run(session.id, Provider::OpenAi, None)
            .await
            .unwrap();

        assert_eq!(record.response, "second attempt");
        let stored = store.get_fallback(session.id).await.unwrap().unwrap();
        assert_eq!(stored.response, "second attempt");
    }

    #[tokio::test]
    async fn test_missing_credential_is_credential_error() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let session = seed_session(store.as_ref(), SessionStatus::Failed).await;

        let result = handler(store, ScriptedLlm::new())
            .run(session.id, Provider::Anthropic, None)
            .await;
        assert!(matches!(result, Err(OrchestratorError::Credential(_))));
    }
}
