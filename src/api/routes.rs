//! Router assembly and shared application state.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::credentials::{Credentials, EnvCredentials};
use crate::fallback::FallbackHandler;
use crate::guard::RateBudgetGuard;
use crate::invoker::AgentInvoker;
use crate::llm::{HttpLlmClient, LlmClient};
use crate::progress::ProgressHub;
use crate::roles::RoleEngine;
use crate::scheduler::SessionScheduler;
use crate::store::{SharedStore, SqliteStore};
use crate::workspace::{LocalWorkspace, Workspace};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: SharedStore,
    pub scheduler: Arc<SessionScheduler>,
    pub roles: RoleEngine,
    pub fallback: FallbackHandler,
    pub progress: Arc<ProgressHub>,
}

impl AppState {
    /// Wire the core against the given capability implementations.
    pub fn new(
        config: Config,
        store: SharedStore,
        llm: Arc<dyn LlmClient>,
        credentials: Arc<dyn Credentials>,
        workspace: Arc<dyn Workspace>,
    ) -> Self {
        let progress = Arc::new(ProgressHub::default());
        let guard = Arc::new(RateBudgetGuard::new(config.guard_limits.clone()));
        let invoker = Arc::new(AgentInvoker::new(
            llm.clone(),
            credentials.clone(),
            workspace,
            store.clone(),
        ));
        let scheduler = Arc::new(SessionScheduler::new(
            store.clone(),
            guard,
            invoker,
            progress.clone(),
        ));
        let roles = RoleEngine::new(store.clone());
        let fallback = FallbackHandler::new(store.clone(), llm, credentials, progress.clone());

        Self {
            config,
            store,
            scheduler,
            roles,
            fallback,
            progress,
        }
    }
}

/// Build the API router over an existing state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/teams", super::teams::routes())
        .nest("/api/personas", super::personas::routes())
        .nest("/api/sessions", super::sessions::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server with the default capability wiring.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store: SharedStore = Arc::new(
        SqliteStore::new(config.db_path.clone())
            .await
            .map_err(|e| anyhow::anyhow!(e))?,
    );
    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        Arc::new(HttpLlmClient::new()),
        Arc::new(EnvCredentials),
        Arc::new(LocalWorkspace::new(config.workspace_root.clone())),
    ));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
