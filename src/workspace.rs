//! Workspace capability: applying extracted file operations to a project.
//!
//! The real build/preview pipeline and static serving live in the
//! surrounding system; the core consumes this contract and ships a
//! local-directory implementation so file actions have somewhere to land.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use crate::actions::ActionRequest;

/// Applies tool actions for a project and drives build/preview.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Apply file operations in order, returning one human-readable result
    /// line per action. Individual failures are reported in the result
    /// lines; only a wholly unusable workspace is an `Err`.
    async fn apply_files(
        &self,
        project_id: Uuid,
        actions: &[ActionRequest],
    ) -> Result<Vec<String>, String>;

    /// Kick off a build for the project.
    async fn build(&self, project_id: Uuid) -> Result<String, String>;

    /// Start a preview and return its URL.
    async fn preview(&self, project_id: Uuid, framework: &str) -> Result<String, String>;
}

/// Local-filesystem workspace rooted at a base directory, one subdirectory
/// per project.
pub struct LocalWorkspace {
    root: PathBuf,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn project_dir(&self, project_id: Uuid) -> PathBuf {
        self.root.join(project_id.to_string())
    }

    /// Resolve a relative path inside the project dir, rejecting traversal.
    fn resolve(&self, project_id: Uuid, rel: &str) -> Result<PathBuf, String> {
        let rel_path = Path::new(rel);
        if rel_path.is_absolute()
            || rel_path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(format!("unsafe path: {}", rel));
        }
        Ok(self.project_dir(project_id).join(rel_path))
    }

    async fn write_file(&self, project_id: Uuid, rel: &str, content: &str) -> Result<(), String> {
        let path = self.resolve(project_id, rel)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("mkdir {}: {}", parent.display(), e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| format!("write {}: {}", rel, e))
    }
}

#[async_trait]
impl Workspace for LocalWorkspace {
    async fn apply_files(
        &self,
        project_id: Uuid,
        actions: &[ActionRequest],
    ) -> Result<Vec<String>, String> {
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            let line = match action {
                ActionRequest::CreateFile { path, content }
                | ActionRequest::UpdateFile { path, content } => {
                    match self.write_file(project_id, path, content).await {
                        Ok(()) => format!("{}: ok", action.describe()),
                        Err(e) => format!("{}: failed ({})", action.describe(), e),
                    }
                }
                ActionRequest::DeleteFile { path } => match self.resolve(project_id, path) {
                    Ok(abs) => match tokio::fs::remove_file(&abs).await {
                        Ok(()) => format!("delete {}: ok", path),
                        Err(e) => format!("delete {}: failed ({})", path, e),
                    },
                    Err(e) => format!("delete {}: failed ({})", path, e),
                },
                ActionRequest::Build => match self.build(project_id).await {
                    Ok(msg) => format!("build: {}", msg),
                    Err(e) => format!("build: failed ({})", e),
                },
                ActionRequest::Preview { framework } => {
                    match self.preview(project_id, framework).await {
                        Ok(url) => format!("preview: {}", url),
                        Err(e) => format!("preview: failed ({})", e),
                    }
                }
            };
            results.push(line);
        }
        Ok(results)
    }

    async fn build(&self, project_id: Uuid) -> Result<String, String> {
        // Build execution belongs to the surrounding system; acknowledging
        // the request keeps the agent transcript truthful.
        tracing::info!(%project_id, "Build requested");
        Ok("build requested".to_string())
    }

    async fn preview(&self, project_id: Uuid, framework: &str) -> Result<String, String> {
        tracing::info!(%project_id, framework, "Preview requested");
        Ok(format!("/preview/{}", project_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_create_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path());
        let project = Uuid::new_v4();

        let results = ws
            .apply_files(
                project,
                &[ActionRequest::CreateFile {
                    path: "src/app.js".into(),
                    content: "x".into(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].ends_with("ok"), "{}", results[0]);
        assert!(dir
            .path()
            .join(project.to_string())
            .join("src/app.js")
            .exists());

        let results = ws
            .apply_files(project, &[ActionRequest::DeleteFile { path: "src/app.js".into() }])
            .await
            .unwrap();
        assert!(results[0].contains("ok"));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path());
        let results = ws
            .apply_files(
                Uuid::new_v4(),
                &[ActionRequest::CreateFile {
                    path: "../escape.txt".into(),
                    content: "x".into(),
                }],
            )
            .await
            .unwrap();
        assert!(results[0].contains("failed"));
        assert!(!dir.path().join("../escape.txt").exists());
    }
}
