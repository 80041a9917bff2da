use crate::atomic_write::{sibling_path, AtomicWriter};
use crate::config::StoreConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{base36, random_base36, CreateWorkspaceRequest, UpdateWorkspaceRequest, Workspace, WorkspaceSummary};
use crate::serial_queue::PathQueue;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of a serialized transform: write the document back, or leave it as is.
pub(crate) enum Edit<R> {
    Commit(R),
    Discard(R),
}

/// One pretty-printed JSON document per workspace under `root`, every write
/// funnelled through the per-path queue.
#[derive(Clone)]
pub struct WorkspaceStore {
    root: Arc<PathBuf>,
    queue: PathQueue,
    writer: AtomicWriter,
}

impl WorkspaceStore {
    /// Opens the data root from config, sharing the process-wide queue.
    ///
    /// The root is canonicalized so every spelling of the same directory
    /// lands on the same queue slots.
    pub fn open(config: &StoreConfig) -> AppResult<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|error| AppError::Io(format!("creating {}: {}", config.data_dir.display(), error)))?;
        let root = std::fs::canonicalize(&config.data_dir)
            .map_err(|error| AppError::Io(format!("resolving {}: {}", config.data_dir.display(), error)))?;
        Ok(Self::with_queue(
            root,
            PathQueue::process_wide(),
            AtomicWriter::new(config.backups),
        ))
    }

    pub fn with_queue(root: PathBuf, queue: PathQueue, writer: AtomicWriter) -> Self {
        Self {
            root: Arc::new(root),
            queue,
            writer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn queue(&self) -> &PathQueue {
        &self.queue
    }

    /// `<root>/<id>.json`, or `None` for ids outside the workspace id alphabet.
    pub fn document_path(&self, id: &str) -> Option<PathBuf> {
        is_valid_id(id).then(|| self.root.join(format!("{id}.json")))
    }

    pub async fn create(&self, request: CreateWorkspaceRequest) -> AppResult<Workspace> {
        let now = Utc::now();
        let workspace = Workspace {
            id: new_workspace_id(now),
            name: request.name,
            description: request.description,
            created_at: now,
            updated_at: now,
            forms_data: request.forms_data,
            file_name: request.file_name,
            scoring_criteria: None,
            scores: None,
            comments: None,
            question_titles: None,
            auto_correct_mask: None,
        };
        let path = self.root.join(format!("{}.json", workspace.id));

        let writer = self.writer;
        self.queue
            .run(&path, || writer.write_json(&path, &workspace))
            .await?;

        tracing::info!(
            workspace_id = %workspace.id,
            file_name = %workspace.file_name,
            responses = workspace.forms_data.total_responses,
            "workspace created"
        );
        Ok(workspace)
    }

    pub async fn get(&self, id: &str) -> AppResult<Option<Workspace>> {
        let Some(path) = self.document_path(id) else {
            return Ok(None);
        };
        read_document(&path).await
    }

    /// Summaries of every readable document, most recently updated first.
    pub async fn list(&self) -> AppResult<Vec<WorkspaceSummary>> {
        let mut entries = match tokio::fs::read_dir(self.root.as_path()).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(AppError::Io(format!("listing {}: {}", self.root.display(), error)))
            }
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|value| value.to_str()) != Some("json") {
                continue;
            }
            match read_document(&path).await {
                Ok(Some(workspace)) => summaries.push(workspace.summary()),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "skipping unreadable workspace file");
                }
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// `Ok(false)` when there was nothing to delete.
    pub async fn delete(&self, id: &str) -> AppResult<bool> {
        let Some(path) = self.document_path(id) else {
            return Ok(false);
        };

        let removed = self.queue.run(&path, || remove_document(&path)).await?;

        if removed {
            tracing::info!(workspace_id = %id, "workspace deleted");
        }
        Ok(removed)
    }

    pub async fn update(&self, id: &str, request: UpdateWorkspaceRequest) -> AppResult<Option<Workspace>> {
        self.mutate(id, |workspace| {
            if let Some(name) = request.name {
                workspace.name = name;
            }
            if let Some(description) = request.description {
                workspace.description = Some(description);
            }
        })
        .await
    }

    /// Serialized read-modify-write that always writes the transformed document.
    pub(crate) async fn mutate<F>(&self, id: &str, transform: F) -> AppResult<Option<Workspace>>
    where
        F: FnOnce(&mut Workspace),
    {
        let edited = self
            .edit(id, |workspace| {
                transform(workspace);
                Edit::Commit(())
            })
            .await?;
        Ok(edited.map(|(workspace, ())| workspace))
    }

    /// Reads the document, applies `transform` and writes it back if asked to,
    /// all inside the document's queue slot. `Ok(None)` when the workspace is missing.
    pub(crate) async fn edit<R, F>(&self, id: &str, transform: F) -> AppResult<Option<(Workspace, R)>>
    where
        F: FnOnce(&mut Workspace) -> Edit<R>,
    {
        let Some(path) = self.document_path(id) else {
            return Ok(None);
        };
        let writer = self.writer;
        self.queue
            .run(&path, || edit_locked(&path, writer, transform))
            .await
    }
}

async fn edit_locked<R, F>(path: &Path, writer: AtomicWriter, transform: F) -> AppResult<Option<(Workspace, R)>>
where
    F: FnOnce(&mut Workspace) -> Edit<R>,
{
    let Some(mut workspace) = read_document(path).await? else {
        return Ok(None);
    };
    match transform(&mut workspace) {
        Edit::Commit(value) => {
            workspace.touch();
            writer.write_json(path, &workspace).await?;
            Ok(Some((workspace, value)))
        }
        Edit::Discard(value) => Ok(Some((workspace, value))),
    }
}

async fn remove_document(path: &Path) -> AppResult<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(sibling_path(path, "bak")).await;
            Ok(true)
        }
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
        Err(error) => Err(AppError::Io(format!("removing {}: {}", path.display(), error))),
    }
}

/// Missing and unparsable documents read as `None`; other I/O errors propagate.
async fn read_document(path: &Path) -> AppResult<Option<Workspace>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(AppError::Io(format!("reading {}: {}", path.display(), error))),
    };
    match serde_json::from_slice(&bytes) {
        Ok(workspace) => Ok(Some(workspace)),
        Err(error) => {
            tracing::warn!(path = %path.display(), error = %error, "malformed workspace document");
            Ok(None)
        }
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

/// `ws_<base36 millis>_<6 random base36>`. No check against existing ids.
fn new_workspace_id(now: DateTime<Utc>) -> String {
    format!(
        "ws_{}_{}",
        base36(now.timestamp_millis().max(0) as u64),
        random_base36(6)
    )
}
