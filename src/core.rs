use crate::cache::DocumentCache;
use crate::editor::EditorCapability;
use crate::errors::{AppError, AppResult};
use crate::models::{
    ConfigSnapshot, ContainerSize, Document, DocumentKind, DocumentSummary, OpenDocument,
    WindowStateUpdate, WorkspaceOptions,
};
use crate::remote::RemoteStore;
use crate::sync::Synchronizer;
use crate::workspace::{DocumentWorkspace, WorkspaceEffect};
use chrono::{NaiveDate, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Owns every subsystem (cache, remote client, synchronizer, window
/// store) and exposes the operations the surrounding shell calls. All
/// window-store access goes through one mutex; guards are never held
/// across awaits.
pub struct WorkspaceCore {
    remote: Arc<RemoteStore>,
    sync: Arc<Synchronizer>,
    workspace: Mutex<DocumentWorkspace>,
    editor: Mutex<Option<Box<dyn EditorCapability>>>,
}

impl WorkspaceCore {
    pub fn new(data_dir: &Path, base_url: &str) -> AppResult<Self> {
        Self::with_options(data_dir, base_url, WorkspaceOptions::default())
    }

    /// Construct within a tokio runtime: the synchronizer captures the
    /// runtime handle so the synchronous surface stays callable from any
    /// thread afterwards.
    pub fn with_options(
        data_dir: &Path,
        base_url: &str,
        options: WorkspaceOptions,
    ) -> AppResult<Self> {
        let cache = Arc::new(DocumentCache::open(&data_dir.join(&options.cache_file))?);
        let remote = Arc::new(RemoteStore::with_policy(base_url, options.retry)?);
        let sync = Arc::new(Synchronizer::new(cache, Arc::clone(&remote), &options)?);
        Ok(Self {
            remote,
            sync,
            workspace: Mutex::new(DocumentWorkspace::new(options.container)),
            editor: Mutex::new(None),
        })
    }

    fn lock_workspace(&self) -> AppResult<MutexGuard<'_, DocumentWorkspace>> {
        self.workspace
            .lock()
            .map_err(|_| AppError::Internal("workspace mutex poisoned".to_string()))
    }

    fn handle_effect(&self, workspace: &DocumentWorkspace, effect: WorkspaceEffect) {
        match effect {
            WorkspaceEffect::None => {}
            WorkspaceEffect::SaveLayout => self.sync.schedule_config_save(workspace.snapshot()),
            WorkspaceEffect::SaveContent(document) => self.sync.schedule_content_save(document),
        }
    }

    /// Startup restore: loads the layout snapshot and the listing (cache
    /// fallback on failure), then reopens each persisted window with its
    /// saved geometry. A window whose content can no longer be loaded is
    /// skipped, logged, and dropped from the layout.
    pub async fn initialize(&self) -> AppResult<()> {
        let (snapshot, listing) = tokio::join!(
            self.sync.load_config_with_fallback(),
            self.sync.list_with_fallback()
        );
        match listing {
            Ok(listing) => tracing::info!(documents = listing.len(), "listing loaded"),
            Err(err) => tracing::warn!(error = %err, "listing unavailable at startup"),
        }

        let mut restored = Vec::new();
        for (id, persisted) in snapshot.open_windows {
            match self.sync.load_with_fallback(persisted.kind, &id).await {
                Ok(loaded) => {
                    let document = Document {
                        title: title_from_id(&id),
                        id,
                        kind: persisted.kind,
                        content: loaded.content,
                        created_at: loaded.modified_at,
                        modified_at: loaded.modified_at,
                        tags: Vec::new(),
                    };
                    restored.push((document, persisted.window));
                }
                Err(err) => {
                    tracing::warn!(id = %id, error = %err, "skipping unrestorable window");
                }
            }
        }

        let mut workspace = self.lock_workspace()?;
        for (document, window) in restored {
            workspace.open_restored(document, window);
        }
        tracing::info!(windows = workspace.len(), "workspace restored");
        Ok(())
    }

    /// Reconciliation pass when the application regains focus: deferred
    /// saves are flushed and newer-or-equal remote content is adopted
    /// into the open windows (and pushed to the editor).
    pub async fn on_focus_regained(&self) -> AppResult<()> {
        let open = self.lock_workspace()?.open_documents();
        if open.is_empty() {
            return Ok(());
        }
        let adopted = self.sync.reconcile(&open).await;
        if adopted.is_empty() {
            return Ok(());
        }
        let mut workspace = self.lock_workspace()?;
        for (id, remote_doc) in adopted {
            workspace.apply_remote_content(&id, remote_doc.content.clone(), remote_doc.modified_at);
            if let Ok(editor) = self.editor.lock() {
                if let Some(editor) = editor.as_ref() {
                    if let Err(err) = editor.set_content(&id, &remote_doc.content) {
                        tracing::warn!(id = %id, error = %err, "editor content push failed");
                    }
                }
            }
            tracing::info!(id = %id, "adopted remote content");
        }
        Ok(())
    }

    /// Opens a document in a window, loading content remote-first with
    /// cache fallback. Opening an already-open id activates its window.
    pub async fn open_document(&self, kind: DocumentKind, id: &str) -> AppResult<()> {
        {
            let mut workspace = self.lock_workspace()?;
            if workspace.contains(id) {
                let effect = if workspace
                    .get(id)
                    .map(|open| open.window.is_minimized)
                    .unwrap_or(false)
                {
                    workspace.restore(id)
                } else {
                    workspace.activate(id)
                };
                self.handle_effect(&workspace, effect);
                return Ok(());
            }
        }
        let loaded = self.sync.load_with_fallback(kind, id).await?;
        let document = Document {
            id: id.to_string(),
            kind,
            title: title_from_id(id),
            content: loaded.content,
            created_at: loaded.modified_at,
            modified_at: loaded.modified_at,
            tags: Vec::new(),
        };
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.open(document);
        self.handle_effect(&workspace, effect);
        Ok(())
    }

    /// Creates a journal entry for the given date (fresh uuid id), saves
    /// it immediately, and opens it. Returns the new id.
    pub async fn create_journal_entry(&self, date: NaiveDate) -> AppResult<String> {
        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4().to_string(),
            kind: DocumentKind::Journal,
            title: date.format("%Y-%m-%d").to_string(),
            content: String::new(),
            created_at: now,
            modified_at: now,
            tags: Vec::new(),
        };
        let receipt = self.remote.save_document(&document).await?;
        self.sync.record_saved(&document, receipt.modified_at);
        let id = document.id.clone();
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.open(document);
        self.handle_effect(&workspace, effect);
        Ok(id)
    }

    /// Creates an empty writing at the given path, saves it immediately,
    /// and opens it.
    pub async fn create_writing(&self, path: &str) -> AppResult<()> {
        let now = Utc::now();
        let document = Document {
            id: path.to_string(),
            kind: DocumentKind::Writing,
            title: title_from_id(path),
            content: String::new(),
            created_at: now,
            modified_at: now,
            tags: Vec::new(),
        };
        let receipt = self.remote.save_document(&document).await?;
        self.sync.record_saved(&document, receipt.modified_at);
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.open(document);
        self.handle_effect(&workspace, effect);
        Ok(())
    }

    pub async fn create_directory(&self, path: &str) -> AppResult<()> {
        self.remote.create_directory(path).await
    }

    /// Closes a window, flushing any pending edit before the channel is
    /// dropped.
    pub async fn close_document(&self, id: &str) -> AppResult<()> {
        self.sync.flush_and_close(id).await;
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.close(id);
        self.handle_effect(&workspace, effect);
        Ok(())
    }

    pub async fn close_all(&self) -> AppResult<()> {
        let ids = self.lock_workspace()?.open_ids();
        for id in &ids {
            self.sync.flush_and_close(id).await;
        }
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.close_all();
        self.handle_effect(&workspace, effect);
        Ok(())
    }

    pub fn update_content(&self, id: &str, content: String) -> AppResult<()> {
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.update_content(id, content);
        self.handle_effect(&workspace, effect);
        Ok(())
    }

    pub fn update_window_state(&self, id: &str, update: WindowStateUpdate) -> AppResult<()> {
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.update_window_state(id, update);
        self.handle_effect(&workspace, effect);
        Ok(())
    }

    pub fn activate(&self, id: &str) -> AppResult<()> {
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.activate(id);
        self.handle_effect(&workspace, effect);
        Ok(())
    }

    pub fn minimize(&self, id: &str) -> AppResult<()> {
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.minimize(id);
        self.handle_effect(&workspace, effect);
        Ok(())
    }

    pub fn restore(&self, id: &str) -> AppResult<()> {
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.restore(id);
        self.handle_effect(&workspace, effect);
        Ok(())
    }

    pub fn minimize_all(&self) -> AppResult<()> {
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.minimize_all();
        self.handle_effect(&workspace, effect);
        Ok(())
    }

    pub fn cascade(&self) -> AppResult<()> {
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.cascade();
        self.handle_effect(&workspace, effect);
        Ok(())
    }

    pub fn tile(&self) -> AppResult<()> {
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.tile();
        self.handle_effect(&workspace, effect);
        Ok(())
    }

    pub fn resize_container(&self, container: ContainerSize) -> AppResult<()> {
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.set_container(container);
        self.handle_effect(&workspace, effect);
        Ok(())
    }

    /// Renames a writing. The remote move happens first so a destination
    /// conflict surfaces before any local state changes; on success the
    /// window is re-keyed and the stale cache entry dropped.
    pub async fn rename_document(
        &self,
        old_id: &str,
        new_id: &str,
        overwrite: bool,
    ) -> AppResult<()> {
        if let Some(open) = self.lock_workspace()?.get(old_id) {
            if open.document.kind == DocumentKind::Journal {
                return Err(AppError::Validation(
                    "journal entries cannot be renamed".to_string(),
                ));
            }
        }
        self.sync.flush_and_close(old_id).await;
        self.remote.move_document(old_id, new_id, overwrite).await?;
        self.sync.invalidate_document(old_id)?;
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.rename(old_id, new_id);
        self.handle_effect(&workspace, effect);
        Ok(())
    }

    /// Deletes a document remotely, closes its window, and drops its
    /// cache entries. A remote not-found is treated as already deleted.
    pub async fn delete_document(&self, kind: DocumentKind, id: &str) -> AppResult<()> {
        self.sync.cancel_document(id);
        match self.remote.delete_document(kind, id).await {
            Ok(()) => {}
            Err(AppError::NotFound(_)) => {
                tracing::debug!(id, "document already absent on delete");
            }
            Err(err) => return Err(err),
        }
        self.sync.invalidate_document(id)?;
        let mut workspace = self.lock_workspace()?;
        let effect = workspace.close(id);
        self.handle_effect(&workspace, effect);
        Ok(())
    }

    pub async fn list_documents(&self) -> AppResult<Vec<DocumentSummary>> {
        self.sync.list_with_fallback().await
    }

    pub fn open_snapshot(&self) -> AppResult<ConfigSnapshot> {
        Ok(self.lock_workspace()?.snapshot())
    }

    pub fn open_window(&self, id: &str) -> AppResult<Option<OpenDocument>> {
        Ok(self.lock_workspace()?.get(id).cloned())
    }

    pub fn attach_editor(&self, editor: Box<dyn EditorCapability>) -> AppResult<()> {
        *self
            .editor
            .lock()
            .map_err(|_| AppError::Internal("editor mutex poisoned".to_string()))? = Some(editor);
        Ok(())
    }

    /// Focuses a document's editor and brings its window to the front.
    pub fn focus_document(&self, id: &str) -> AppResult<()> {
        {
            let editor = self
                .editor
                .lock()
                .map_err(|_| AppError::Internal("editor mutex poisoned".to_string()))?;
            if let Some(editor) = editor.as_ref() {
                editor.focus(id)?;
            }
        }
        self.activate(id)
    }

    /// Pulls the editor's current content for a document into the store,
    /// scheduling a save if it changed anything.
    pub fn sync_editor_content(&self, id: &str) -> AppResult<()> {
        let content = {
            let editor = self
                .editor
                .lock()
                .map_err(|_| AppError::Internal("editor mutex poisoned".to_string()))?;
            match editor.as_ref() {
                Some(editor) => editor.get_content(id)?,
                None => return Ok(()),
            }
        };
        self.update_content(id, content)
    }

    /// Cancels every pending save without sending. Called on exit.
    pub fn shutdown(&self) {
        self.sync.cancel_all();
        tracing::info!("workspace shut down");
    }
}

fn title_from_id(id: &str) -> String {
    id.rsplit('/').next().unwrap_or(id).to_string()
}
