use crate::layout;
use crate::models::{
    ConfigSnapshot, ContainerSize, Document, OpenDocument, PersistedWindow, SavedGeometry,
    WindowState, WindowStateUpdate, MIN_WINDOW_HEIGHT, MIN_WINDOW_WIDTH, RESTORE_FALLBACK_HEIGHT,
    RESTORE_FALLBACK_WIDTH,
};
use chrono::Utc;
use std::collections::BTreeMap;

/// Persistence work a mutation produced. The store itself never talks to
/// the network or the cache; the core schedules whatever comes back.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkspaceEffect {
    None,
    /// The layout snapshot changed and should be persisted.
    SaveLayout,
    /// Document content changed; carries the state to persist.
    SaveContent(Document),
}

/// The ordered map of open documents and their windows. All mutations are
/// synchronous `&mut self` calls; unknown ids are silent no-ops so stale
/// events from an already-closed window cannot fault the session.
#[derive(Debug, Default)]
pub struct DocumentWorkspace {
    windows: BTreeMap<String, OpenDocument>,
    container: ContainerSize,
}

impl DocumentWorkspace {
    pub fn new(container: ContainerSize) -> Self {
        Self {
            windows: BTreeMap::new(),
            container,
        }
    }

    pub fn get(&self, id: &str) -> Option<&OpenDocument> {
        self.windows.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.windows.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn container(&self) -> ContainerSize {
        self.container
    }

    pub fn open_ids(&self) -> Vec<String> {
        self.windows.keys().cloned().collect()
    }

    /// In-session document copies, for reconciliation passes.
    pub fn open_documents(&self) -> Vec<Document> {
        self.windows
            .values()
            .map(|open| open.document.clone())
            .collect()
    }

    fn next_z(&self) -> u32 {
        self.windows
            .values()
            .map(|open| open.window.z_index)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Opens a document in a new window, staggered by the number of windows
    /// already open. Opening an id that is already open activates the
    /// existing window instead (restoring it first when minimized).
    pub fn open(&mut self, document: Document) -> WorkspaceEffect {
        if self.windows.contains_key(&document.id) {
            let id = document.id;
            if self
                .windows
                .get(&id)
                .map(|open| open.window.is_minimized)
                .unwrap_or(false)
            {
                return self.restore(&id);
            }
            return self.activate(&id);
        }
        let mut window =
            WindowState::for_new_window(document.kind, self.windows.len(), self.next_z());
        let (x, y) = layout::clamp_position(
            window.x,
            window.y,
            window.width,
            window.height,
            self.container,
        );
        window.x = x;
        window.y = y;
        tracing::debug!(id = %document.id, kind = document.kind.as_str(), "window opened");
        self.windows
            .insert(document.id.clone(), OpenDocument { document, window });
        WorkspaceEffect::SaveLayout
    }

    /// Inserts a window restored from a persisted snapshot, geometry as
    /// given (clamped). Does not trigger a layout save.
    pub fn open_restored(&mut self, document: Document, mut window: WindowState) {
        let (x, y) = layout::clamp_position(
            window.x,
            window.y,
            window.width,
            window.height,
            self.container,
        );
        window.x = x;
        window.y = y;
        self.windows
            .insert(document.id.clone(), OpenDocument { document, window });
    }

    pub fn close(&mut self, id: &str) -> WorkspaceEffect {
        match self.windows.remove(id) {
            Some(_) => {
                tracing::debug!(id, "window closed");
                WorkspaceEffect::SaveLayout
            }
            None => WorkspaceEffect::None,
        }
    }

    pub fn close_all(&mut self) -> WorkspaceEffect {
        if self.windows.is_empty() {
            return WorkspaceEffect::None;
        }
        self.windows.clear();
        WorkspaceEffect::SaveLayout
    }

    /// Replaces the document content and stamps it modified now.
    pub fn update_content(&mut self, id: &str, content: String) -> WorkspaceEffect {
        let Some(open) = self.windows.get_mut(id) else {
            return WorkspaceEffect::None;
        };
        open.document.content = content;
        open.document.modified_at = Utc::now();
        WorkspaceEffect::SaveContent(open.document.clone())
    }

    /// Merges a partial geometry update, enforcing the minimum size and
    /// clamping the result into the container.
    pub fn update_window_state(&mut self, id: &str, update: WindowStateUpdate) -> WorkspaceEffect {
        let container = self.container;
        let Some(open) = self.windows.get_mut(id) else {
            return WorkspaceEffect::None;
        };
        let window = &mut open.window;
        if let Some(width) = update.width {
            window.width = width.max(MIN_WINDOW_WIDTH);
        }
        if let Some(height) = update.height {
            window.height = height.max(MIN_WINDOW_HEIGHT);
        }
        if let Some(x) = update.x {
            window.x = x;
        }
        if let Some(y) = update.y {
            window.y = y;
        }
        if let Some(maximized) = update.is_maximized {
            window.is_maximized = maximized;
        }
        if update.show_source.is_some() {
            window.show_source = update.show_source;
        }
        let (x, y) = layout::clamp_position(
            window.x,
            window.y,
            window.width,
            window.height,
            container,
        );
        window.x = x;
        window.y = y;
        WorkspaceEffect::SaveLayout
    }

    /// Brings a window to the front: `z = 1 + max` over the other open,
    /// non-minimized windows. A minimized window's stale z is ignored
    /// (restore assigns it a fresh one anyway). Already-topmost windows
    /// are left untouched so repeated focus events do not inflate
    /// z-indices.
    pub fn activate(&mut self, id: &str) -> WorkspaceEffect {
        let top = self
            .windows
            .iter()
            .filter(|(key, open)| key.as_str() != id && !open.window.is_minimized)
            .map(|(_, open)| open.window.z_index)
            .max()
            .unwrap_or(0);
        let Some(open) = self.windows.get_mut(id) else {
            return WorkspaceEffect::None;
        };
        if open.window.z_index > top {
            return WorkspaceEffect::None;
        }
        open.window.z_index = top + 1;
        WorkspaceEffect::SaveLayout
    }

    /// Captures the current geometry and parks the window in the first free
    /// icon slot along the bottom edge.
    pub fn minimize(&mut self, id: &str) -> WorkspaceEffect {
        let occupied: Vec<_> = self
            .windows
            .iter()
            .filter(|(key, open)| key.as_str() != id && open.window.is_minimized)
            .filter_map(|(_, open)| open.window.minimized_slot)
            .collect();
        let container = self.container;
        let Some(open) = self.windows.get_mut(id) else {
            return WorkspaceEffect::None;
        };
        if open.window.is_minimized {
            return WorkspaceEffect::None;
        }
        let window = &mut open.window;
        window.pre_minimize = Some(SavedGeometry {
            x: window.x,
            y: window.y,
            width: window.width,
            height: window.height,
            z_index: window.z_index,
        });
        window.minimized_slot = Some(layout::allocate_minimized_slot(&occupied, container));
        window.is_minimized = true;
        WorkspaceEffect::SaveLayout
    }

    /// Puts a minimized window back where it was. The saved geometry is
    /// applied verbatim (clamped); the saved z-index is ignored in favor of
    /// a fresh topmost one.
    pub fn restore(&mut self, id: &str) -> WorkspaceEffect {
        let next_z = self.next_z();
        let container = self.container;
        let Some(open) = self.windows.get_mut(id) else {
            return WorkspaceEffect::None;
        };
        if !open.window.is_minimized {
            return WorkspaceEffect::None;
        }
        let window = &mut open.window;
        match window.pre_minimize.take() {
            Some(saved) => {
                window.x = saved.x;
                window.y = saved.y;
                window.width = saved.width;
                window.height = saved.height;
            }
            None => {
                window.width = RESTORE_FALLBACK_WIDTH;
                window.height = RESTORE_FALLBACK_HEIGHT;
            }
        }
        let (x, y) = layout::clamp_position(
            window.x,
            window.y,
            window.width,
            window.height,
            container,
        );
        window.x = x;
        window.y = y;
        window.z_index = next_z;
        window.is_minimized = false;
        window.minimized_slot = None;
        WorkspaceEffect::SaveLayout
    }

    /// Minimizes every window that is not already minimized, allocating
    /// slots left to right in map order.
    pub fn minimize_all(&mut self) -> WorkspaceEffect {
        let ids: Vec<String> = self
            .windows
            .iter()
            .filter(|(_, open)| !open.window.is_minimized)
            .map(|(id, _)| id.clone())
            .collect();
        if ids.is_empty() {
            return WorkspaceEffect::None;
        }
        for id in ids {
            self.minimize(&id);
        }
        WorkspaceEffect::SaveLayout
    }

    /// Re-keys a window under its new id, preserving window state. The
    /// title becomes the last path segment of the new id.
    pub fn rename(&mut self, old_id: &str, new_id: &str) -> WorkspaceEffect {
        let Some(mut open) = self.windows.remove(old_id) else {
            return WorkspaceEffect::None;
        };
        open.document.id = new_id.to_string();
        open.document.title = new_id
            .rsplit('/')
            .next()
            .unwrap_or(new_id)
            .to_string();
        self.windows.insert(new_id.to_string(), open);
        WorkspaceEffect::SaveLayout
    }

    /// Applies cascade placements to the non-minimized windows in map
    /// order, re-stacking them bottom to top.
    pub fn cascade(&mut self) -> WorkspaceEffect {
        let ids: Vec<String> = self
            .windows
            .iter()
            .filter(|(_, open)| !open.window.is_minimized)
            .map(|(id, _)| id.clone())
            .collect();
        if ids.is_empty() {
            return WorkspaceEffect::None;
        }
        let placements = layout::cascade_placements(ids.len(), self.container);
        for (id, placement) in ids.iter().zip(placements) {
            if let Some(open) = self.windows.get_mut(id) {
                open.window.x = placement.x;
                open.window.y = placement.y;
                open.window.width = placement.width;
                open.window.height = placement.height;
                open.window.z_index = placement.z_index;
                open.window.is_maximized = false;
            }
        }
        WorkspaceEffect::SaveLayout
    }

    /// Applies tile placements to the non-minimized windows in map order.
    pub fn tile(&mut self) -> WorkspaceEffect {
        let ids: Vec<String> = self
            .windows
            .iter()
            .filter(|(_, open)| !open.window.is_minimized)
            .map(|(id, _)| id.clone())
            .collect();
        if ids.is_empty() {
            return WorkspaceEffect::None;
        }
        let cells = layout::tile_placements(ids.len(), self.container);
        for (id, cell) in ids.iter().zip(cells) {
            if let Some(open) = self.windows.get_mut(id) {
                open.window.x = cell.x;
                open.window.y = cell.y;
                open.window.width = cell.width;
                open.window.height = cell.height;
                open.window.is_maximized = false;
            }
        }
        WorkspaceEffect::SaveLayout
    }

    /// Records the new container size and re-clamps every open window so
    /// nothing is left stranded off-screen after a resize.
    pub fn set_container(&mut self, container: ContainerSize) -> WorkspaceEffect {
        self.container = container;
        let mut changed = false;
        for open in self.windows.values_mut() {
            let window = &mut open.window;
            let (x, y) = layout::clamp_position(
                window.x,
                window.y,
                window.width,
                window.height,
                container,
            );
            if (x, y) != (window.x, window.y) {
                window.x = x;
                window.y = y;
                changed = true;
            }
        }
        if changed {
            WorkspaceEffect::SaveLayout
        } else {
            WorkspaceEffect::None
        }
    }

    /// "What is open and where", for persistence. Content excluded.
    pub fn snapshot(&self) -> ConfigSnapshot {
        let open_windows = self
            .windows
            .iter()
            .map(|(id, open)| {
                (
                    id.clone(),
                    PersistedWindow {
                        kind: open.document.kind,
                        window: open.window.clone(),
                    },
                )
            })
            .collect();
        ConfigSnapshot { open_windows }
    }

    /// Reconciliation write: adopts remote content without scheduling a
    /// save of its own.
    pub fn apply_remote_content(
        &mut self,
        id: &str,
        content: String,
        modified_at: chrono::DateTime<Utc>,
    ) {
        if let Some(open) = self.windows.get_mut(id) {
            open.document.content = content;
            open.document.modified_at = modified_at;
        }
    }
}
