use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default geometry for a freshly opened window.
pub const DEFAULT_WINDOW_WIDTH: u32 = 600;
pub const DEFAULT_WINDOW_HEIGHT: u32 = 400;
pub const MIN_WINDOW_WIDTH: u32 = 300;
pub const MIN_WINDOW_HEIGHT: u32 = 200;

/// Base position for the first window; each additional open window is
/// staggered by one cascade step so new windows never stack exactly.
pub const DEFAULT_WINDOW_ORIGIN: i32 = 20;
pub const OPEN_OFFSET_STEP: i32 = 32;

/// Fallback geometry applied when a persisted snapshot is missing fields.
pub const RESTORE_FALLBACK_WIDTH: u32 = 589;
pub const RESTORE_FALLBACK_HEIGHT: u32 = 442;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentKind {
    Journal,
    Writing,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Journal => "journal",
            Self::Writing => "writing",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "created")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "modified")]
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Position of a minimized window's icon along the bottom edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotPosition {
    pub x: i32,
    pub y: i32,
}

/// Geometry captured on minimize and applied verbatim on restore. The saved
/// z-index is kept for completeness but restore always assigns a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub z_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowState {
    // Snapshots written by older sessions may lack geometry fields;
    // deserialization fills the restore fallback instead of failing.
    #[serde(default = "default_origin")]
    pub x: i32,
    #[serde(default = "default_origin")]
    pub y: i32,
    #[serde(default = "fallback_width")]
    pub width: u32,
    #[serde(default = "fallback_height")]
    pub height: u32,
    #[serde(default = "default_z")]
    pub z_index: u32,
    #[serde(default)]
    pub is_minimized: bool,
    #[serde(default)]
    pub is_maximized: bool,
    /// Writings only: whether the editor shows markdown source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_source: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimized_slot: Option<SlotPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_minimize: Option<SavedGeometry>,
}

fn default_origin() -> i32 {
    DEFAULT_WINDOW_ORIGIN
}

fn fallback_width() -> u32 {
    RESTORE_FALLBACK_WIDTH
}

fn fallback_height() -> u32 {
    RESTORE_FALLBACK_HEIGHT
}

fn default_z() -> u32 {
    1
}

impl WindowState {
    /// Geometry for a freshly opened window, staggered by the number of
    /// windows already open.
    pub fn for_new_window(kind: DocumentKind, open_count: usize, z_index: u32) -> Self {
        let offset = DEFAULT_WINDOW_ORIGIN + OPEN_OFFSET_STEP * open_count as i32;
        Self {
            x: offset,
            y: offset,
            width: DEFAULT_WINDOW_WIDTH,
            height: DEFAULT_WINDOW_HEIGHT,
            z_index,
            is_minimized: false,
            is_maximized: false,
            show_source: match kind {
                DocumentKind::Writing => Some(false),
                DocumentKind::Journal => None,
            },
            minimized_slot: None,
            pre_minimize: None,
        }
    }
}

/// Partial window-state merge payload; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowStateUpdate {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub is_maximized: Option<bool>,
    pub show_source: Option<bool>,
}

/// One open document window: the in-session document copy plus its
/// on-screen state. At most one per document id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDocument {
    pub document: Document,
    pub window: WindowState,
}

/// A window as persisted in the layout snapshot: geometry plus the document
/// kind, so restoration knows which remote path serves the content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedWindow {
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    #[serde(flatten)]
    pub window: WindowState,
}

/// "What was open and where", persisted across sessions. Content excluded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub open_windows: BTreeMap<String, PersistedWindow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Listing row: a journal index entry or a flattened writings-tree file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    pub title: String,
    #[serde(rename = "created")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "modified")]
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WritingNodeKind {
    File,
    Directory,
}

/// Node in the `/writings` directory tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WritingNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: WritingNodeKind,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub children: Vec<WritingNode>,
}

/// Content + server timestamp for a single remote document load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    #[serde(default)]
    pub content: String,
    #[serde(rename = "modified")]
    pub modified_at: DateTime<Utc>,
}

/// Acknowledgement of a remote save.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReceipt {
    #[serde(rename = "modified")]
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub old_path: String,
    pub new_path: String,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ContainerSize {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

/// Remote retry policy: up to `attempts` tries with delay
/// `base_delay * 2^attempt` between them. Listing calls skip retries and
/// use `list_deadline` as a single hard timeout instead.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub list_deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
            list_deadline: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceOptions {
    pub container: ContainerSize,
    /// Quiet period for journal content save channels.
    pub journal_quiet: Duration,
    /// Quiet period for writing content save channels.
    pub writing_quiet: Duration,
    /// Quiet period for the layout snapshot channel.
    pub config_quiet: Duration,
    pub retry: RetryPolicy,
    pub cache_file: String,
}

impl Default for WorkspaceOptions {
    fn default() -> Self {
        Self {
            container: ContainerSize::default(),
            journal_quiet: Duration::from_millis(1000),
            writing_quiet: Duration::from_millis(2000),
            config_quiet: Duration::from_millis(1000),
            retry: RetryPolicy::default(),
            cache_file: "workspace-cache.sqlite".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_state_wire_shape_is_camel_case() {
        let state = WindowState::for_new_window(DocumentKind::Writing, 0, 1);
        let value = serde_json::to_value(&state).expect("serialize window state");
        assert_eq!(value["zIndex"], 1);
        assert_eq!(value["isMinimized"], false);
        assert_eq!(value["showSource"], false);
        assert!(value.get("minimizedSlot").is_none());
        assert!(value.get("preMinimize").is_none());
    }

    #[test]
    fn new_windows_stagger_by_open_count() {
        let first = WindowState::for_new_window(DocumentKind::Journal, 0, 1);
        let third = WindowState::for_new_window(DocumentKind::Journal, 2, 3);
        assert_eq!(first.x, DEFAULT_WINDOW_ORIGIN);
        assert_eq!(third.x, DEFAULT_WINDOW_ORIGIN + 2 * OPEN_OFFSET_STEP);
        assert_eq!(first.show_source, None);
    }

    #[test]
    fn sparse_persisted_window_gets_fallback_geometry() {
        let state: WindowState =
            serde_json::from_str(r#"{"x": 40}"#).expect("deserialize sparse state");
        assert_eq!(state.x, 40);
        assert_eq!(state.y, DEFAULT_WINDOW_ORIGIN);
        assert_eq!(state.width, RESTORE_FALLBACK_WIDTH);
        assert_eq!(state.height, RESTORE_FALLBACK_HEIGHT);
        assert_eq!(state.z_index, 1);
        assert!(!state.is_minimized);
    }

    #[test]
    fn config_snapshot_roundtrips_persisted_kind() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.open_windows.insert(
            "notes/todo".to_string(),
            PersistedWindow {
                kind: DocumentKind::Writing,
                window: WindowState::for_new_window(DocumentKind::Writing, 0, 1),
            },
        );
        let json = serde_json::to_string(&snapshot).expect("serialize snapshot");
        assert!(json.contains("\"openWindows\""));
        assert!(json.contains("\"type\":\"writing\""));
        let back: ConfigSnapshot = serde_json::from_str(&json).expect("deserialize snapshot");
        assert_eq!(back, snapshot);
    }
}
