use crate::cache::DocumentCache;
use crate::errors::{AppError, AppResult};
use crate::models::{
    ConfigSnapshot, Document, DocumentKind, DocumentSummary, RemoteDocument, WorkspaceOptions,
};
use crate::remote::RemoteStore;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Mutex;

type SendFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Sink<T> = Arc<dyn Fn(T) -> SendFuture + Send + Sync>;

/// Trailing-edge debounce channel: holds at most one pending payload,
/// every `schedule` re-arms the quiet-period timer, and only the timer
/// that survives the quiet period sends, carrying the most recent payload.
/// An async gate serializes sends so a channel never has two requests in
/// flight. `cancel` discards the pending payload without sending.
pub struct SaveChannel<T> {
    state: Arc<StdMutex<ChannelState<T>>>,
    send_gate: Arc<Mutex<()>>,
    quiet: Duration,
    runtime: Handle,
    sink: Sink<T>,
}

struct ChannelState<T> {
    pending: Option<T>,
    generation: u64,
}

impl<T: Send + 'static> SaveChannel<T> {
    /// The handle keeps `schedule` usable from threads outside the
    /// runtime (the surrounding shell calls the synchronous surface).
    pub fn new(quiet: Duration, runtime: Handle, sink: Sink<T>) -> Self {
        Self {
            state: Arc::new(StdMutex::new(ChannelState {
                pending: None,
                generation: 0,
            })),
            send_gate: Arc::new(Mutex::new(())),
            quiet,
            runtime,
            sink,
        }
    }

    pub fn schedule(&self, payload: T) {
        let generation = {
            let mut state = self.state.lock().expect("save channel state");
            state.pending = Some(payload);
            state.generation += 1;
            state.generation
        };

        let state = Arc::clone(&self.state);
        let send_gate = Arc::clone(&self.send_gate);
        let sink = Arc::clone(&self.sink);
        let quiet = self.quiet;
        self.runtime.spawn(async move {
            tokio::time::sleep(quiet).await;
            let payload = {
                let mut guard = state.lock().expect("save channel state");
                if guard.generation != generation {
                    // A newer schedule or a cancel re-armed the channel.
                    return;
                }
                match guard.pending.take() {
                    Some(payload) => payload,
                    None => return,
                }
            };
            let _in_flight = send_gate.lock().await;
            (sink)(payload).await;
        });
    }

    pub fn cancel(&self) {
        let mut state = self.state.lock().expect("save channel state");
        state.pending = None;
        state.generation += 1;
    }

    /// Disarms the timer and hands back the pending payload, if any, so
    /// the caller can send it immediately.
    pub fn take_pending(&self) -> Option<T> {
        let mut state = self.state.lock().expect("save channel state");
        state.generation += 1;
        state.pending.take()
    }

    /// Sends the pending payload now, behind any send already in flight.
    /// The gate keeps the channel's one-request-at-a-time guarantee even
    /// when a debounced send is still on the wire.
    pub async fn flush(&self) {
        let Some(payload) = self.take_pending() else {
            return;
        };
        let _in_flight = self.send_gate.lock().await;
        (self.sink)(payload).await;
    }
}

/// What a fallback-aware load produced and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub content: String,
    pub modified_at: DateTime<Utc>,
    pub from_cache: bool,
}

/// Coordinates when writes happen: one debounced content channel per open
/// document plus one for the layout snapshot, cache-backed fallback on
/// remote failure, and timestamp reconciliation on focus/startup.
pub struct Synchronizer {
    cache: Arc<DocumentCache>,
    remote: Arc<RemoteStore>,
    runtime: Handle,
    journal_quiet: Duration,
    writing_quiet: Duration,
    content_channels: StdMutex<HashMap<String, Arc<SaveChannel<Document>>>>,
    config_channel: SaveChannel<ConfigSnapshot>,
    dirty: Arc<StdMutex<HashSet<String>>>,
}

impl Synchronizer {
    /// Must be constructed within a tokio runtime; the captured handle is
    /// what lets the scheduling surface be called from any thread later.
    pub fn new(
        cache: Arc<DocumentCache>,
        remote: Arc<RemoteStore>,
        options: &WorkspaceOptions,
    ) -> AppResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| AppError::Internal("a tokio runtime is required".to_string()))?;
        let config_channel = {
            let remote = Arc::clone(&remote);
            SaveChannel::new(
                options.config_quiet,
                runtime.clone(),
                Arc::new(move |snapshot: ConfigSnapshot| {
                    let remote = Arc::clone(&remote);
                    Box::pin(async move {
                        if let Err(err) = remote.save_config(&snapshot).await {
                            tracing::warn!(error = %err, "layout snapshot save failed");
                        }
                    }) as SendFuture
                }),
            )
        };
        Ok(Self {
            cache,
            remote,
            runtime,
            journal_quiet: options.journal_quiet,
            writing_quiet: options.writing_quiet,
            content_channels: StdMutex::new(HashMap::new()),
            config_channel,
            dirty: Arc::new(StdMutex::new(HashSet::new())),
        })
    }

    /// Coalesced content save. Rapid edits within the quiet period collapse
    /// into one request carrying the latest document state; failures after
    /// exhausted retries keep the edit in the cache and mark the document
    /// for the next reconciliation pass instead of surfacing.
    pub fn schedule_content_save(&self, document: Document) {
        let channel = self.content_channel(&document.id, document.kind);
        channel.schedule(document);
    }

    fn content_channel(&self, id: &str, kind: DocumentKind) -> Arc<SaveChannel<Document>> {
        let mut channels = self.content_channels.lock().expect("content channels");
        if let Some(channel) = channels.get(id) {
            return Arc::clone(channel);
        }
        let quiet = match kind {
            DocumentKind::Journal => self.journal_quiet,
            DocumentKind::Writing => self.writing_quiet,
        };
        let cache = Arc::clone(&self.cache);
        let remote = Arc::clone(&self.remote);
        let dirty = Arc::clone(&self.dirty);
        let channel = Arc::new(SaveChannel::new(
            quiet,
            self.runtime.clone(),
            Arc::new(move |document: Document| {
                let cache = Arc::clone(&cache);
                let remote = Arc::clone(&remote);
                let dirty = Arc::clone(&dirty);
                Box::pin(async move { save_content(&cache, &remote, &dirty, document).await })
                    as SendFuture
            }),
        ));
        channels.insert(id.to_string(), Arc::clone(&channel));
        channel
    }

    /// Layout snapshot save. The cache mirror is written synchronously so a
    /// crash inside the quiet period still restores the latest layout.
    pub fn schedule_config_save(&self, snapshot: ConfigSnapshot) {
        if let Err(err) = self.cache.set_config(&snapshot) {
            tracing::warn!(error = %err, "layout snapshot cache write failed");
        }
        self.config_channel.schedule(snapshot);
    }

    /// Flushes any pending edit for a closing document immediately, then
    /// drops its channel. Goes through the channel's own gate so the
    /// flush queues behind a debounced send still on the wire instead of
    /// racing it.
    pub async fn flush_and_close(&self, id: &str) {
        let removed = {
            let mut channels = self.content_channels.lock().expect("content channels");
            channels.remove(id)
        };
        if let Some(channel) = removed {
            channel.flush().await;
        }
    }

    /// Drops the pending timer for a closing document without sending.
    pub fn cancel_document(&self, id: &str) {
        let removed = {
            let mut channels = self.content_channels.lock().expect("content channels");
            channels.remove(id)
        };
        if let Some(channel) = removed {
            channel.cancel();
        }
    }

    /// Cancels every pending channel (app exit).
    pub fn cancel_all(&self) {
        self.config_channel.cancel();
        let channels: Vec<_> = {
            let mut map = self.content_channels.lock().expect("content channels");
            map.drain().map(|(_, channel)| channel).collect()
        };
        for channel in channels {
            channel.cancel();
        }
    }

    /// Records the outcome of an immediate (non-debounced) save.
    pub fn record_saved(&self, document: &Document, modified_at: DateTime<Utc>) {
        if let Err(err) = self.cache.set(&document.id, &document.content, modified_at) {
            tracing::warn!(id = %document.id, error = %err, "cache update failed");
        }
        self.dirty.lock().expect("dirty set").remove(&document.id);
    }

    pub fn mark_dirty(&self, id: &str) {
        self.dirty.lock().expect("dirty set").insert(id.to_string());
    }

    pub fn is_dirty(&self, id: &str) -> bool {
        self.dirty.lock().expect("dirty set").contains(id)
    }

    /// Remote load with cache fallback: transient failures after exhausted
    /// retries serve the last cached content silently; anything else
    /// propagates.
    pub async fn load_with_fallback(
        &self,
        kind: DocumentKind,
        id: &str,
    ) -> AppResult<LoadedDocument> {
        match self.remote.load_document(kind, id).await {
            Ok(remote_doc) => {
                self.cache.set(id, &remote_doc.content, remote_doc.modified_at)?;
                Ok(LoadedDocument {
                    content: remote_doc.content,
                    modified_at: remote_doc.modified_at,
                    from_cache: false,
                })
            }
            Err(err) if err.is_transient() => match self.cache.get(id)? {
                Some(entry) => {
                    tracing::warn!(id, error = %err, "remote load failed, serving cached content");
                    Ok(LoadedDocument {
                        content: entry.content,
                        modified_at: entry.timestamp,
                        from_cache: true,
                    })
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    /// Layout snapshot load: remote, then cache, then an empty snapshot.
    /// Never fails; a missing or unreachable config means "nothing open".
    pub async fn load_config_with_fallback(&self) -> ConfigSnapshot {
        match self.remote.load_config().await {
            Ok(snapshot) => {
                if let Err(err) = self.cache.set_config(&snapshot) {
                    tracing::warn!(error = %err, "layout snapshot cache write failed");
                }
                snapshot
            }
            Err(err) => {
                tracing::warn!(error = %err, "config load failed, falling back to cache");
                match self.cache.get_config() {
                    Ok(Some(snapshot)) => snapshot,
                    _ => ConfigSnapshot::default(),
                }
            }
        }
    }

    /// Document listing with cache fallback on transient failure.
    pub async fn list_with_fallback(&self) -> AppResult<Vec<DocumentSummary>> {
        match self.remote.list_documents().await {
            Ok(listing) => {
                if let Err(err) = self.cache.set_listing(&listing) {
                    tracing::warn!(error = %err, "listing cache write failed");
                }
                Ok(listing)
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(error = %err, "listing failed, serving cached listing");
                Ok(self.cache.get_listing().ok().flatten().unwrap_or_default())
            }
            Err(err) => Err(err),
        }
    }

    /// Reconciliation pass over the open documents (startup and regained
    /// focus). Documents with a deferred save are flushed first; for the
    /// rest, remote content is adopted when the remote timestamp is at
    /// least the cached one (remote wins on tie). Returns the adoptions
    /// for the window store to apply.
    pub async fn reconcile(&self, open: &[Document]) -> Vec<(String, RemoteDocument)> {
        let mut adopted = Vec::new();
        for document in open {
            if self.is_dirty(&document.id) {
                self.flush_deferred(document).await;
                continue;
            }
            match self.remote.load_document(document.kind, &document.id).await {
                Ok(remote_doc) => {
                    let cached_at = self
                        .cache
                        .get(&document.id)
                        .ok()
                        .flatten()
                        .map(|entry| entry.timestamp);
                    if should_adopt_remote(remote_doc.modified_at, cached_at) {
                        if let Err(err) =
                            self.cache
                                .set(&document.id, &remote_doc.content, remote_doc.modified_at)
                        {
                            tracing::warn!(id = %document.id, error = %err, "cache update failed");
                        }
                        adopted.push((document.id.clone(), remote_doc));
                    }
                }
                Err(err) => {
                    tracing::warn!(id = %document.id, error = %err, "reconciliation load failed");
                }
            }
        }
        adopted
    }

    async fn flush_deferred(&self, document: &Document) {
        match self.remote.save_document(document).await {
            Ok(receipt) => {
                if let Err(err) = self
                    .cache
                    .set(&document.id, &document.content, receipt.modified_at)
                {
                    tracing::warn!(id = %document.id, error = %err, "cache update failed");
                }
                self.dirty.lock().expect("dirty set").remove(&document.id);
                tracing::debug!(id = %document.id, "deferred save flushed");
            }
            Err(err) => {
                tracing::warn!(id = %document.id, error = %err, "deferred save still failing");
            }
        }
    }

    pub fn invalidate_document(&self, id: &str) -> AppResult<()> {
        self.cache.invalidate(id)?;
        self.cache.invalidate_listing()?;
        self.dirty.lock().expect("dirty set").remove(id);
        Ok(())
    }
}

async fn save_content(
    cache: &DocumentCache,
    remote: &RemoteStore,
    dirty: &StdMutex<HashSet<String>>,
    document: Document,
) {
    match remote.save_document(&document).await {
        Ok(receipt) => {
            if let Err(err) = cache.set(&document.id, &document.content, receipt.modified_at) {
                tracing::warn!(id = %document.id, error = %err, "cache update failed");
            }
            dirty.lock().expect("dirty set").remove(&document.id);
        }
        Err(err) => {
            // The edit survives in memory and in the cache; the next
            // reconciliation pass retries transient failures.
            if let Err(cache_err) = cache.set(&document.id, &document.content, document.modified_at)
            {
                tracing::warn!(id = %document.id, error = %cache_err, "cache update failed");
            }
            if matches!(err, AppError::Network(_)) {
                dirty.lock().expect("dirty set").insert(document.id.clone());
                tracing::warn!(id = %document.id, error = %err, "content save deferred");
            } else {
                tracing::error!(id = %document.id, error = %err, "content save rejected");
            }
        }
    }
}

/// Remote wins when strictly newer and on exact ties; older remote
/// content never clobbers a newer cached edit.
fn should_adopt_remote(remote: DateTime<Utc>, cached: Option<DateTime<Utc>>) -> bool {
    match cached {
        Some(cached_at) => remote >= cached_at,
        None => true,
    }
}
