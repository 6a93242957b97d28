use crate::errors::{AppError, AppResult};
use crate::models::{
    ConfigSnapshot, Document, DocumentKind, DocumentSummary, MoveRequest, RemoteDocument,
    RetryPolicy, SaveReceipt, WritingNode, WritingNodeKind,
};
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Thin typed wrapper over the remote document store's HTTP interface.
/// Every operation retries transient failures with exponential backoff,
/// except the listing which runs under a single hard deadline. Fallback
/// decisions (cache, deferral) belong to the synchronizer, not here.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
}

/// Retries `op` on transient failures only: up to `policy.attempts` tries,
/// sleeping `base_delay * 2^attempt` between them. Non-transient errors
/// (not-found, conflict, validation) propagate immediately.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: F) -> AppResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut last_error = None;
    for attempt in 0..policy.attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                if attempt + 1 < policy.attempts {
                    let delay = policy.base_delay * 2u32.pow(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying remote call"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_error.unwrap_or_else(|| AppError::Network("remote retries exhausted".to_string())))
}

#[derive(Debug, Deserialize)]
struct JournalEntryMeta {
    title: Option<String>,
    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WritingContent {
    #[serde(default)]
    content: String,
    modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
    code: Option<String>,
}

impl RemoteStore {
    pub fn new(base_url: impl Into<String>) -> AppResult<Self> {
        Self::with_policy(base_url, RetryPolicy::default())
    }

    pub fn with_policy(base_url: impl Into<String>, policy: RetryPolicy) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AppError::Internal(format!("http client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            policy,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn load_config(&self) -> AppResult<ConfigSnapshot> {
        with_retry(&self.policy, || self.load_config_once()).await
    }

    async fn load_config_once(&self) -> AppResult<ConfigSnapshot> {
        let response = self.client.get(self.url("/config")).send().await?;
        handle_json(response, "config").await
    }

    pub async fn save_config(&self, snapshot: &ConfigSnapshot) -> AppResult<()> {
        with_retry(&self.policy, || self.save_config_once(snapshot)).await
    }

    async fn save_config_once(&self, snapshot: &ConfigSnapshot) -> AppResult<()> {
        let response = self
            .client
            .post(self.url("/config"))
            .json(snapshot)
            .send()
            .await?;
        handle_ack(response, "config").await
    }

    /// Lists journal entries and the writings tree together. No retries:
    /// a single hard deadline bounds the whole call, after which the
    /// caller falls back to its cached listing.
    pub async fn list_documents(&self) -> AppResult<Vec<DocumentSummary>> {
        tokio::time::timeout(self.policy.list_deadline, self.fetch_listing())
            .await
            .map_err(|_| AppError::Network("document listing timed out".to_string()))?
    }

    async fn fetch_listing(&self) -> AppResult<Vec<DocumentSummary>> {
        let (entries, writings) =
            tokio::join!(self.fetch_journal_index(), self.fetch_writings_tree());
        let mut summaries = entries?;
        flatten_writings(&writings?, "", &mut summaries);
        Ok(deduplicate(summaries))
    }

    async fn fetch_journal_index(&self) -> AppResult<Vec<DocumentSummary>> {
        let response = self.client.get(self.url("/entries")).send().await?;
        let pairs: Vec<(String, JournalEntryMeta)> = handle_json(response, "entries").await?;
        Ok(pairs
            .into_iter()
            .map(|(id, meta)| {
                let created = meta.created.unwrap_or_else(Utc::now);
                DocumentSummary {
                    title: meta.title.unwrap_or_else(|| id.clone()),
                    kind: DocumentKind::Journal,
                    created_at: created,
                    modified_at: meta.modified.unwrap_or(created),
                    tags: meta.tags,
                    id,
                }
            })
            .collect())
    }

    async fn fetch_writings_tree(&self) -> AppResult<WritingNode> {
        let response = self.client.get(self.url("/writings")).send().await?;
        handle_json(response, "writings").await
    }

    pub async fn load_document(&self, kind: DocumentKind, id: &str) -> AppResult<RemoteDocument> {
        require_id(id)?;
        with_retry(&self.policy, || self.load_document_once(kind, id)).await
    }

    async fn load_document_once(&self, kind: DocumentKind, id: &str) -> AppResult<RemoteDocument> {
        match kind {
            DocumentKind::Journal => {
                let response = self
                    .client
                    .get(self.url(&format!("/entries/{id}")))
                    .send()
                    .await?;
                let document: Document = handle_json(response, id).await?;
                Ok(RemoteDocument {
                    content: document.content,
                    modified_at: document.modified_at,
                })
            }
            DocumentKind::Writing => {
                let response = self
                    .client
                    .get(self.url("/writings/content"))
                    .query(&[("path", writing_path(id))])
                    .send()
                    .await?;
                let body: WritingContent = handle_json(response, id).await?;
                Ok(RemoteDocument {
                    content: body.content,
                    // Absent timestamp means the server does not track one;
                    // treat it as never-newer during reconciliation.
                    modified_at: body.modified.unwrap_or(DateTime::UNIX_EPOCH),
                })
            }
        }
    }

    pub async fn save_document(&self, document: &Document) -> AppResult<SaveReceipt> {
        require_id(&document.id)?;
        with_retry(&self.policy, || self.save_document_once(document)).await
    }

    async fn save_document_once(&self, document: &Document) -> AppResult<SaveReceipt> {
        match document.kind {
            DocumentKind::Journal => {
                let response = self
                    .client
                    .post(self.url(&format!("/entries/{}", document.id)))
                    .json(document)
                    .send()
                    .await?;
                let saved: serde_json::Value = handle_json(response, &document.id).await?;
                let modified_at = saved
                    .get("modified")
                    .and_then(|value| value.as_str())
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                Ok(SaveReceipt { modified_at })
            }
            DocumentKind::Writing => {
                let response = self
                    .client
                    .post(self.url("/writings/content"))
                    .json(&serde_json::json!({
                        "path": writing_path(&document.id),
                        "content": document.content,
                    }))
                    .send()
                    .await?;
                handle_ack(response, &document.id).await?;
                Ok(SaveReceipt {
                    modified_at: Utc::now(),
                })
            }
        }
    }

    pub async fn delete_document(&self, kind: DocumentKind, id: &str) -> AppResult<()> {
        require_id(id)?;
        with_retry(&self.policy, || self.delete_document_once(kind, id)).await
    }

    async fn delete_document_once(&self, kind: DocumentKind, id: &str) -> AppResult<()> {
        match kind {
            DocumentKind::Journal => {
                let response = self
                    .client
                    .delete(self.url(&format!("/entries/{id}")))
                    .send()
                    .await?;
                handle_ack(response, id).await
            }
            DocumentKind::Writing => {
                let response = self
                    .client
                    .delete(self.url("/writings/content"))
                    .query(&[("path", writing_path(id))])
                    .send()
                    .await?;
                handle_ack(response, id).await
            }
        }
    }

    /// Moves/renames a writing. A destination that already exists fails
    /// with `Conflict` unless `overwrite` is set; conflicts are never
    /// retried or auto-resolved.
    pub async fn move_document(
        &self,
        old_id: &str,
        new_id: &str,
        overwrite: bool,
    ) -> AppResult<()> {
        require_id(old_id)?;
        require_id(new_id)?;
        let request = MoveRequest {
            old_path: strip_md(old_id),
            new_path: strip_md(new_id),
            overwrite,
        };
        with_retry(&self.policy, || self.move_document_once(&request)).await
    }

    async fn move_document_once(&self, request: &MoveRequest) -> AppResult<()> {
        let response = self
            .client
            .post(self.url("/writings/move"))
            .json(request)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body: ErrorBody = response.json().await.unwrap_or_default();
        if status == StatusCode::CONFLICT || body.code.as_deref() == Some("FILE_EXISTS") {
            return Err(AppError::Conflict {
                destination: request.new_path.clone(),
            });
        }
        Err(status_error(status, &request.old_path, body))
    }

    pub async fn create_directory(&self, path: &str) -> AppResult<()> {
        require_id(path)?;
        with_retry(&self.policy, || self.create_directory_once(path)).await
    }

    async fn create_directory_once(&self, path: &str) -> AppResult<()> {
        let response = self
            .client
            .post(self.url("/writings/directory"))
            .json(&serde_json::json!({ "path": path }))
            .send()
            .await?;
        handle_ack(response, path).await
    }
}

fn require_id(id: &str) -> AppResult<()> {
    if id.trim().is_empty() {
        return Err(AppError::Validation("document id is required".to_string()));
    }
    Ok(())
}

fn writing_path(id: &str) -> String {
    if id.ends_with(".md") {
        id.to_string()
    } else {
        format!("{id}.md")
    }
}

fn strip_md(id: &str) -> String {
    id.strip_suffix(".md").unwrap_or(id).to_string()
}

async fn handle_json<T: serde::de::DeserializeOwned>(
    response: Response,
    resource: &str,
) -> AppResult<T> {
    let response = check_status(response, resource).await?;
    response.json::<T>().await.map_err(AppError::from)
}

async fn handle_ack(response: Response, resource: &str) -> AppResult<()> {
    check_status(response, resource).await?;
    Ok(())
}

async fn check_status(response: Response, resource: &str) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(AppError::NotFound(resource.to_string()));
    }
    if status == StatusCode::CONFLICT {
        return Err(AppError::Conflict {
            destination: resource.to_string(),
        });
    }
    let body: ErrorBody = response.json().await.unwrap_or_default();
    Err(status_error(status, resource, body))
}

fn status_error(status: StatusCode, resource: &str, body: ErrorBody) -> AppError {
    let detail = body
        .error
        .or(body.message)
        .unwrap_or_else(|| format!("http status {status}"));
    AppError::Network(format!("{resource}: {detail}"))
}

/// Depth-first flattening of the writings tree into listing rows keyed by
/// slash-joined paths, `.md` stripped from ids and titles.
fn flatten_writings(node: &WritingNode, parent: &str, out: &mut Vec<DocumentSummary>) {
    for child in &node.children {
        let path = if parent.is_empty() {
            child.name.clone()
        } else {
            format!("{parent}/{}", child.name)
        };
        match child.kind {
            WritingNodeKind::File => {
                let id = strip_md(&path);
                let title = id.rsplit('/').next().unwrap_or(&id).to_string();
                let created = child.created.unwrap_or_else(Utc::now);
                out.push(DocumentSummary {
                    id,
                    kind: DocumentKind::Writing,
                    title,
                    created_at: created,
                    modified_at: child.modified.unwrap_or(created),
                    tags: Vec::new(),
                });
            }
            WritingNodeKind::Directory => flatten_writings(child, &path, out),
        }
    }
}

/// Collapses duplicate ids, keeping the row with the newest modification.
fn deduplicate(summaries: Vec<DocumentSummary>) -> Vec<DocumentSummary> {
    let mut unique: BTreeMap<String, DocumentSummary> = BTreeMap::new();
    for summary in summaries {
        match unique.get(&summary.id) {
            Some(existing) if existing.modified_at >= summary.modified_at => {}
            _ => {
                unique.insert(summary.id.clone(), summary);
            }
        }
    }
    unique.into_values().collect()
}
