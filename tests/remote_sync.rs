use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use eradia_workspace::{
    AppError, Document, DocumentCache, DocumentKind, DocumentSummary, RemoteStore, RetryPolicy,
    Synchronizer, WorkspaceCore, WorkspaceOptions,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("mock server addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("mock server");
    });
    format!("http://{addr}")
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        base_delay: Duration::from_millis(5),
        list_deadline: Duration::from_millis(150),
    }
}

fn fast_options() -> WorkspaceOptions {
    WorkspaceOptions {
        journal_quiet: Duration::from_millis(40),
        writing_quiet: Duration::from_millis(40),
        config_quiet: Duration::from_millis(40),
        retry: fast_policy(),
        ..Default::default()
    }
}

fn journal_json(id: &str, content: &str) -> serde_json::Value {
    let now = Utc::now().to_rfc3339();
    json!({
        "id": id,
        "type": "journal",
        "title": id,
        "content": content,
        "created": now,
        "modified": now,
        "tags": [],
    })
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&hits);
    let router = Router::new().route(
        "/entries/{id}",
        get(move |Path(id): Path<String>| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "busy"})))
                } else {
                    (StatusCode::OK, Json(journal_json(&id, "made it")))
                }
            }
        }),
    );
    let base = serve(router).await;

    let remote = RemoteStore::with_policy(&base, fast_policy()).expect("remote");
    let loaded = remote
        .load_document(DocumentKind::Journal, "day-one")
        .await
        .expect("third attempt succeeds");
    assert_eq!(loaded.content, "made it");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_retries_fall_back_to_cached_content() {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&hits);
    let router = Router::new().route(
        "/entries/{id}",
        get(move |Path(_id): Path<String>| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "down"})))
            }
        }),
    );
    let base = serve(router).await;

    let dir = tempfile::tempdir().expect("temp dir");
    let cache = Arc::new(DocumentCache::open(&dir.path().join("cache.sqlite")).expect("cache"));
    let stamp = Utc::now();
    cache
        .set("day-one", "offline words", stamp)
        .expect("seed cache");
    let remote = Arc::new(RemoteStore::with_policy(&base, fast_policy()).expect("remote"));
    let sync =
        Synchronizer::new(Arc::clone(&cache), remote, &fast_options()).expect("synchronizer");

    let loaded = sync
        .load_with_fallback(DocumentKind::Journal, "day-one")
        .await
        .expect("cache serves the content");
    assert!(loaded.from_cache);
    assert_eq!(loaded.content, "offline words");
    assert_eq!(loaded.modified_at.timestamp(), stamp.timestamp());
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn move_onto_an_existing_file_surfaces_a_conflict() {
    let router = Router::new().route(
        "/writings/move",
        post(|| async {
            (
                StatusCode::CONFLICT,
                Json(json!({"code": "FILE_EXISTS", "error": "destination exists"})),
            )
        }),
    );
    let base = serve(router).await;

    let remote = RemoteStore::with_policy(&base, fast_policy()).expect("remote");
    let error = remote
        .move_document("drafts/old", "drafts/new", false)
        .await
        .expect_err("conflict propagates");
    match error {
        AppError::Conflict { destination } => assert_eq!(destination, "drafts/new"),
        other => panic!("expected Conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn validation_failures_never_reach_the_server() {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&hits);
    let router = Router::new().route(
        "/entries/{id}",
        get(move |Path(id): Path<String>| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (StatusCode::OK, Json(journal_json(&id, "")))
            }
        }),
    );
    let base = serve(router).await;

    let remote = RemoteStore::with_policy(&base, fast_policy()).expect("remote");
    let error = remote
        .load_document(DocumentKind::Journal, "   ")
        .await
        .expect_err("blank id rejected");
    assert!(matches!(error, AppError::Validation(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn slow_listing_falls_back_to_the_cached_listing() {
    let router = Router::new()
        .route(
            "/entries",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Json(json!([]))
            }),
        )
        .route(
            "/writings",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Json(json!({"name": "root", "type": "directory", "children": []}))
            }),
        );
    let base = serve(router).await;

    let dir = tempfile::tempdir().expect("temp dir");
    let cache = Arc::new(DocumentCache::open(&dir.path().join("cache.sqlite")).expect("cache"));
    let known = vec![DocumentSummary {
        id: "drafts/novel".to_string(),
        kind: DocumentKind::Writing,
        title: "novel".to_string(),
        created_at: Utc::now() - ChronoDuration::days(2),
        modified_at: Utc::now(),
        tags: Vec::new(),
    }];
    cache.set_listing(&known).expect("seed listing");
    let remote = Arc::new(RemoteStore::with_policy(&base, fast_policy()).expect("remote"));
    let sync = Synchronizer::new(cache, remote, &fast_options()).expect("synchronizer");

    let listing = sync.list_with_fallback().await.expect("cached listing");
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].id, "drafts/novel");
}

#[tokio::test]
async fn startup_restores_persisted_windows_with_their_geometry() {
    let router = Router::new()
        .route(
            "/config",
            get(|| async {
                Json(json!({
                    "openWindows": {
                        "day-one": {
                            "type": "journal",
                            "x": 140, "y": 90,
                            "width": 620, "height": 430,
                            "zIndex": 2
                        }
                    }
                }))
            }),
        )
        .route("/entries", get(|| async { Json(json!([])) }))
        .route(
            "/writings",
            get(|| async { Json(json!({"name": "root", "type": "directory", "children": []})) }),
        )
        .route(
            "/entries/{id}",
            get(|Path(id): Path<String>| async move { Json(journal_json(&id, "restored words")) }),
        );
    let base = serve(router).await;

    let dir = tempfile::tempdir().expect("temp dir");
    let core = WorkspaceCore::with_options(dir.path(), &base, fast_options()).expect("core");
    core.initialize().await.expect("initialize");

    let open = core
        .open_window("day-one")
        .expect("lookup")
        .expect("window restored");
    assert_eq!(open.document.content, "restored words");
    assert_eq!((open.window.x, open.window.y), (140, 90));
    assert_eq!((open.window.width, open.window.height), (620, 430));

    let snapshot = core.open_snapshot().expect("snapshot");
    assert!(snapshot.open_windows.contains_key("day-one"));
}

#[tokio::test]
async fn rapid_edits_reach_the_server_as_a_single_save() {
    let saves = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&saves);
    let router = Router::new()
        .route(
            "/entries/{id}",
            get(|Path(id): Path<String>| async move { Json(journal_json(&id, "start")) }).post(
                move |Path(_id): Path<String>, Json(body): Json<serde_json::Value>| {
                    let counter = Arc::clone(&counter);
                    async move {
                        assert_eq!(body["content"], "draft three");
                        counter.fetch_add(1, Ordering::SeqCst);
                        Json(json!({"modified": Utc::now().to_rfc3339()}))
                    }
                },
            ),
        );
    let base = serve(router).await;

    let dir = tempfile::tempdir().expect("temp dir");
    let core = WorkspaceCore::with_options(dir.path(), &base, fast_options()).expect("core");
    core.open_document(DocumentKind::Journal, "day-one")
        .await
        .expect("open");

    core.update_content("day-one", "draft one".to_string()).expect("edit");
    core.update_content("day-one", "draft two".to_string()).expect("edit");
    core.update_content("day-one", "draft three".to_string()).expect("edit");
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(saves.load(Ordering::SeqCst), 1);
    core.shutdown();
}

#[tokio::test]
async fn close_time_flush_queues_behind_the_in_flight_save() {
    let in_flight = Arc::new(AtomicU32::new(0));
    let max_in_flight = Arc::new(AtomicU32::new(0));
    let contents = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let router = {
        let in_flight = Arc::clone(&in_flight);
        let max_in_flight = Arc::clone(&max_in_flight);
        let contents = Arc::clone(&contents);
        Router::new().route(
            "/entries/{id}",
            post(
                move |Path(_id): Path<String>, Json(body): Json<serde_json::Value>| {
                    let in_flight = Arc::clone(&in_flight);
                    let max_in_flight = Arc::clone(&max_in_flight);
                    let contents = Arc::clone(&contents);
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_in_flight.fetch_max(now, Ordering::SeqCst);
                        // Slow enough that a racing flush would overlap.
                        tokio::time::sleep(Duration::from_millis(150)).await;
                        contents
                            .lock()
                            .expect("contents")
                            .push(body["content"].as_str().unwrap_or_default().to_string());
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Json(json!({"modified": Utc::now().to_rfc3339()}))
                    }
                },
            ),
        )
    };
    let base = serve(router).await;

    let dir = tempfile::tempdir().expect("temp dir");
    let cache = Arc::new(DocumentCache::open(&dir.path().join("cache.sqlite")).expect("cache"));
    let remote = Arc::new(RemoteStore::with_policy(&base, fast_policy()).expect("remote"));
    let sync = Synchronizer::new(cache, remote, &fast_options()).expect("synchronizer");

    let now = Utc::now();
    let document = |content: &str| Document {
        id: "day-one".to_string(),
        kind: DocumentKind::Journal,
        title: "day-one".to_string(),
        content: content.to_string(),
        created_at: now,
        modified_at: now,
        tags: Vec::new(),
    };

    sync.schedule_content_save(document("v1"));
    // Past the quiet period: v1's send is on the wire.
    tokio::time::sleep(Duration::from_millis(80)).await;
    sync.schedule_content_save(document("v2"));
    sync.flush_and_close("day-one").await;

    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(contents.lock().expect("contents").as_slice(), ["v1", "v2"]);
}

#[tokio::test]
async fn reconciliation_flushes_deferred_saves_instead_of_adopting() {
    let saves = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&saves);
    let router = Router::new().route(
        "/entries/{id}",
        get(|Path(id): Path<String>| async move { Json(journal_json(&id, "server copy")) }).post(
            move |Path(_id): Path<String>, Json(body): Json<serde_json::Value>| {
                let counter = Arc::clone(&counter);
                async move {
                    assert_eq!(body["content"], "kept offline");
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"modified": Utc::now().to_rfc3339()}))
                }
            },
        ),
    );
    let base = serve(router).await;

    let dir = tempfile::tempdir().expect("temp dir");
    let cache = Arc::new(DocumentCache::open(&dir.path().join("cache.sqlite")).expect("cache"));
    let remote = Arc::new(RemoteStore::with_policy(&base, fast_policy()).expect("remote"));
    let sync = Synchronizer::new(cache, remote, &fast_options()).expect("synchronizer");

    let now = Utc::now();
    let document = Document {
        id: "day-one".to_string(),
        kind: DocumentKind::Journal,
        title: "day-one".to_string(),
        content: "kept offline".to_string(),
        created_at: now,
        modified_at: now,
        tags: Vec::new(),
    };
    sync.mark_dirty("day-one");

    let adopted = sync.reconcile(std::slice::from_ref(&document)).await;
    assert!(adopted.is_empty(), "dirty documents are flushed, not adopted");
    assert_eq!(saves.load(Ordering::SeqCst), 1);
    assert!(!sync.is_dirty("day-one"));
}

#[tokio::test]
async fn new_journal_entries_are_saved_immediately_and_opened() {
    let saves = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&saves);
    let router = Router::new().route(
        "/entries/{id}",
        post(move |Path(_id): Path<String>, Json(body): Json<serde_json::Value>| {
            let counter = Arc::clone(&counter);
            async move {
                assert_eq!(body["type"], "journal");
                counter.fetch_add(1, Ordering::SeqCst);
                Json(json!({"modified": Utc::now().to_rfc3339()}))
            }
        }),
    );
    let base = serve(router).await;

    let dir = tempfile::tempdir().expect("temp dir");
    let core = WorkspaceCore::with_options(dir.path(), &base, fast_options()).expect("core");
    let date = chrono::NaiveDate::from_ymd_opt(2026, 8, 25).expect("valid date");
    let id = core.create_journal_entry(date).await.expect("create");

    // The initial save is synchronous, not debounced.
    assert_eq!(saves.load(Ordering::SeqCst), 1);
    let open = core.open_window(&id).expect("lookup").expect("window open");
    assert_eq!(open.document.title, "2026-08-25");
    assert_eq!(open.document.kind, DocumentKind::Journal);
    core.shutdown();
}

#[tokio::test]
async fn deleting_an_already_absent_document_still_closes_the_window() {
    let router = Router::new().route(
        "/entries/{id}",
        get(|Path(id): Path<String>| async move { Json(journal_json(&id, "doomed")) }).delete(
            |Path(_id): Path<String>| async {
                (StatusCode::NOT_FOUND, Json(json!({"error": "no such entry"})))
            },
        ),
    );
    let base = serve(router).await;

    let dir = tempfile::tempdir().expect("temp dir");
    let core = WorkspaceCore::with_options(dir.path(), &base, fast_options()).expect("core");
    core.open_document(DocumentKind::Journal, "day-one")
        .await
        .expect("open");

    core.delete_document(DocumentKind::Journal, "day-one")
        .await
        .expect("absent remote treated as deleted");
    assert!(core.open_window("day-one").expect("lookup").is_none());
    core.shutdown();
}

#[tokio::test]
async fn focus_reconciliation_adopts_newer_remote_content() {
    let opened_at = Utc::now();
    let served_modified = opened_at + ChronoDuration::seconds(30);
    let hits = Arc::new(AtomicU32::new(0));
    let router = {
        let counter = Arc::clone(&hits);
        let old_stamp = opened_at.to_rfc3339();
        let new_stamp = served_modified.to_rfc3339();
        Router::new().route(
            "/entries/{id}",
            get(move |Path(id): Path<String>| {
                let counter = Arc::clone(&counter);
                let old_stamp = old_stamp.clone();
                let new_stamp = new_stamp.clone();
                async move {
                    // First hit is the open; later hits simulate an edit
                    // made from another device in the meantime.
                    let (content, stamp) = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        ("first draft", old_stamp.clone())
                    } else {
                        ("edited elsewhere", new_stamp)
                    };
                    Json(json!({
                        "id": id,
                        "type": "journal",
                        "title": id,
                        "content": content,
                        "created": old_stamp,
                        "modified": stamp,
                        "tags": [],
                    }))
                }
            }),
        )
    };
    let base = serve(router).await;

    let dir = tempfile::tempdir().expect("temp dir");
    let core = WorkspaceCore::with_options(dir.path(), &base, fast_options()).expect("core");
    core.open_document(DocumentKind::Journal, "day-one")
        .await
        .expect("open");

    core.on_focus_regained().await.expect("reconcile");
    let open = core
        .open_window("day-one")
        .expect("lookup")
        .expect("still open");
    assert_eq!(open.document.content, "edited elsewhere");
    assert_eq!(open.document.modified_at.timestamp(), served_modified.timestamp());
    core.shutdown();
}
