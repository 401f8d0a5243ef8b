mod support;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use support::{MockApi, buffered};
use tidemark_cloud::{MergeStrategy, SyncBinding, SyncEvent, SyncReconciler};
use tidemark_storage::{Collection, LocalStore};
use tokio::sync::broadcast;

fn reconciler(
    store: &LocalStore,
    api: &Arc<MockApi>,
    bindings: Vec<SyncBinding>,
) -> (SyncReconciler, broadcast::Receiver<SyncEvent>) {
    let (tx, rx) = broadcast::channel(64);
    (
        SyncReconciler::new(store.clone(), api.clone(), bindings, tx),
        rx,
    )
}

async fn ids(store: &LocalStore, collection: Collection) -> Vec<String> {
    let records: Vec<Value> = store.get_all(collection).await.unwrap();
    records
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn full_replace_drops_records_the_server_no_longer_lists() {
    let store = LocalStore::open_in_memory();
    store
        .cache_folders(&[json!({"id": "A"}), json!({"id": "B"}), json!({"id": "C"})])
        .await
        .unwrap();

    let api = MockApi::new();
    api.respond("/api/folders", json!([{"id": "A"}, {"id": "B"}]));
    let (sync, _rx) = reconciler(
        &store,
        &api,
        vec![SyncBinding::new(Collection::Folders, "/api/folders", MergeStrategy::FullReplace)],
    );

    let report = sync.sync_all().await;
    assert_eq!(report.synced, vec![Collection::Folders]);
    assert_eq!(ids(&store, Collection::Folders).await, vec!["A", "B"]);
}

#[tokio::test]
async fn lww_keeps_newer_local_record() {
    let store = LocalStore::open_in_memory();
    let local = json!({"id": "1", "title": "local edit", "updatedAt": "2024-03-01T10:00:00Z"});
    store.cache_note(&local).await.unwrap();

    let api = MockApi::new();
    api.respond(
        "/api/notes",
        json!([{"id": "1", "title": "server copy", "updatedAt": "2024-03-01T09:00:00Z"}]),
    );
    let (sync, _rx) = reconciler(
        &store,
        &api,
        vec![SyncBinding::new(Collection::Notes, "/api/notes", MergeStrategy::LastWriterWins)],
    );
    sync.sync_all().await;

    assert_eq!(store.cached_note("1").await.unwrap(), Some(local));
}

#[tokio::test]
async fn lww_overwrites_with_newer_server_record_and_applies_membership() {
    let store = LocalStore::open_in_memory();
    store
        .cache_notes(&[
            json!({"id": "1", "title": "old", "updatedAt": "2024-03-01T10:00:00Z"}),
            json!({"id": "2", "title": "deleted on server", "updatedAt": "2024-03-01T10:00:00Z"}),
        ])
        .await
        .unwrap();

    let newer = json!({"id": "1", "title": "new", "updatedAt": "2024-03-01T11:00:00Z"});
    let fresh = json!({"id": "3", "title": "created elsewhere", "updatedAt": "2024-03-01T08:00:00Z"});
    let api = MockApi::new();
    api.respond("/api/notes", json!([newer.clone(), fresh.clone()]));
    let (sync, _rx) = reconciler(
        &store,
        &api,
        vec![SyncBinding::new(Collection::Notes, "/api/notes", MergeStrategy::LastWriterWins)],
    );
    sync.sync_all().await;

    assert_eq!(store.cached_note("1").await.unwrap(), Some(newer));
    assert_eq!(store.cached_note("3").await.unwrap(), Some(fresh));
    assert_eq!(ids(&store, Collection::Notes).await, vec!["1", "3"]);
}

#[tokio::test]
async fn shallow_merge_keeps_local_only_settings() {
    let store = LocalStore::open_in_memory();
    store
        .save_settings(&json!({"theme": "dark", "sidebarWidth": 280}))
        .await
        .unwrap();

    let api = MockApi::new();
    api.respond("/api/settings", json!({"theme": "light", "language": "en"}));
    let (sync, _rx) = reconciler(
        &store,
        &api,
        vec![SyncBinding::new(
            Collection::Settings,
            "/api/settings",
            MergeStrategy::ShallowMerge { key: "app".into() },
        )],
    );
    sync.sync_all().await;

    assert_eq!(
        store.cached_settings().await.unwrap(),
        Some(json!({"id": "app", "theme": "light", "language": "en", "sidebarWidth": 280}))
    );
}

#[tokio::test]
async fn one_failing_collection_does_not_stop_the_others() {
    let store = LocalStore::open_in_memory();
    store.cache_tags(&[json!({"id": "t-old"})]).await.unwrap();

    let api = MockApi::new();
    api.fail("/api/tags");
    api.respond("/api/folders", json!([{"id": "f1"}]));
    api.respond("/api/workspaces", json!({"not": "a list"}));
    api.respond("/api/models", json!([{"id": "m1"}]));

    let (sync, mut rx) = reconciler(
        &store,
        &api,
        vec![
            SyncBinding::new(Collection::Tags, "/api/tags", MergeStrategy::FullReplace),
            SyncBinding::new(Collection::Folders, "/api/folders", MergeStrategy::FullReplace),
            SyncBinding::new(Collection::Workspaces, "/api/workspaces", MergeStrategy::FullReplace),
            SyncBinding::new(Collection::AiModels, "/api/models", MergeStrategy::FullReplace),
        ],
    );
    let report = sync.sync_all().await;

    assert_eq!(report.synced, vec![Collection::Folders, Collection::AiModels]);
    let failed: Vec<Collection> = report.failed.iter().map(|f| f.collection).collect();
    assert_eq!(failed, vec![Collection::Tags, Collection::Workspaces]);

    assert_eq!(ids(&store, Collection::Tags).await, vec!["t-old"]);
    assert_eq!(ids(&store, Collection::Folders).await, vec!["f1"]);
    assert_eq!(ids(&store, Collection::AiModels).await, vec!["m1"]);

    let events = buffered(&mut rx);
    assert!(matches!(events.last(), Some(SyncEvent::SyncCompleted(r)) if *r == report));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SyncEvent::CollectionFailed(_)))
            .count(),
        2
    );
}

#[tokio::test]
async fn default_bindings_reconcile_every_server_owned_collection() {
    let store = LocalStore::open_in_memory();
    let api = MockApi::new();
    for binding in SyncBinding::defaults() {
        let data = match binding.strategy {
            MergeStrategy::ShallowMerge { .. } => json!({"synced": true}),
            _ => json!([{"id": format!("{}-1", binding.collection)}]),
        };
        api.respond(&binding.endpoint, data);
    }
    let (sync, _rx) = reconciler(&store, &api, SyncBinding::defaults());

    let report = sync.sync_all().await;
    assert!(report.is_clean());
    assert_eq!(report.synced.len(), SyncBinding::defaults().len());
    assert_eq!(ids(&store, Collection::AiAssistants).await, vec!["ai_assistants-1"]);
    assert_eq!(store.cached_ai_settings().await.unwrap().unwrap()["synced"], true);
}

#[tokio::test]
async fn reconciling_into_an_unavailable_store_still_succeeds() {
    let store = LocalStore::unavailable();
    let api = MockApi::new();
    api.respond("/api/notes", json!([{"id": "1"}]));
    let (sync, _rx) = reconciler(
        &store,
        &api,
        vec![SyncBinding::new(Collection::Notes, "/api/notes", MergeStrategy::LastWriterWins)],
    );

    let report = sync.sync_all().await;
    assert!(report.is_clean());
    assert!(store.cached_notes().await.unwrap().is_empty());
}
