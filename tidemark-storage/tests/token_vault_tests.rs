use pretty_assertions::assert_eq;
use std::sync::Arc;
use tidemark_storage::{
    Collection, LegacyTokenFile, LegacyTokenSource, LocalStore, MigrationOutcome, StoreLocation,
    TokenRecord, TokenVault,
};

fn seed_legacy(dir: &std::path::Path) -> Arc<LegacyTokenFile> {
    let path = dir.join("legacy-auth.json");
    std::fs::write(
        &path,
        r#"{"accessToken":"legacy-at","refreshToken":"legacy-rt"}"#,
    )
    .unwrap();
    Arc::new(LegacyTokenFile::new(path))
}

#[tokio::test]
async fn save_get_clear() {
    let vault = TokenVault::new(LocalStore::open_in_memory());
    assert!(vault.tokens().await.unwrap().is_none());

    vault.save_tokens("at", "rt").await.unwrap();
    assert_eq!(vault.tokens().await.unwrap(), Some(TokenRecord::new("at", "rt")));
    assert_eq!(vault.access_token().await.as_deref(), Some("at"));

    vault.save_tokens("at2", "rt2").await.unwrap();
    assert_eq!(vault.access_token().await.as_deref(), Some("at2"));

    vault.clear_tokens().await.unwrap();
    assert!(vault.tokens().await.unwrap().is_none());
}

#[tokio::test]
async fn token_record_lives_under_auth_in_settings() {
    let store = LocalStore::open_in_memory();
    TokenVault::new(store.clone()).save_tokens("at", "rt").await.unwrap();

    let raw: serde_json::Value = store.get(Collection::Settings, "auth").await.unwrap().unwrap();
    assert_eq!(
        raw,
        serde_json::json!({"id": "auth", "accessToken": "at", "refreshToken": "rt"})
    );
}

#[tokio::test]
async fn migration_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = seed_legacy(dir.path());
    let store = LocalStore::new(StoreLocation::in_dir(dir.path()));
    let vault = TokenVault::new(store.clone()).with_legacy_source(legacy.clone());

    assert_eq!(vault.migrate_legacy().await.unwrap(), MigrationOutcome::Migrated);
    assert_eq!(
        vault.tokens().await.unwrap(),
        Some(TokenRecord::new("legacy-at", "legacy-rt"))
    );
    assert!(legacy.load().unwrap().is_none());
    assert!(!legacy.path().exists());

    assert_eq!(vault.migrate_legacy().await.unwrap(), MigrationOutcome::AlreadyMigrated);
    assert_eq!(
        vault.tokens().await.unwrap(),
        Some(TokenRecord::new("legacy-at", "legacy-rt"))
    );
    assert_eq!(store.count(Collection::Settings).await.unwrap(), 1);
}

#[tokio::test]
async fn migration_does_not_overwrite_existing_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = seed_legacy(dir.path());
    let vault = TokenVault::new(LocalStore::open_in_memory()).with_legacy_source(legacy.clone());
    vault.save_tokens("fresh-at", "fresh-rt").await.unwrap();

    assert_eq!(vault.migrate_legacy().await.unwrap(), MigrationOutcome::AlreadyMigrated);
    assert_eq!(vault.access_token().await.as_deref(), Some("fresh-at"));
    assert!(!legacy.path().exists());
}

#[tokio::test]
async fn migration_without_legacy_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = Arc::new(LegacyTokenFile::new(dir.path().join("absent.json")));
    let vault = TokenVault::new(LocalStore::open_in_memory()).with_legacy_source(legacy);
    assert_eq!(vault.migrate_legacy().await.unwrap(), MigrationOutcome::NoLegacyTokens);

    let no_source = TokenVault::new(LocalStore::open_in_memory());
    assert_eq!(no_source.migrate_legacy().await.unwrap(), MigrationOutcome::NoLegacyTokens);
}

#[tokio::test]
async fn corrupt_legacy_file_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.json");
    std::fs::write(&path, "{not json").unwrap();
    let vault = TokenVault::new(LocalStore::open_in_memory())
        .with_legacy_source(Arc::new(LegacyTokenFile::new(&path)));

    assert_eq!(vault.migrate_legacy().await.unwrap(), MigrationOutcome::NoLegacyTokens);
    assert!(vault.tokens().await.unwrap().is_none());
}

#[tokio::test]
async fn unavailable_store_uses_legacy_tokens_for_the_session_only() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = seed_legacy(dir.path());
    let vault = TokenVault::new(LocalStore::unavailable()).with_legacy_source(legacy.clone());

    assert_eq!(vault.migrate_legacy().await.unwrap(), MigrationOutcome::StoreUnavailable);
    assert_eq!(vault.access_token().await.as_deref(), Some("legacy-at"));
    assert!(legacy.path().exists(), "legacy copy must survive when nothing persisted it");
}

#[tokio::test]
async fn unavailable_store_keeps_saved_tokens_in_memory() {
    let vault = TokenVault::new(LocalStore::unavailable());
    vault.save_tokens("at", "rt").await.unwrap();
    assert_eq!(vault.access_token().await.as_deref(), Some("at"));
    vault.clear_tokens().await.unwrap();
    assert!(vault.access_token().await.is_none());
}
