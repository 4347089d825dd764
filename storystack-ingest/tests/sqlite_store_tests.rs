//! SQLite asset store tests

mod helpers;

use helpers::db_utils::{create_legacy_db, create_test_db, drop_fingerprint_column, has_column};
use storystack_common::{AutoTagStatus, Error};
use storystack_ingest::db::{AssetStore, SqliteAssetStore};
use storystack_ingest::models::{AssetPatch, NewAsset};
use uuid::Uuid;

fn new_asset(owner: Uuid, fingerprint: Option<&str>) -> NewAsset {
    NewAsset::imported(
        owner,
        Uuid::new_v4(),
        format!("{}/c/{}.jpg", owner, Uuid::new_v4()),
        fingerprint.map(str::to_string),
    )
}

#[tokio::test]
async fn test_create_and_get_round_trip() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let store = SqliteAssetStore::open(pool).await.unwrap();
    assert!(store.capabilities().content_fingerprint);
    let owner = Uuid::new_v4();

    let created = store.create_asset(&new_asset(owner, Some("fp-1"))).await.unwrap();
    let loaded = store.get_asset(created.id).await.unwrap().unwrap();

    assert_eq!(loaded.id, created.id);
    assert_eq!(loaded.owner_id, owner);
    assert_eq!(loaded.storage_path, created.storage_path);
    assert_eq!(loaded.content_fingerprint.as_deref(), Some("fp-1"));
    assert_eq!(loaded.auto_tag_status, AutoTagStatus::None);
    assert!(loaded.tags.is_empty());
    assert_eq!(loaded.location, None);
    assert_eq!(store.get_asset(Uuid::new_v4()).await.unwrap(), None);
}

#[tokio::test]
async fn test_patch_updates_only_given_fields() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let store = SqliteAssetStore::open(pool).await.unwrap();
    let asset = store.create_asset(&new_asset(Uuid::new_v4(), None)).await.unwrap();

    store
        .update_asset(
            asset.id,
            &AssetPatch::status(AutoTagStatus::Pending).with_batch_id(Some("batch-9".into())),
        )
        .await
        .unwrap();
    store
        .update_asset(
            asset.id,
            &AssetPatch {
                location: Some(Some("Tromsø".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let loaded = store.get_asset(asset.id).await.unwrap().unwrap();
    assert_eq!(loaded.auto_tag_status, AutoTagStatus::Pending);
    assert_eq!(loaded.batch_id.as_deref(), Some("batch-9"));
    assert_eq!(loaded.location.as_deref(), Some("Tromsø"));

    store
        .update_asset(
            asset.id,
            &AssetPatch::status(AutoTagStatus::Completed)
                .with_tags(vec!["fjord".into(), "boat".into()])
                .with_batch_id(None),
        )
        .await
        .unwrap();
    let loaded = store.get_asset(asset.id).await.unwrap().unwrap();
    assert_eq!(loaded.tags, vec!["fjord".to_string(), "boat".to_string()]);
    assert_eq!(loaded.batch_id, None);
    assert_eq!(loaded.location.as_deref(), Some("Tromsø"));
}

#[tokio::test]
async fn test_update_missing_asset_is_not_found() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let store = SqliteAssetStore::open(pool).await.unwrap();

    let result = store
        .update_asset(Uuid::new_v4(), &AssetPatch::status(AutoTagStatus::Pending))
        .await;

    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_existing_fingerprints_are_scoped_to_owner() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let store = SqliteAssetStore::open(pool).await.unwrap();
    let (owner, other) = (Uuid::new_v4(), Uuid::new_v4());
    store.create_asset(&new_asset(owner, Some("aaa"))).await.unwrap();
    store.create_asset(&new_asset(other, Some("bbb"))).await.unwrap();
    store.create_asset(&new_asset(owner, None)).await.unwrap();

    let found = store
        .existing_fingerprints(owner, &["aaa".into(), "bbb".into(), "ccc".into()])
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert!(found.contains("aaa"));
    assert!(store.existing_fingerprints(owner, &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fingerprint_lookup_handles_many_candidates() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let store = SqliteAssetStore::open(pool).await.unwrap();
    let owner = Uuid::new_v4();
    store.create_asset(&new_asset(owner, Some("fp-1234"))).await.unwrap();

    let candidates: Vec<String> = (0..1500).map(|i| format!("fp-{}", i)).collect();
    let found = store.existing_fingerprints(owner, &candidates).await.unwrap();

    assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["fp-1234".to_string()]);
}

#[tokio::test]
async fn test_list_by_status() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let store = SqliteAssetStore::open(pool).await.unwrap();
    let owner = Uuid::new_v4();
    let failed = store.create_asset(&new_asset(owner, None)).await.unwrap();
    store.create_asset(&new_asset(owner, None)).await.unwrap();
    store
        .update_asset(failed.id, &AssetPatch::status(AutoTagStatus::Failed))
        .await
        .unwrap();

    let listed = store.list_by_status(owner, AutoTagStatus::Failed).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, failed.id);
    assert!(store
        .list_by_status(Uuid::new_v4(), AutoTagStatus::Failed)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_legacy_table_without_fingerprint_column() {
    let (_dir, pool) = create_legacy_db().await.unwrap();
    let store = SqliteAssetStore::open(pool).await.unwrap();
    assert!(!store.capabilities().content_fingerprint);
    let owner = Uuid::new_v4();

    let created = store.create_asset(&new_asset(owner, Some("fp-1"))).await.unwrap();
    let loaded = store.get_asset(created.id).await.unwrap().unwrap();

    assert_eq!(created.content_fingerprint, None);
    assert_eq!(loaded.content_fingerprint, None);
    assert!(store
        .existing_fingerprints(owner, &["fp-1".into()])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_column_dropped_after_open_reports_drift() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let store = SqliteAssetStore::open(pool.clone()).await.unwrap();
    drop_fingerprint_column(&pool).await.unwrap();
    assert!(!has_column(&pool, "assets", "content_fingerprint").await.unwrap());

    let with_fp = new_asset(Uuid::new_v4(), Some("fp-1"));
    let result = store.create_asset(&with_fp).await;
    assert!(matches!(result, Err(Error::SchemaDrift { .. })), "got {:?}", result);

    let created = store.create_asset(&with_fp.without_fingerprint()).await.unwrap();
    assert_eq!(created.content_fingerprint, None);
}
