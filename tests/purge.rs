mod common;

use std::time::Duration;

use common::{builder, MemorySnapshotter, TestEmitter, Toggle};
use tweakyard::policy::Policy;
use tweakyard::ErrorId;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn purge_is_refused_while_applied_and_counts_references_after() {
    let root = tempfile::tempdir().unwrap();
    let snap = MemorySnapshotter::default();
    snap.live.set("animations", "on-fancy");
    let facts = TestEmitter::default();
    let api = builder(root.path(), &facts, &snap, Policy::default())
        .with_mutation(Toggle::new("animations", &["animations"], &snap.live))
        .build()
        .unwrap();

    assert!(api.apply("animations").await.success);
    let bid = api.state("animations").unwrap().backup_id.unwrap();

    let refused = api.purge_backup(&bid);
    assert_eq!(refused.error_id(), Some(ErrorId::E_BACKUP_IN_USE));
    assert_eq!(api.list_backups("animations").unwrap().len(), 1);

    assert!(api.revert("animations").await.success);
    let purged = api.purge_backup(&bid);
    assert!(purged.success, "{}", purged.message);
    let refs = purged.detail("audit_references").and_then(serde_json::Value::as_u64).unwrap();
    assert!(refs >= 2, "expected capture and revert entries, got {refs}");
    assert!(api.list_backups("animations").unwrap().is_empty());
    assert_eq!(api.state("animations").unwrap().backup_id, None);

    let gone = api.purge_backup(&bid);
    assert_eq!(gone.error_id(), Some(ErrorId::E_BACKUP_MISSING));
    assert_eq!(
        api.backup_preview(&bid).err().map(|e| e.id()),
        Some(ErrorId::E_BACKUP_MISSING)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prune_keeps_newest_and_referenced_records() {
    let root = tempfile::tempdir().unwrap();
    let snap = MemorySnapshotter::default();
    let facts = TestEmitter::default();
    let api = builder(root.path(), &facts, &snap, Policy::default())
        .with_mutation(Toggle::new("wallpaper", &["wallpaper"], &snap.live))
        .build()
        .unwrap();

    for _ in 0..3 {
        assert!(api.apply("wallpaper").await.success);
        assert!(api.revert("wallpaper").await.success);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let before = api.list_backups("wallpaper").unwrap();
    assert_eq!(before.len(), 3);
    let newest = before.last().unwrap().id.clone();

    let res = api.prune_backups("wallpaper", Some(1), None).unwrap();
    assert_eq!(res.pruned_count, 2);
    assert_eq!(res.retained_count, 1);
    let after = api.list_backups("wallpaper").unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, newest);
    assert_eq!(api.state("wallpaper").unwrap().backup_id.as_deref(), Some(newest.as_str()));
    assert!(facts
        .steps("wallpaper", "purge")
        .contains(&("success".to_string(), "prune".to_string())));
}
