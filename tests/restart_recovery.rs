mod common;

use common::{builder, MemorySnapshotter, TestEmitter, Toggle};
use tweakyard::policy::Policy;
use tweakyard::types::MutationState;
use tweakyard::ErrorId;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interrupted_transactions_become_failed_and_stay_revertible() {
    let root = tempfile::tempdir().unwrap();
    let snap = MemorySnapshotter::default();
    snap.live.set("startup-apps", "many");

    {
        let facts = TestEmitter::default();
        let api = builder(root.path(), &facts, &snap, Policy::default())
            .with_mutation(Toggle::new("startup-apps", &["startup-apps"], &snap.live))
            .build()
            .unwrap();
        assert!(api.apply("startup-apps").await.success);
    }

    // Simulate a crash in the middle of the apply.
    let state_path = root.path().join("state.json");
    let mut ledger: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&state_path).unwrap()).unwrap();
    ledger["entries"]["startup-apps"]["in_progress"] = serde_json::json!("apply");
    std::fs::write(&state_path, serde_json::to_vec(&ledger).unwrap()).unwrap();

    let facts = TestEmitter::default();
    let api = builder(root.path(), &facts, &snap, Policy::default())
        .with_mutation(Toggle::new("startup-apps", &["startup-apps"], &snap.live))
        .build()
        .unwrap();
    assert_eq!(api.state("startup-apps").unwrap().state, MutationState::Failed);
    assert_eq!(
        facts.steps("startup-apps", "recovery"),
        vec![("warn".to_string(), "reconcile".to_string())]
    );

    let r = api.revert("startup-apps").await;
    assert!(r.success, "{}", r.message);
    assert_eq!(snap.live.get("startup-apps").as_deref(), Some("many"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn applied_entry_with_missing_record_becomes_degraded() {
    let root = tempfile::tempdir().unwrap();
    let snap = MemorySnapshotter::default();
    {
        let facts = TestEmitter::default();
        let api = builder(root.path(), &facts, &snap, Policy::default())
            .with_mutation(Toggle::new("defrag", &["defrag"], &snap.live))
            .build()
            .unwrap();
        assert!(api.apply("defrag").await.success);
    }
    std::fs::remove_dir_all(root.path().join("backups/manifests/defrag")).unwrap();

    let facts = TestEmitter::default();
    let api = builder(root.path(), &facts, &snap, Policy::default())
        .with_mutation(Toggle::new("defrag", &["defrag"], &snap.live))
        .build()
        .unwrap();
    assert_eq!(api.state("defrag").unwrap().state, MutationState::Degraded);
    let ledger: serde_json::Value =
        serde_json::from_slice(&std::fs::read(root.path().join("state.json")).unwrap()).unwrap();
    assert_eq!(ledger["entries"]["defrag"]["state"], serde_json::json!("degraded"));
}

#[test]
fn second_engine_on_the_same_root_times_out_on_the_lock() {
    let root = tempfile::tempdir().unwrap();
    let snap = MemorySnapshotter::default();
    let facts = TestEmitter::default();
    let mut policy = Policy::default();
    policy.lock_timeout_ms = 50;
    let _first = builder(root.path(), &facts, &snap, policy.clone()).build().unwrap();
    let err = builder(root.path(), &facts, &snap, policy).build().err().unwrap();
    assert_eq!(err.id(), ErrorId::E_LOCKING);
}

#[test]
fn leftover_staging_is_swept_at_startup() {
    let root = tempfile::tempdir().unwrap();
    let staging = root.path().join("backups/.staging/0000-interrupted");
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join("0"), b"partial").unwrap();
    let snap = MemorySnapshotter::default();
    let _api = builder(root.path(), &TestEmitter::default(), &snap, Policy::default())
        .build()
        .unwrap();
    assert!(!staging.exists());
}
