mod common;

use std::sync::atomic::Ordering;

use common::{builder, eventually, Behavior, MemorySnapshotter, TestEmitter, Toggle};
use tweakyard::policy::Policy;
use tweakyard::types::MutationState;
use tweakyard::ErrorId;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_apply_of_one_id_is_rejected_immediately() {
    let root = tempfile::tempdir().unwrap();
    let snap = MemorySnapshotter::default();
    let facts = TestEmitter::default();
    let slow = Toggle::new("power-plan", &["power-plan"], &snap.live).behaving(Behavior::Hang);
    let release = slow.release.clone();
    let api = builder(root.path(), &facts, &snap, Policy::default())
        .with_mutation(slow)
        .build()
        .unwrap();

    let first = api.spawn_apply("power-plan").unwrap();
    assert!(api.state("power-plan").unwrap().in_flight);

    for _ in 0..3 {
        let err = api.spawn_apply("power-plan").err().unwrap();
        assert_eq!(err.id(), ErrorId::E_TXN_IN_PROGRESS);
    }
    let rejected = api.apply("power-plan").await;
    assert_eq!(rejected.error_id(), Some(ErrorId::E_TXN_IN_PROGRESS));
    assert_eq!(
        api.spawn_revert("power-plan").err().map(|e| e.id()),
        Some(ErrorId::E_TXN_IN_PROGRESS)
    );

    release.store(true, Ordering::SeqCst);
    let r = first.wait().await;
    assert!(r.success, "{}", r.message);
    assert_eq!(api.list_backups("power-plan").unwrap().len(), 1);
    let status = api.state("power-plan").unwrap();
    assert_eq!(status.state, MutationState::Applied);
    assert!(!status.in_flight);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_ids_run_concurrently() {
    let root = tempfile::tempdir().unwrap();
    let snap = MemorySnapshotter::default();
    let facts = TestEmitter::default();
    let a = Toggle::new("a", &["a"], &snap.live).behaving(Behavior::Hang);
    let b = Toggle::new("b", &["b"], &snap.live).behaving(Behavior::Hang);
    let (ra, rb) = (a.release.clone(), b.release.clone());
    let mut policy = Policy::default();
    policy.concurrency.max_in_flight = 2;
    let api = builder(root.path(), &facts, &snap, policy)
        .with_mutation(a)
        .with_mutation(b)
        .build()
        .unwrap();

    let ha = api.spawn_apply("a").unwrap();
    let hb = api.spawn_apply("b").unwrap();
    let live = snap.live.clone();
    assert!(eventually(|| live.get("a").is_some() && live.get("b").is_some()).await);
    rb.store(true, Ordering::SeqCst);
    assert!(hb.wait().await.success);
    assert!(!ha.is_finished());
    ra.store(true, Ordering::SeqCst);
    assert!(ha.wait().await.success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_while_queued_aborts_without_a_record() {
    let root = tempfile::tempdir().unwrap();
    let snap = MemorySnapshotter::default();
    let facts = TestEmitter::default();
    let holder = Toggle::new("holder", &["holder"], &snap.live).behaving(Behavior::Hang);
    let release = holder.release.clone();
    let mut policy = Policy::default();
    policy.concurrency.max_in_flight = 1;
    let api = builder(root.path(), &facts, &snap, policy)
        .with_mutation(holder)
        .with_mutation(Toggle::new("queued", &["queued"], &snap.live))
        .build()
        .unwrap();

    let h1 = api.spawn_apply("holder").unwrap();
    let live = snap.live.clone();
    assert!(eventually(|| live.get("holder").is_some()).await);
    assert_eq!(api.context().available_permits(), 0);

    let h2 = api.spawn_apply("queued").unwrap();
    h2.cancel();
    release.store(true, Ordering::SeqCst);
    assert!(h1.wait().await.success);

    let r = h2.wait().await;
    assert_eq!(r.error_id(), Some(ErrorId::E_CANCELLED));
    assert!(api.list_backups("queued").unwrap().is_empty());
    assert_eq!(snap.live.get("queued"), None);
    assert_eq!(api.state("queued").unwrap().state, MutationState::NotRun);
}
