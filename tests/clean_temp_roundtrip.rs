mod common;

use common::{builder, MemorySnapshotter, TestEmitter};
use tweakyard::fs::meta::tree_digest;
use tweakyard::logging::{read_entries, Decision};
use tweakyard::mutation::TempCleanup;
use tweakyard::policy::Policy;
use tweakyard::types::{ImpactLevel, MutationState, Phase};

fn seed(dir: &std::path::Path) -> u64 {
    std::fs::create_dir_all(dir.join("nested/deeper")).unwrap();
    std::fs::write(dir.join("a.log"), vec![1u8; 1000]).unwrap();
    std::fs::write(dir.join("nested/b.tmp"), vec![2u8; 250]).unwrap();
    std::fs::write(dir.join("nested/deeper/c.bin"), b"cache").unwrap();
    1000 + 250 + 5
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clean_temp_simulate_apply_revert_restores_byte_identical_tree() {
    let root = tempfile::tempdir().unwrap();
    let temp = tempfile::tempdir().unwrap();
    let expected_bytes = seed(temp.path());
    let before = tree_digest(temp.path()).unwrap();

    let facts = TestEmitter::default();
    let api = builder(root.path(), &facts, &MemorySnapshotter::default(), Policy::default())
        .with_mutation(TempCleanup::new(vec![temp.path().to_path_buf()]))
        .build()
        .unwrap();

    let sim = api.simulate("clean-temp").await;
    assert!(sim.success, "{}", sim.message);
    assert_eq!(sim.detail("total_size_bytes"), Some(&serde_json::json!(expected_bytes)));
    assert_eq!(sim.detail("file_count"), Some(&serde_json::json!(3)));
    assert_eq!(sim.detail("preflight").unwrap()["ok"], serde_json::json!(true));
    assert_eq!(tree_digest(temp.path()).unwrap(), before);
    assert_eq!(api.state("clean-temp").unwrap().state, MutationState::Simulated);

    let applied = api.apply("clean-temp").await;
    assert!(applied.success, "{}", applied.message);
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    let status = api.state("clean-temp").unwrap();
    assert_eq!(status.state, MutationState::Applied);
    let records = api.list_backups("clean-temp").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].phase, Phase::Apply);
    assert_eq!(records[0].total_bytes(), expected_bytes);
    assert_eq!(status.backup_id.as_deref(), Some(records[0].id.as_str()));

    let preview = api.backup_preview(&records[0].id).unwrap();
    assert_eq!(preview.total_bytes, expected_bytes);

    let reverted = api.revert("clean-temp").await;
    assert!(reverted.success, "{}", reverted.message);
    assert_eq!(tree_digest(temp.path()).unwrap(), before);
    assert_eq!(api.state("clean-temp").unwrap().state, MutationState::Reverted);

    let again = api.revert("clean-temp").await;
    assert!(again.success, "{}", again.message);
    assert_eq!(tree_digest(temp.path()).unwrap(), before);
    assert_eq!(api.state("clean-temp").unwrap().state, MutationState::Reverted);

    let journal = read_entries(&api.context().log_path).unwrap();
    assert!(journal
        .iter()
        .any(|e| e.phase == Phase::Apply && e.step.as_deref() == Some("result") && e.decision == Decision::Success));
    assert!(journal
        .iter()
        .any(|e| e.phase == Phase::Revert && e.decision == Decision::Success));
    assert!(journal.iter().all(|e| e.mutation_id == "clean-temp"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn apply_is_refused_while_applied() {
    let root = tempfile::tempdir().unwrap();
    let temp = tempfile::tempdir().unwrap();
    seed(temp.path());
    let facts = TestEmitter::default();
    let api = builder(root.path(), &facts, &MemorySnapshotter::default(), Policy::default())
        .with_mutation(TempCleanup::new(vec![temp.path().to_path_buf()]))
        .build()
        .unwrap();

    assert!(api.apply("clean-temp").await.success);
    let second = api.apply("clean-temp").await;
    assert!(!second.success);
    assert_eq!(second.error_id(), Some(tweakyard::ErrorId::E_INVALID_STATE));
    assert_eq!(api.list_backups("clean-temp").unwrap().len(), 1);

    // simulate never demotes an applied mutation
    assert!(api.simulate("clean-temp").await.success);
    assert_eq!(api.state("clean-temp").unwrap().state, MutationState::Applied);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simulate_after_revert_keeps_later_files_safe_from_a_second_revert() {
    let root = tempfile::tempdir().unwrap();
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(temp.path().join("old.tmp"), b"stale").unwrap();
    let facts = TestEmitter::default();
    let api = builder(root.path(), &facts, &MemorySnapshotter::default(), Policy::default())
        .with_mutation(TempCleanup::new(vec![temp.path().to_path_buf()]))
        .build()
        .unwrap();

    assert!(api.apply("clean-temp").await.success);
    assert!(api.revert("clean-temp").await.success);
    assert!(api.simulate("clean-temp").await.success);
    assert_eq!(api.state("clean-temp").unwrap().state, MutationState::Reverted);

    std::fs::remove_file(temp.path().join("old.tmp")).unwrap();
    std::fs::write(temp.path().join("user_work.doc"), b"draft").unwrap();

    let r = api.revert("clean-temp").await;
    assert!(r.success, "{}", r.message);
    assert_eq!(std::fs::read(temp.path().join("user_work.doc")).unwrap(), b"draft");
    assert!(!temp.path().join("old.tmp").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn revert_before_any_apply_is_refused() {
    let root = tempfile::tempdir().unwrap();
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(temp.path().join("keep.txt"), b"mine").unwrap();
    let facts = TestEmitter::default();
    let api = builder(root.path(), &facts, &MemorySnapshotter::default(), Policy::default())
        .with_mutation(TempCleanup::new(vec![temp.path().to_path_buf()]))
        .build()
        .unwrap();

    assert!(api.simulate("clean-temp").await.success);
    let r = api.revert("clean-temp").await;
    assert_eq!(r.error_id(), Some(tweakyard::ErrorId::E_INVALID_STATE));
    assert_eq!(api.state("clean-temp").unwrap().state, MutationState::Simulated);
    assert!(temp.path().join("keep.txt").exists());
}

#[test]
fn listing_carries_description_impact_and_estimated_time() {
    let root = tempfile::tempdir().unwrap();
    let temp = tempfile::tempdir().unwrap();
    let snap = MemorySnapshotter::default();
    let mut reset = common::Toggle::new("net-reset", &["winsock"], &snap.live);
    reset.descriptor.description = "Resets the network stack.";
    reset.descriptor.impact = ImpactLevel::High;
    reset.descriptor.estimated_time = std::time::Duration::from_secs(60);
    let facts = TestEmitter::default();
    let api = builder(root.path(), &facts, &snap, Policy::default())
        .with_mutation(TempCleanup::new(vec![temp.path().to_path_buf()]))
        .with_mutation(reset)
        .build()
        .unwrap();

    let listed = api.list_mutations();
    let clean = listed.iter().find(|s| s.id == "clean-temp").unwrap();
    assert!(!clean.description.is_empty());
    assert_eq!(clean.impact, ImpactLevel::Low);
    assert_eq!(clean.estimated_time_secs, 30);
    let net = listed.iter().find(|s| s.id == "net-reset").unwrap();
    assert_eq!(net.description, "Resets the network stack.");
    assert_eq!(net.impact, ImpactLevel::High);
    assert_eq!(net.estimated_time_secs, 60);
    assert_eq!(serde_json::to_value(net).unwrap()["impact"], serde_json::json!("high"));
}
