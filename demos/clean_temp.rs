use tweakyard::logging::JsonlSink;
use tweakyard::mutation::TempCleanup;
use tweakyard::policy::Policy;
use tweakyard::Tweakyard;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let app_root = tempfile::tempdir()?;
    let scratch = tempfile::tempdir()?;
    std::fs::create_dir_all(scratch.path().join("cache"))?;
    std::fs::write(scratch.path().join("cache/thumbs.db"), vec![0u8; 4096])?;
    std::fs::write(scratch.path().join("setup.log"), b"installer output")?;

    let api = Tweakyard::builder(JsonlSink::default(), JsonlSink::default(), Policy::default())
        .with_root(app_root.path())
        .with_mutation(TempCleanup::new(vec![scratch.path().to_path_buf()]))
        .build()?;

    let preview = api.simulate("clean-temp").await;
    println!("simulate: {} {:?}", preview.message, preview.detail("total_size_bytes"));

    let applied = api.apply("clean-temp").await;
    println!("apply: success={} {}", applied.success, applied.message);

    let reverted = api.revert("clean-temp").await;
    println!("revert: success={} {}", reverted.success, reverted.message);

    for status in api.list_mutations() {
        println!("{} -> {} (backup {:?})", status.id, status.state, status.backup_id);
    }
    Ok(())
}
