use crate::output::print_json;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let snapshot = config.snapshot_path();
    let notifier = super::notifier(root, config)?;
    let state = notifier.warmup()?;

    if json {
        let value = serde_json::json!({
            "state": state,
            "snapshot": snapshot,
        });
        return print_json(&value);
    }
    println!("Session {state}. Snapshot: {}", snapshot.display());
    Ok(())
}
