use crate::output::print_json;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let profile = config.profile_dir();
    let notifier = super::notifier(root, config)?;
    let removed = notifier.clear_locks()?;

    if json {
        let value = serde_json::json!({
            "profile_dir": profile,
            "removed": removed,
        });
        return print_json(&value);
    }
    if removed.is_empty() {
        println!("No locks found in {}", profile.display());
    } else {
        println!("Removed {} from {}", removed.join(", "), profile.display());
    }
    Ok(())
}
