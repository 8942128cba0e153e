use crate::cmd::{load_settings, GlobalArgs};
use crate::output::print_json;
use anyhow::Context;
use provision_core::stage::StageStore;

pub fn run(global: &GlobalArgs) -> anyhow::Result<()> {
    let settings = load_settings(global)?;
    let store = StageStore::new(&settings.state_dir);
    let current = store
        .current()
        .with_context(|| format!("failed to read {}", store.path().display()))?;

    if global.json {
        return print_json(&serde_json::json!({ "stage": current }));
    }
    match current {
        Some(record) => println!(
            "Stage {} (started {})",
            record.id,
            record.started_at.to_rfc3339()
        ),
        None => println!("No stage recorded."),
    }
    Ok(())
}
