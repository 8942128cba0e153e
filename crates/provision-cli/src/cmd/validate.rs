use crate::cmd::{build_info, cancellation, load_settings, GlobalArgs, SourceArgs};
use crate::output::{print_json, print_table};
use anyhow::Context;
use provision_core::{load_config, validate, ActionRegistry, ExecContext, Fetcher};

pub fn run(global: &GlobalArgs, source: &SourceArgs) -> anyhow::Result<()> {
    let settings = load_settings(global)?;
    let rt = tokio::runtime::Runtime::new()?;

    let report = rt.block_on(async {
        let cancel = cancellation(source.timeout);
        let build = build_info(&settings, source);
        let fetcher =
            Fetcher::from_settings(&settings, build.clone()).context("failed to create HTTP client")?;
        let tasks = load_config(&fetcher, &cancel, &source.source)
            .await
            .context("failed to load configuration")?;
        let ctx = ExecContext::new(cancel, build, settings.state_dir.clone());
        anyhow::Ok(validate(&tasks, &ActionRegistry::with_builtins(), &ctx))
    })?;

    if global.json {
        print_json(&report)?;
    } else if report.is_ok() {
        println!("Configuration is valid. {} task(s) checked.", report.checked);
    } else {
        let rows = report
            .issues
            .iter()
            .map(|i| vec![i.index.to_string(), i.key.clone(), i.message.clone()])
            .collect();
        print_table(&["TASK", "KEY", "ERROR"], rows);
    }

    report.into_result()?;
    Ok(())
}
