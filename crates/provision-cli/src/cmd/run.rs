use crate::cmd::{build_info, cancellation, load_settings, GlobalArgs, SourceArgs};
use crate::output::print_json;
use anyhow::Context;
use provision_core::policy::SystemFacts;
use provision_core::{load_config, ActionRegistry, ExecContext, Fetcher, RunSummary, Runner};
use tracing::error;

pub fn run(global: &GlobalArgs, source: &SourceArgs, verify_urls: &[String]) -> anyhow::Result<()> {
    let settings = load_settings(global)?;
    let rt = tokio::runtime::Runtime::new()?;

    let summary = rt.block_on(async {
        let cancel = cancellation(source.timeout);
        let build = build_info(&settings, source);
        let fetcher =
            Fetcher::from_settings(&settings, build.clone()).context("failed to create HTTP client")?;

        if !verify_urls.is_empty() {
            let failures = fetcher.verify_reachable(&cancel, verify_urls).await;
            for (url, e) in &failures {
                error!(url = %url, error = %e, "URL verification failed");
            }
            if !failures.is_empty() {
                anyhow::bail!(
                    "{} of {} verification URLs unreachable",
                    failures.len(),
                    verify_urls.len()
                );
            }
        }

        let tasks = load_config(&fetcher, &cancel, &source.source)
            .await
            .context("failed to load configuration")?;

        let registry = ActionRegistry::with_builtins();
        let ctx = ExecContext::new(cancel, build, settings.state_dir.clone());
        Runner::new(&registry, &SystemFacts, ctx)
            .with_base_delay(settings.action_base_delay())
            .run(&tasks)
            .await
            .context("provisioning run failed")
    })?;

    if global.json {
        print_json(&summary)?;
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Completed {} task(s): {} succeeded, {} policy gate(s) passed, {} failed and continued.",
        summary.total,
        summary.succeeded,
        summary.gates_passed,
        summary.continued.len()
    );
    for f in &summary.continued {
        println!(
            "  task {} ({}) failed after {} attempt(s): {}",
            f.index, f.action, f.attempts, f.error
        );
    }
}
