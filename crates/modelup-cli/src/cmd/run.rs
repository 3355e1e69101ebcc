use crate::output::print_json;
use anyhow::Context;
use modelup_core::config::Config;
use modelup_core::history::{self, HistoryEntry};
use modelup_core::{setup, RunOutcome, UpgradeReport};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let mut service =
        setup::service(&config, root).context("config cannot be run")?;

    let result = service.start();
    if let Err(e) = service.stop() {
        tracing::warn!(error = %e, "failed to stop version store");
    }

    let entry = match &result {
        Ok(report) => HistoryEntry::from_report(report),
        Err(e) => HistoryEntry::failed(service.run_id(), e),
    };
    if let Err(e) = history::append(root, entry) {
        tracing::warn!(error = %e, "failed to record run history");
    }

    let report = result.context("upgrade failed; persisted versions are unchanged")?;
    if json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &UpgradeReport) {
    match &report.outcome {
        RunOutcome::UpToDate => println!("All models are up to date."),
        RunOutcome::Inventoried { models } => {
            println!("Fresh node: recorded versions without running steps.");
            for model in models {
                let version = report.versions.get(model).map(String::as_str).unwrap_or("-");
                println!("  {model} = {version}");
            }
        }
        RunOutcome::Upgraded { steps } => {
            println!("Upgraded {} step(s):", steps.len());
            for s in steps {
                println!("  {} {} -> {}", s.model, s.from, s.to);
            }
        }
    }
    if report.cleanup_failures > 0 {
        println!(
            "warning: {} checkpoint(s) failed to clean up; see log output",
            report.cleanup_failures
        );
    }
}
