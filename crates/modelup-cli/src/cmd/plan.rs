use super::{load_project, read_versions};
use crate::output::{print_json, print_table};
use modelup_core::setup;
use modelup_core::step::StepRecord;
use modelup_core::UpgradeStep;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Mode {
    /// Steps would run under checkpoints.
    Upgrade,
    /// Fresh node: target versions would be recorded without running steps.
    Inventory,
}

#[derive(Serialize)]
struct PlanReport {
    mode: Mode,
    steps: Vec<StepRecord>,
}

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let (config, manager) = load_project(root)?;
    let versions = read_versions(&config, root, &manager)?;
    let plan = manager.plan(&versions)?;

    let mode = if setup::topology(&config, root).fresh_node {
        Mode::Inventory
    } else {
        Mode::Upgrade
    };
    let report = PlanReport {
        mode,
        steps: plan.iter().map(UpgradeStep::record).collect(),
    };

    if json {
        return print_json(&report);
    }

    if report.steps.is_empty() {
        println!("All models are up to date.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = report
        .steps
        .iter()
        .map(|s| vec![s.model.clone(), s.from.clone(), s.to.clone()])
        .collect();
    print_table(&["MODEL", "FROM", "TO"], &rows, "");

    println!();
    match report.mode {
        Mode::Upgrade => println!("{} step(s) will run on 'modelup run'.", rows.len()),
        Mode::Inventory => {
            println!("Fresh node: 'modelup run' will record these versions without running steps.")
        }
    }
    Ok(())
}
