use super::{load_project, read_versions};
use crate::output::{or_dash, print_json, print_table};
use modelup_core::setup;
use modelup_core::version::{compare_versions, DEFAULT_VERSION};
use serde::Serialize;
use std::cmp::Ordering;
use std::path::Path;

#[derive(Serialize)]
struct ModelStatus {
    model: String,
    local: bool,
    /// `None` when nothing was ever recorded for the model.
    current: Option<String>,
    latest: Option<String>,
    status: &'static str,
}

#[derive(Serialize)]
struct StatusReport {
    fresh_node: bool,
    clustered: bool,
    models: Vec<ModelStatus>,
    /// Persisted entries for models the config no longer declares.
    unknown: Vec<String>,
}

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let (config, manager) = load_project(root)?;
    let versions = read_versions(&config, root, &manager)?;
    let topology = setup::topology(&config, root);

    let models: Vec<ModelStatus> = manager
        .models()
        .map(|spec| {
            let current = versions.get(&spec.key).cloned();
            let latest = manager.latest_version(&spec.key).map(str::to_string);
            let effective = current.as_deref().unwrap_or(DEFAULT_VERSION);
            let status = match latest.as_deref() {
                None => "no steps",
                Some(latest) => match compare_versions(effective, latest) {
                    Ordering::Less => "behind",
                    Ordering::Equal => "up to date",
                    Ordering::Greater => "ahead",
                },
            };
            ModelStatus {
                model: spec.key.clone(),
                local: spec.local,
                current,
                latest,
                status,
            }
        })
        .collect();
    let unknown: Vec<String> = versions
        .keys()
        .filter(|k| manager.model(k).is_none())
        .cloned()
        .collect();

    let report = StatusReport {
        fresh_node: topology.fresh_node,
        clustered: topology.clustered,
        models,
        unknown,
    };

    if json {
        return print_json(&report);
    }

    let node = if report.fresh_node { "fresh" } else { "existing" };
    let cluster = if report.clustered { "clustered" } else { "standalone" };
    println!("Node: {node}, {cluster}");
    println!();

    let rows: Vec<Vec<String>> = report
        .models
        .iter()
        .map(|m| {
            vec![
                m.model.clone(),
                if m.local { "local" } else { "shared" }.to_string(),
                or_dash(m.current.as_deref()),
                or_dash(m.latest.as_deref()),
                m.status.to_string(),
            ]
        })
        .collect();
    print_table(
        &["MODEL", "SCOPE", "CURRENT", "LATEST", "STATUS"],
        &rows,
        "No models declared.",
    );

    if !report.unknown.is_empty() {
        println!();
        println!("Recorded but not declared: {}", report.unknown.join(", "));
    }
    Ok(())
}
