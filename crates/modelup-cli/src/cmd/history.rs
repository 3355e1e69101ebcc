use crate::output::{print_json, print_table};
use anyhow::Context;
use modelup_core::history::{History, HistoryEntry};
use std::path::Path;

pub fn run(root: &Path, limit: usize, json: bool) -> anyhow::Result<()> {
    let history = History::load(root).context("failed to load run history")?;
    let entries: Vec<&HistoryEntry> = history.recent(limit).collect();

    if json {
        return print_json(&entries);
    }

    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|e| {
            let run_id = e
                .run_id
                .map(|id| id.simple().to_string()[..8].to_string())
                .unwrap_or_else(|| "-".to_string());
            let detail = match &e.error {
                Some(err) => err.clone(),
                None => e.changes.join(", "),
            };
            vec![
                e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                run_id,
                e.status.to_string(),
                detail,
            ]
        })
        .collect();
    print_table(&["TIME", "RUN", "STATUS", "DETAIL"], &rows, "No runs recorded.");
    Ok(())
}
