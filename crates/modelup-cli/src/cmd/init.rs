use anyhow::Context;
use modelup_core::{io, paths};
use std::path::Path;

/// Starter config written by `modelup init`.
pub const CONFIG_TEMPLATE: &str = r#"# modelup configuration
#
# Each model is a piece of persisted data whose shape is versioned on its
# own. Steps move one model from `from` to `to` by running `command` in the
# project root, with MODELUP_MODEL, MODELUP_FROM and MODELUP_TO set.
#
# models:
#   - key: config
#     data_dir: data/config     # backed up before upgrading, restored on failure
#   - key: search-index
#     local: true               # data lives on this node only
#     depends_on: [config]
#
# steps:
#   - model: config
#     from: "1.0"
#     to: "1.1"
#     command: ./migrations/config-1.1.sh

version: 1

store:
  kind: file                    # file | redb

topology:
  fresh_node: auto              # auto | true | false
  clustered: false

models: []

steps: []
"#;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing modelup in: {}", root.display());

    let dir = paths::modelup_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let written = io::write_if_missing(&paths::config_path(root), CONFIG_TEMPLATE.as_bytes())
        .context("failed to write config.yaml")?;
    if written {
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    println!();
    println!("Declare models and steps in {}, then run 'modelup plan'.", paths::CONFIG_FILE);
    Ok(())
}
