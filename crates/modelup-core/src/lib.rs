pub mod checkpoint;
pub mod config;
pub mod error;
pub mod history;
pub mod io;
pub mod paths;
pub mod registry;
pub mod service;
pub mod setup;
pub mod step;
pub mod store;
pub mod topology;
pub mod version;

pub use error::{Result, UpgradeError};
pub use registry::{ModelSpec, UpgradeManager, UpgradeRegistry};
pub use service::{RunOutcome, RunState, UpgradeReport, UpgradeService};
pub use step::UpgradeStep;
