use caseflow_core::config::{AppConfig, LoadOptions};
use caseflow_core::snapshot::{SnapshotError, SnapshotStore};

use super::CommandResult;

pub fn run(run_id: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("inspect", "config_validation", error.to_string(), 2)
        }
    };

    let store = SnapshotStore::new(config.snapshots.dir);
    match store.load(run_id) {
        Ok(snapshot) => match serde_json::to_string_pretty(&snapshot) {
            Ok(output) => CommandResult { exit_code: 0, output },
            Err(error) => {
                CommandResult::failure("inspect", "serialization", error.to_string(), 1)
            }
        },
        Err(error @ SnapshotError::NotFound { .. }) => {
            CommandResult::failure("inspect", "not_found", error.to_string(), 1)
        }
        Err(error) => CommandResult::failure("inspect", "snapshot_store", error.to_string(), 1),
    }
}
