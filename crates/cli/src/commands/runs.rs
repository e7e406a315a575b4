use caseflow_core::config::{AppConfig, LoadOptions};
use caseflow_core::snapshot::SnapshotStore;
use serde_json::json;

use super::CommandResult;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("runs", "config_validation", error.to_string(), 2)
        }
    };

    let store = SnapshotStore::new(config.snapshots.dir);
    match store.list() {
        Ok(summaries) => {
            let payload = json!({
                "command": "runs",
                "status": "ok",
                "count": summaries.len(),
                "runs": summaries,
            });
            CommandResult { exit_code: 0, output: payload.to_string() }
        }
        Err(error) => CommandResult::failure("runs", "snapshot_store", error.to_string(), 1),
    }
}
