use caseflow_core::config::{AppConfig, LoadOptions};

pub fn run() -> String {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => serde_json::to_string_pretty(&config.redacted_summary())
            .unwrap_or_else(|error| format!("{{\"error\": \"{error}\"}}")),
        Err(error) => format!("configuration error: {error}"),
    }
}
