use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::templates::ResponseMode;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub tools: ToolsConfig,
    pub llm: LlmConfig,
    pub validation: ValidationConfig,
    pub ticketing: TicketingConfig,
    pub engine: EngineConfig,
    pub snapshots: SnapshotConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ToolsConfig {
    pub base_url: String,
    pub auth_token: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ValidationConfig {
    pub endpoint: String,
    pub auth_token: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TicketingConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub admin_id: Option<String>,
    pub timeout_secs: u64,
    pub dry_run: bool,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub max_hops: u32,
    pub max_validation_retries: u32,
    pub mode: ResponseMode,
    pub procedure_top_k: u32,
    pub gather_timeout_secs: u64,
    pub docs_tool: String,
    pub procedure_tool: String,
}

#[derive(Clone, Debug)]
pub struct SnapshotConfig {
    pub dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub mode: Option<ResponseMode>,
    pub max_hops: Option<u32>,
    pub max_validation_retries: Option<u32>,
    pub dry_run: Option<bool>,
    pub snapshot_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tools: ToolsConfig {
                base_url: "http://localhost:8700".to_string(),
                auth_token: None,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                base_url: "http://localhost:11434".to_string(),
                api_key: None,
                model: "llama3.1".to_string(),
                timeout_secs: 60,
                max_retries: 2,
            },
            validation: ValidationConfig {
                endpoint: "http://localhost:8700/validation/validate".to_string(),
                auth_token: None,
                timeout_secs: 120,
            },
            ticketing: TicketingConfig {
                base_url: "http://localhost:8600".to_string(),
                api_key: None,
                admin_id: None,
                timeout_secs: 30,
                dry_run: false,
            },
            engine: EngineConfig {
                max_hops: 2,
                max_validation_retries: 1,
                mode: ResponseMode::Ticket,
                procedure_top_k: 5,
                gather_timeout_secs: 60,
                docs_tool: "search_docs".to_string(),
                procedure_tool: "search_procedures".to_string(),
            },
            snapshots: SnapshotConfig { dir: PathBuf::from("runs") },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

fn parse_mode(value: &str) -> Result<ResponseMode, ConfigError> {
    value.parse::<ResponseMode>().map_err(ConfigError::Validation)
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("caseflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(tools) = patch.tools {
            if let Some(base_url) = tools.base_url {
                self.tools.base_url = base_url;
            }
            if let Some(token) = tools.auth_token {
                self.tools.auth_token = Some(token.into());
            }
            if let Some(timeout_secs) = tools.timeout_secs {
                self.tools.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(api_key.into());
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(validation) = patch.validation {
            if let Some(endpoint) = validation.endpoint {
                self.validation.endpoint = endpoint;
            }
            if let Some(token) = validation.auth_token {
                self.validation.auth_token = Some(token.into());
            }
            if let Some(timeout_secs) = validation.timeout_secs {
                self.validation.timeout_secs = timeout_secs;
            }
        }

        if let Some(ticketing) = patch.ticketing {
            if let Some(base_url) = ticketing.base_url {
                self.ticketing.base_url = base_url;
            }
            if let Some(api_key) = ticketing.api_key {
                self.ticketing.api_key = Some(api_key.into());
            }
            if let Some(admin_id) = ticketing.admin_id {
                self.ticketing.admin_id = Some(admin_id);
            }
            if let Some(timeout_secs) = ticketing.timeout_secs {
                self.ticketing.timeout_secs = timeout_secs;
            }
            if let Some(dry_run) = ticketing.dry_run {
                self.ticketing.dry_run = dry_run;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(max_hops) = engine.max_hops {
                self.engine.max_hops = max_hops;
            }
            if let Some(max_validation_retries) = engine.max_validation_retries {
                self.engine.max_validation_retries = max_validation_retries;
            }
            if let Some(mode) = engine.mode {
                self.engine.mode = parse_mode(&mode)?;
            }
            if let Some(procedure_top_k) = engine.procedure_top_k {
                self.engine.procedure_top_k = procedure_top_k;
            }
            if let Some(gather_timeout_secs) = engine.gather_timeout_secs {
                self.engine.gather_timeout_secs = gather_timeout_secs;
            }
            if let Some(docs_tool) = engine.docs_tool {
                self.engine.docs_tool = docs_tool;
            }
            if let Some(procedure_tool) = engine.procedure_tool {
                self.engine.procedure_tool = procedure_tool;
            }
        }

        if let Some(snapshots) = patch.snapshots {
            if let Some(dir) = snapshots.dir {
                self.snapshots.dir = PathBuf::from(dir);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CASEFLOW_TOOLS_BASE_URL") {
            self.tools.base_url = value;
        }
        if let Some(value) = read_env("CASEFLOW_TOOLS_AUTH_TOKEN") {
            self.tools.auth_token = Some(value.into());
        }
        if let Some(value) = read_env("CASEFLOW_TOOLS_TIMEOUT_SECS") {
            self.tools.timeout_secs = parse_u64("CASEFLOW_TOOLS_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CASEFLOW_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("CASEFLOW_LLM_API_KEY") {
            self.llm.api_key = Some(value.into());
        }
        if let Some(value) = read_env("CASEFLOW_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CASEFLOW_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CASEFLOW_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CASEFLOW_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("CASEFLOW_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("CASEFLOW_VALIDATION_ENDPOINT") {
            self.validation.endpoint = value;
        }
        if let Some(value) = read_env("CASEFLOW_VALIDATION_AUTH_TOKEN") {
            self.validation.auth_token = Some(value.into());
        }
        if let Some(value) = read_env("CASEFLOW_VALIDATION_TIMEOUT_SECS") {
            self.validation.timeout_secs = parse_u64("CASEFLOW_VALIDATION_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CASEFLOW_TICKETING_BASE_URL") {
            self.ticketing.base_url = value;
        }
        if let Some(value) = read_env("CASEFLOW_TICKETING_API_KEY") {
            self.ticketing.api_key = Some(value.into());
        }
        if let Some(value) = read_env("CASEFLOW_TICKETING_ADMIN_ID") {
            self.ticketing.admin_id = Some(value);
        }
        if let Some(value) = read_env("CASEFLOW_TICKETING_TIMEOUT_SECS") {
            self.ticketing.timeout_secs = parse_u64("CASEFLOW_TICKETING_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CASEFLOW_TICKETING_DRY_RUN") {
            self.ticketing.dry_run = parse_bool("CASEFLOW_TICKETING_DRY_RUN", &value)?;
        }

        if let Some(value) = read_env("CASEFLOW_ENGINE_MAX_HOPS") {
            self.engine.max_hops = parse_u32("CASEFLOW_ENGINE_MAX_HOPS", &value)?;
        }
        if let Some(value) = read_env("CASEFLOW_ENGINE_MAX_VALIDATION_RETRIES") {
            self.engine.max_validation_retries =
                parse_u32("CASEFLOW_ENGINE_MAX_VALIDATION_RETRIES", &value)?;
        }
        if let Some(value) = read_env("CASEFLOW_ENGINE_MODE") {
            self.engine.mode = parse_mode(&value)?;
        }
        if let Some(value) = read_env("CASEFLOW_ENGINE_PROCEDURE_TOP_K") {
            self.engine.procedure_top_k = parse_u32("CASEFLOW_ENGINE_PROCEDURE_TOP_K", &value)?;
        }
        if let Some(value) = read_env("CASEFLOW_SNAPSHOT_DIR") {
            self.snapshots.dir = PathBuf::from(value);
        }

        let log_level =
            read_env("CASEFLOW_LOGGING_LEVEL").or_else(|| read_env("CASEFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CASEFLOW_LOGGING_FORMAT").or_else(|| read_env("CASEFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(mode) = overrides.mode {
            self.engine.mode = mode;
        }
        if let Some(max_hops) = overrides.max_hops {
            self.engine.max_hops = max_hops;
        }
        if let Some(max_validation_retries) = overrides.max_validation_retries {
            self.engine.max_validation_retries = max_validation_retries;
        }
        if let Some(dry_run) = overrides.dry_run {
            self.ticketing.dry_run = dry_run;
        }
        if let Some(snapshot_dir) = overrides.snapshot_dir {
            self.snapshots.dir = snapshot_dir;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("tools.base_url", &self.tools.base_url)?;
        validate_timeout("tools.timeout_secs", self.tools.timeout_secs)?;
        validate_url("llm.base_url", &self.llm.base_url)?;
        validate_timeout("llm.timeout_secs", self.llm.timeout_secs)?;
        validate_url("validation.endpoint", &self.validation.endpoint)?;
        validate_timeout("validation.timeout_secs", self.validation.timeout_secs)?;
        validate_url("ticketing.base_url", &self.ticketing.base_url)?;
        validate_timeout("ticketing.timeout_secs", self.ticketing.timeout_secs)?;
        validate_engine(&self.engine)?;
        validate_logging(&self.logging)?;
        Ok(())
    }

    /// Secrets redacted for display (`config` CLI command output).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "tools": {
                "base_url": self.tools.base_url,
                "auth_token": redact(&self.tools.auth_token),
                "timeout_secs": self.tools.timeout_secs,
            },
            "llm": {
                "base_url": self.llm.base_url,
                "api_key": redact(&self.llm.api_key),
                "model": self.llm.model,
                "timeout_secs": self.llm.timeout_secs,
                "max_retries": self.llm.max_retries,
            },
            "validation": {
                "endpoint": self.validation.endpoint,
                "auth_token": redact(&self.validation.auth_token),
                "timeout_secs": self.validation.timeout_secs,
            },
            "ticketing": {
                "base_url": self.ticketing.base_url,
                "api_key": redact(&self.ticketing.api_key),
                "admin_id": self.ticketing.admin_id,
                "timeout_secs": self.ticketing.timeout_secs,
                "dry_run": self.ticketing.dry_run,
            },
            "engine": {
                "max_hops": self.engine.max_hops,
                "max_validation_retries": self.engine.max_validation_retries,
                "mode": self.engine.mode.as_str(),
                "procedure_top_k": self.engine.procedure_top_k,
                "gather_timeout_secs": self.engine.gather_timeout_secs,
                "docs_tool": self.engine.docs_tool,
                "procedure_tool": self.engine.procedure_tool,
            },
            "snapshots": { "dir": self.snapshots.dir.display().to_string() },
            "logging": { "level": self.logging.level, "format": self.logging.format },
        })
    }
}

fn redact(secret: &Option<SecretString>) -> &'static str {
    match secret {
        Some(value) if !value.expose_secret().is_empty() => "<set>",
        _ => "<unset>",
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("caseflow.toml"), PathBuf::from("config/caseflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_url(key: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Validation(format!("{key} must be set")));
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{key} must start with http:// or https:// (got `{trimmed}`)"
        )));
    }
    Ok(())
}

fn validate_timeout(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 || value > 300 {
        return Err(ConfigError::Validation(format!("{key} must be in range 1..=300")));
    }
    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.max_hops == 0 || engine.max_hops > 10 {
        return Err(ConfigError::Validation("engine.max_hops must be in range 1..=10".to_string()));
    }
    if engine.max_validation_retries > 5 {
        return Err(ConfigError::Validation(
            "engine.max_validation_retries must be at most 5".to_string(),
        ));
    }
    if engine.procedure_top_k == 0 || engine.procedure_top_k > 20 {
        return Err(ConfigError::Validation(
            "engine.procedure_top_k must be in range 1..=20".to_string(),
        ));
    }
    validate_timeout("engine.gather_timeout_secs", engine.gather_timeout_secs)?;
    if engine.docs_tool.trim().is_empty() || engine.procedure_tool.trim().is_empty() {
        return Err(ConfigError::Validation(
            "engine.docs_tool and engine.procedure_tool must be set".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    tools: Option<ToolsPatch>,
    llm: Option<LlmPatch>,
    validation: Option<ValidationPatch>,
    ticketing: Option<TicketingPatch>,
    engine: Option<EnginePatch>,
    snapshots: Option<SnapshotsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolsPatch {
    base_url: Option<String>,
    auth_token: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ValidationPatch {
    endpoint: Option<String>,
    auth_token: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TicketingPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    admin_id: Option<String>,
    timeout_secs: Option<u64>,
    dry_run: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    max_hops: Option<u32>,
    max_validation_retries: Option<u32>,
    mode: Option<String>,
    procedure_top_k: Option<u32>,
    gather_timeout_secs: Option<u64>,
    docs_tool: Option<String>,
    procedure_tool: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotsPatch {
    dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::templates::ResponseMode;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_and_match_spec() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.engine.max_hops == 2, "default max_hops should be 2")?;
        ensure(
            config.engine.max_validation_retries == 1,
            "default max_validation_retries should be 1",
        )?;
        ensure(config.engine.mode == ResponseMode::Ticket, "default mode should be ticket")?;
        Ok(())
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_TICKETING_API_KEY", "tok-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("caseflow.toml");
            fs::write(
                &path,
                r#"
[ticketing]
api_key = "${TEST_TICKETING_API_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            use secrecy::ExposeSecret;
            let key = config
                .ticketing
                .api_key
                .as_ref()
                .map(|secret| secret.expose_secret().to_string())
                .unwrap_or_default();
            ensure(key == "tok-from-env", "api key should be interpolated from environment")
        })();

        clear_vars(&["TEST_TICKETING_API_KEY"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CASEFLOW_ENGINE_MAX_HOPS", "3");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("caseflow.toml");
            fs::write(
                &path,
                r#"
[engine]
max_hops = 4
mode = "slack"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.engine.max_hops == 3, "env max_hops should win over file")?;
            ensure(config.engine.mode == ResponseMode::Slack, "file mode should apply")?;
            ensure(config.logging.level == "debug", "override log level should win")?;
            Ok(())
        })();

        clear_vars(&["CASEFLOW_ENGINE_MAX_HOPS"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CASEFLOW_LOG_LEVEL", "warn");
        env::set_var("CASEFLOW_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warn log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["CASEFLOW_LOG_LEVEL", "CASEFLOW_LOG_FORMAT"]);
        result
    }

    #[test]
    fn unknown_mode_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CASEFLOW_ENGINE_MODE", "carrier-pigeon");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("response mode")
            );
            ensure(has_message, "failure should mention the unsupported response mode")
        })();

        clear_vars(&["CASEFLOW_ENGINE_MODE"]);
        result
    }

    #[test]
    fn secrets_are_redacted_in_summary() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CASEFLOW_TICKETING_API_KEY", "super-secret-token");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let summary = config.redacted_summary().to_string();

            ensure(!summary.contains("super-secret-token"), "summary should not leak the token")?;
            ensure(summary.contains("<set>"), "summary should mark the token as set")?;
            Ok(())
        })();

        clear_vars(&["CASEFLOW_TICKETING_API_KEY"]);
        result
    }

    #[test]
    fn out_of_range_hop_budget_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CASEFLOW_ENGINE_MAX_HOPS", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected validation failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::Validation(ref message) if message.contains("max_hops")),
                "failure should mention max_hops",
            )
        })();

        clear_vars(&["CASEFLOW_ENGINE_MAX_HOPS"]);
        result
    }
}
