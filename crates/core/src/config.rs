use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::approvals::factory::{DEFAULT_CURRENCY, DEFAULT_MAX_REASON_LEN};
use crate::approvals::workflow::{
    DEFAULT_SINGLE_STEP_MAX, DEFAULT_STEP_DEADLINE_HOURS, DEFAULT_TWO_STEP_MAX,
    MAX_STEP_DEADLINE_HOURS,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Knobs for step generation and request validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkflowConfig {
    /// Highest multi-level expense amount that still needs only a supervisor.
    pub single_step_max: u64,
    /// Highest multi-level expense amount that stops at the manager.
    pub two_step_max: u64,
    /// Relative deadline stamped on every step; 0 disables deadlines.
    pub step_deadline_hours: u32,
    pub max_reason_len: usize,
    pub default_currency: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
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
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub single_step_max: Option<u64>,
    pub two_step_max: Option<u64>,
    pub step_deadline_hours: Option<u32>,
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

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://fintrack.db".to_string(), max_connections: 5, timeout_secs: 30 }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            single_step_max: DEFAULT_SINGLE_STEP_MAX,
            two_step_max: DEFAULT_TWO_STEP_MAX,
            step_deadline_hours: DEFAULT_STEP_DEADLINE_HOURS,
            max_reason_len: DEFAULT_MAX_REASON_LEN,
            default_currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Compact }
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("fintrack.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(single_step_max) = workflow.single_step_max {
                self.workflow.single_step_max = single_step_max;
            }
            if let Some(two_step_max) = workflow.two_step_max {
                self.workflow.two_step_max = two_step_max;
            }
            if let Some(step_deadline_hours) = workflow.step_deadline_hours {
                self.workflow.step_deadline_hours = step_deadline_hours;
            }
            if let Some(max_reason_len) = workflow.max_reason_len {
                self.workflow.max_reason_len = max_reason_len;
            }
            if let Some(default_currency) = workflow.default_currency {
                self.workflow.default_currency = default_currency;
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
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("FINTRACK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FINTRACK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("FINTRACK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FINTRACK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("FINTRACK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FINTRACK_WORKFLOW_SINGLE_STEP_MAX") {
            self.workflow.single_step_max =
                parse_env("FINTRACK_WORKFLOW_SINGLE_STEP_MAX", &value)?;
        }
        if let Some(value) = read_env("FINTRACK_WORKFLOW_TWO_STEP_MAX") {
            self.workflow.two_step_max = parse_env("FINTRACK_WORKFLOW_TWO_STEP_MAX", &value)?;
        }
        if let Some(value) = read_env("FINTRACK_WORKFLOW_STEP_DEADLINE_HOURS") {
            self.workflow.step_deadline_hours =
                parse_env("FINTRACK_WORKFLOW_STEP_DEADLINE_HOURS", &value)?;
        }
        if let Some(value) = read_env("FINTRACK_WORKFLOW_MAX_REASON_LEN") {
            self.workflow.max_reason_len = parse_env("FINTRACK_WORKFLOW_MAX_REASON_LEN", &value)?;
        }
        if let Some(value) = read_env("FINTRACK_WORKFLOW_DEFAULT_CURRENCY") {
            self.workflow.default_currency = value;
        }

        let log_level =
            read_env("FINTRACK_LOGGING_LEVEL").or_else(|| read_env("FINTRACK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FINTRACK_LOGGING_FORMAT").or_else(|| read_env("FINTRACK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(single_step_max) = overrides.single_step_max {
            self.workflow.single_step_max = single_step_max;
        }
        if let Some(two_step_max) = overrides.two_step_max {
            self.workflow.two_step_max = two_step_max;
        }
        if let Some(step_deadline_hours) = overrides.step_deadline_hours {
            self.workflow.step_deadline_hours = step_deadline_hours;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_workflow(&self.workflow)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("fintrack.toml"), PathBuf::from("config/fintrack.toml")]
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

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.two_step_max < workflow.single_step_max {
        return Err(ConfigError::Validation(format!(
            "workflow.two_step_max ({}) must not be below workflow.single_step_max ({})",
            workflow.two_step_max, workflow.single_step_max
        )));
    }

    if workflow.step_deadline_hours > MAX_STEP_DEADLINE_HOURS {
        return Err(ConfigError::Validation(format!(
            "workflow.step_deadline_hours ({}) must be in range 0..={MAX_STEP_DEADLINE_HOURS}",
            workflow.step_deadline_hours
        )));
    }

    if workflow.max_reason_len == 0 {
        return Err(ConfigError::Validation(
            "workflow.max_reason_len must be greater than zero".to_string(),
        ));
    }

    let currency = workflow.default_currency.trim();
    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(ConfigError::Validation(
            "workflow.default_currency must be a three-letter ISO 4217 code".to_string(),
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

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    workflow: Option<WorkflowPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    single_step_max: Option<u64>,
    two_step_max: Option<u64>,
    step_deadline_hours: Option<u32>,
    max_reason_len: Option<usize>,
    default_currency: Option<String>,
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
    fn defaults_match_documented_workflow_policy() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.workflow.single_step_max == 1_000, "single step max defaults to 1000")?;
        ensure(config.workflow.two_step_max == 5_000, "two step max defaults to 5000")?;
        ensure(config.workflow.step_deadline_hours == 72, "deadline defaults to 72 hours")?;
        ensure(config.workflow.max_reason_len == 1_000, "reason limit defaults to 1000")?;
        ensure(config.workflow.default_currency == "USD", "currency defaults to USD")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_FINTRACK_DB_PATH", "sqlite://interpolated.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("fintrack.toml");
            fs::write(
                &path,
                r#"
[database]
url = "${TEST_FINTRACK_DB_PATH}"

[workflow]
single_step_max = 250
two_step_max = 750
default_currency = "EUR"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://interpolated.db",
                "database url should be interpolated from environment",
            )?;
            ensure(config.workflow.single_step_max == 250, "file threshold should apply")?;
            ensure(config.workflow.two_step_max == 750, "file threshold should apply")?;
            ensure(config.workflow.default_currency == "EUR", "file currency should apply")?;
            Ok(())
        })();

        clear_vars(&["TEST_FINTRACK_DB_PATH"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["TEST_FINTRACK_UNSET"]);

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("fintrack.toml");
        fs::write(&path, "[database]\nurl = \"${TEST_FINTRACK_UNSET}\"\n")
            .map_err(|err| err.to_string())?;

        let error =
            match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            {
                Ok(_) => return Err("expected interpolation failure".to_string()),
                Err(error) => error,
            };
        ensure(
            matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "TEST_FINTRACK_UNSET"),
            "error should name the missing variable",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FINTRACK_LOG_LEVEL", "warn");
        env::set_var("FINTRACK_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["FINTRACK_LOG_LEVEL", "FINTRACK_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FINTRACK_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("FINTRACK_WORKFLOW_TWO_STEP_MAX", "9000");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("fintrack.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[workflow]
single_step_max = 2000
two_step_max = 6000

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.workflow.single_step_max == 2_000, "file value should beat defaults")?;
            ensure(config.workflow.two_step_max == 9_000, "env value should beat the file")?;
            Ok(())
        })();

        clear_vars(&["FINTRACK_DATABASE_URL", "FINTRACK_WORKFLOW_TWO_STEP_MAX"]);
        result
    }

    #[test]
    fn malformed_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FINTRACK_WORKFLOW_SINGLE_STEP_MAX", "a lot");

        let result = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => Err("expected invalid env override".to_string()),
            Err(error) => ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "FINTRACK_WORKFLOW_SINGLE_STEP_MAX"),
                "error should name the offending variable",
            ),
        };

        clear_vars(&["FINTRACK_WORKFLOW_SINGLE_STEP_MAX"]);
        result
    }

    #[test]
    fn validation_fails_fast_on_inverted_thresholds() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                single_step_max: Some(8_000),
                two_step_max: Some(4_000),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("workflow.two_step_max")
        );
        ensure(has_message, "validation failure should mention workflow.two_step_max")
    }

    #[test]
    fn step_deadline_beyond_one_year_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let load = |hours: u32| {
            AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    step_deadline_hours: Some(hours),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
        };

        ensure(load(8_760).is_ok(), "a one-year deadline is accepted")?;
        ensure(
            matches!(
                load(u32::MAX),
                Err(ConfigError::Validation(ref message)) if message.contains("workflow.step_deadline_hours")
            ),
            "validation failure should mention workflow.step_deadline_hours",
        )
    }

    #[test]
    fn non_sqlite_database_url_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/fintrack".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });
        ensure(
            matches!(result, Err(ConfigError::Validation(ref message)) if message.contains("database.url")),
            "validation failure should mention database.url",
        )
    }

    #[test]
    fn required_file_must_exist() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let result = AppConfig::load(LoadOptions {
            config_path: Some(dir.path().join("absent.toml")),
            require_file: true,
            ..LoadOptions::default()
        });
        ensure(
            matches!(result, Err(ConfigError::MissingConfigFile(_))),
            "missing required file should be reported",
        )
    }
}
