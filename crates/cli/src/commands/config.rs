use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use fintrack_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, env_keys, value) in effective_values(&config) {
        let source =
            field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

type ConfigEntry = (&'static str, &'static [&'static str], String);

fn effective_values(config: &AppConfig) -> Vec<ConfigEntry> {
    vec![
        entry("database.url", &["FINTRACK_DATABASE_URL"], config.database.url.clone()),
        entry(
            "database.max_connections",
            &["FINTRACK_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        entry(
            "database.timeout_secs",
            &["FINTRACK_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        entry(
            "workflow.single_step_max",
            &["FINTRACK_WORKFLOW_SINGLE_STEP_MAX"],
            config.workflow.single_step_max.to_string(),
        ),
        entry(
            "workflow.two_step_max",
            &["FINTRACK_WORKFLOW_TWO_STEP_MAX"],
            config.workflow.two_step_max.to_string(),
        ),
        entry(
            "workflow.step_deadline_hours",
            &["FINTRACK_WORKFLOW_STEP_DEADLINE_HOURS"],
            match config.workflow.step_deadline_hours {
                0 => "0 (no deadline)".to_string(),
                hours => hours.to_string(),
            },
        ),
        entry(
            "workflow.max_reason_len",
            &["FINTRACK_WORKFLOW_MAX_REASON_LEN"],
            config.workflow.max_reason_len.to_string(),
        ),
        entry(
            "workflow.default_currency",
            &["FINTRACK_WORKFLOW_DEFAULT_CURRENCY"],
            config.workflow.default_currency.clone(),
        ),
        entry(
            "logging.level",
            &["FINTRACK_LOGGING_LEVEL", "FINTRACK_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        entry(
            "logging.format",
            &["FINTRACK_LOGGING_FORMAT", "FINTRACK_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn entry(key_path: &'static str, env_keys: &'static [&'static str], value: String) -> ConfigEntry {
    (key_path, env_keys, value)
}

fn detect_config_path() -> Option<PathBuf> {
    ["fintrack.toml", "config/fintrack.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::{contains_path, field_source};
    use std::path::Path;
    use toml::Value;

    #[test]
    fn nested_keys_are_found_in_toml_documents() {
        let doc: Value = "[workflow]\ntwo_step_max = 9000\n".parse().expect("toml");
        assert!(contains_path(&doc, "workflow.two_step_max"));
        assert!(!contains_path(&doc, "workflow.single_step_max"));
        assert!(!contains_path(&doc, "database.url"));
    }

    #[test]
    fn file_source_names_the_config_path() {
        let doc: Value = "[database]\nurl = \"sqlite://file.db\"\n".parse().expect("toml");
        let source = field_source(
            "database.url",
            &["FINTRACK_TEST_UNSET_DATABASE_URL"],
            Some(&doc),
            Some(Path::new("config/fintrack.toml")),
        );
        assert_eq!(source, "file (config/fintrack.toml)");
        assert_eq!(
            field_source("workflow.max_reason_len", &[], Some(&doc), None),
            "default".to_string()
        );
    }
}
