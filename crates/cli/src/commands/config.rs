use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use toml::Value;

use accolade_core::config::{AppConfig, LoadOptions};

use crate::commands::{load_config, CommandResult};

/// One effective setting together with the layer it came from.
#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match load_config(options) {
        Ok(config) => config,
        Err(failure) => return CommandResult::from_failure("config", failure),
    };

    let entries = effective_entries(&config, options);
    CommandResult::success_with_data(
        "config",
        "effective config (source precedence: override > env > file > default)",
        &entries,
    )
}

fn effective_entries(config: &AppConfig, options: &LoadOptions) -> Vec<ConfigEntry> {
    let file_path = detect_config_path(options.config_path.as_deref());
    let file_doc = load_config_file_doc(file_path.as_deref());
    let overrides = &options.overrides;
    let source = |key: &str, env_key: &str, overridden: bool| {
        if overridden {
            return "override (command line)".to_string();
        }
        field_source(key, env_key, file_doc.as_ref(), file_path.as_deref())
    };
    let recognition = &config.recognition;

    let mut entries = Vec::new();
    let mut push = |key: &'static str, value: String, source: String| {
        entries.push(ConfigEntry { key, value, source });
    };

    push(
        "database.url",
        config.database.url.clone(),
        source("database.url", "ACCOLADE_DATABASE_URL", overrides.database_url.is_some()),
    );
    push(
        "database.max_connections",
        config.database.max_connections.to_string(),
        source("database.max_connections", "ACCOLADE_DATABASE_MAX_CONNECTIONS", false),
    );
    push(
        "database.timeout_secs",
        config.database.timeout_secs.to_string(),
        source("database.timeout_secs", "ACCOLADE_DATABASE_TIMEOUT_SECS", false),
    );
    push(
        "recognition.winner_scope",
        recognition.winner_scope.as_str().to_string(),
        source(
            "recognition.winner_scope",
            "ACCOLADE_RECOGNITION_WINNER_SCOPE",
            overrides.winner_scope.is_some(),
        ),
    );
    push(
        "recognition.candidate_limit",
        recognition.candidate_limit.to_string(),
        source(
            "recognition.candidate_limit",
            "ACCOLADE_RECOGNITION_CANDIDATE_LIMIT",
            overrides.candidate_limit.is_some(),
        ),
    );
    push(
        "recognition.winner_window_days",
        recognition.winner_window_days.to_string(),
        source("recognition.winner_window_days", "ACCOLADE_RECOGNITION_WINNER_WINDOW_DAYS", false),
    );
    push(
        "recognition.history_months",
        recognition.history_months.to_string(),
        source("recognition.history_months", "ACCOLADE_RECOGNITION_HISTORY_MONTHS", false),
    );
    push(
        "recognition.max_conflict_retries",
        recognition.max_conflict_retries.to_string(),
        source(
            "recognition.max_conflict_retries",
            "ACCOLADE_RECOGNITION_MAX_CONFLICT_RETRIES",
            false,
        ),
    );
    push(
        "recognition.retry_base_delay_ms",
        recognition.retry_base_delay_ms.to_string(),
        source("recognition.retry_base_delay_ms", "ACCOLADE_RECOGNITION_RETRY_BASE_DELAY_MS", false),
    );
    push(
        "recognition.retry_max_delay_ms",
        recognition.retry_max_delay_ms.to_string(),
        source("recognition.retry_max_delay_ms", "ACCOLADE_RECOGNITION_RETRY_MAX_DELAY_MS", false),
    );
    push(
        "logging.level",
        config.logging.level.clone(),
        source("logging.level", "ACCOLADE_LOGGING_LEVEL", overrides.log_level.is_some()),
    );
    push(
        "logging.format",
        format!("{:?}", config.logging.format).to_ascii_lowercase(),
        source("logging.format", "ACCOLADE_LOGGING_FORMAT", overrides.log_format.is_some()),
    );

    entries
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("accolade.toml"), PathBuf::from("config/accolade.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    file_doc: Option<&Value>,
    file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = file_doc {
        if contains_path(doc, key_path) {
            let file_path = file_path
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
