use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::period::WinnerScope;

/// Hard ceiling on the candidate window. `candidate_limit` may only narrow it.
pub const MAX_CANDIDATES: u32 = 5;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub recognition: RecognitionConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecognitionConfig {
    pub winner_scope: WinnerScope,
    pub candidate_limit: u32,
    pub winner_window_days: u32,
    pub history_months: u32,
    pub max_conflict_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            winner_scope: WinnerScope::Global,
            candidate_limit: MAX_CANDIDATES,
            winner_window_days: 31,
            history_months: 12,
            max_conflict_retries: 3,
            retry_base_delay_ms: 25,
            retry_max_delay_ms: 500,
        }
    }
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
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub winner_scope: Option<WinnerScope>,
    pub candidate_limit: Option<u32>,
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
            database: DatabaseConfig {
                url: "sqlite://accolade.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            recognition: RecognitionConfig::default(),
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

impl std::str::FromStr for WinnerScope {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| {
            ConfigError::Validation(format!(
                "unsupported winner scope `{}` (expected global|cycle)",
                value.trim()
            ))
        })
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("accolade.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        let ConfigPatch { database, recognition, logging } = patch;
        let database = database.unwrap_or_default();
        set_if(&mut self.database.url, database.url);
        set_if(&mut self.database.max_connections, database.max_connections);
        set_if(&mut self.database.timeout_secs, database.timeout_secs);

        let recognition = recognition.unwrap_or_default();
        let settings = &mut self.recognition;
        set_if(&mut settings.winner_scope, recognition.winner_scope);
        set_if(&mut settings.candidate_limit, recognition.candidate_limit);
        set_if(&mut settings.winner_window_days, recognition.winner_window_days);
        set_if(&mut settings.history_months, recognition.history_months);
        set_if(&mut settings.max_conflict_retries, recognition.max_conflict_retries);
        set_if(&mut settings.retry_base_delay_ms, recognition.retry_base_delay_ms);
        set_if(&mut settings.retry_max_delay_ms, recognition.retry_max_delay_ms);

        let logging = logging.unwrap_or_default();
        set_if(&mut self.logging.level, logging.level);
        set_if(&mut self.logging.format, logging.format);
    }

    /// Numeric variables that fail to parse name their key; scope and format
    /// report the rejected value.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        set_if(&mut self.database.url, read_env("ACCOLADE_DATABASE_URL"));
        env_number(&mut self.database.max_connections, "ACCOLADE_DATABASE_MAX_CONNECTIONS")?;
        env_number(&mut self.database.timeout_secs, "ACCOLADE_DATABASE_TIMEOUT_SECS")?;

        let settings = &mut self.recognition;
        if let Some(scope) = read_env("ACCOLADE_RECOGNITION_WINNER_SCOPE") {
            settings.winner_scope = scope.parse()?;
        }
        for (slot, key) in [
            (&mut settings.candidate_limit, "ACCOLADE_RECOGNITION_CANDIDATE_LIMIT"),
            (&mut settings.winner_window_days, "ACCOLADE_RECOGNITION_WINNER_WINDOW_DAYS"),
            (&mut settings.history_months, "ACCOLADE_RECOGNITION_HISTORY_MONTHS"),
            (&mut settings.max_conflict_retries, "ACCOLADE_RECOGNITION_MAX_CONFLICT_RETRIES"),
        ] {
            env_number(slot, key)?;
        }
        env_number(&mut settings.retry_base_delay_ms, "ACCOLADE_RECOGNITION_RETRY_BASE_DELAY_MS")?;
        env_number(&mut settings.retry_max_delay_ms, "ACCOLADE_RECOGNITION_RETRY_MAX_DELAY_MS")?;

        // The short LOG_* names are accepted as aliases.
        let level = read_env("ACCOLADE_LOGGING_LEVEL").or_else(|| read_env("ACCOLADE_LOG_LEVEL"));
        set_if(&mut self.logging.level, level);
        if let Some(format) =
            read_env("ACCOLADE_LOGGING_FORMAT").or_else(|| read_env("ACCOLADE_LOG_FORMAT"))
        {
            self.logging.format = format.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        set_if(&mut self.database.url, overrides.database_url);
        set_if(&mut self.logging.level, overrides.log_level);
        set_if(&mut self.logging.format, overrides.log_format);
        set_if(&mut self.recognition.winner_scope, overrides.winner_scope);
        set_if(&mut self.recognition.candidate_limit, overrides.candidate_limit);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_recognition(&self.recognition)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("accolade.toml"), PathBuf::from("config/accolade.toml")]
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

/// Replaces every `${NAME}` with the value of that environment variable.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("${") {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let close = after_open.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let name = &after_open[..close];
        let value = env::var(name)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: name.to_string() })?;
        output.push_str(&value);
        rest = &after_open[close + 1..];
    }

    output.push_str(rest);
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

fn validate_recognition(recognition: &RecognitionConfig) -> Result<(), ConfigError> {
    if !(1..=MAX_CANDIDATES).contains(&recognition.candidate_limit) {
        return Err(ConfigError::Validation(format!(
            "recognition.candidate_limit must be in range 1..={MAX_CANDIDATES}"
        )));
    }

    if recognition.winner_window_days == 0 || recognition.winner_window_days > 366 {
        return Err(ConfigError::Validation(
            "recognition.winner_window_days must be in range 1..=366".to_string(),
        ));
    }

    if recognition.history_months == 0 || recognition.history_months > 120 {
        return Err(ConfigError::Validation(
            "recognition.history_months must be in range 1..=120".to_string(),
        ));
    }

    if recognition.max_conflict_retries > 10 {
        return Err(ConfigError::Validation(
            "recognition.max_conflict_retries must be at most 10".to_string(),
        ));
    }

    if recognition.retry_max_delay_ms < recognition.retry_base_delay_ms {
        return Err(ConfigError::Validation(
            "recognition.retry_max_delay_ms must not be below recognition.retry_base_delay_ms"
                .to_string(),
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

fn set_if<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn env_number<T: FromStr>(slot: &mut T, key: &str) -> Result<(), ConfigError> {
    let Some(raw) = read_env(key) else {
        return Ok(());
    };
    match raw.trim().parse() {
        Ok(value) => {
            *slot = value;
            Ok(())
        }
        Err(_) => Err(ConfigError::InvalidEnvOverride { key: key.to_string(), value: raw }),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    recognition: Option<RecognitionPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RecognitionPatch {
    winner_scope: Option<WinnerScope>,
    candidate_limit: Option<u32>,
    winner_window_days: Option<u32>,
    history_months: Option<u32>,
    max_conflict_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
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

    use super::{
        interpolate_env_vars, AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat,
        MAX_CANDIDATES,
    };
    use crate::domain::period::WinnerScope;

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
    fn defaults_match_recognition_cycle_conventions() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.recognition.winner_scope == WinnerScope::Global, "default scope is global")?;
        ensure(config.recognition.candidate_limit == MAX_CANDIDATES, "default cap is the ceiling")?;
        ensure(config.recognition.winner_window_days == 31, "default winner window is 31 days")?;
        ensure(config.recognition.history_months == 12, "default history is twelve months")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_ACCOLADE_DB_PATH", "sqlite://interpolated.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("accolade.toml");
            fs::write(
                &path,
                r#"
[database]
url = "${TEST_ACCOLADE_DB_PATH}"

[recognition]
winner_scope = "cycle"
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
            ensure(
                config.recognition.winner_scope == WinnerScope::Cycle,
                "winner scope should be read from file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_ACCOLADE_DB_PATH"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ACCOLADE_LOG_LEVEL", "warn");
        env::set_var("ACCOLADE_LOG_FORMAT", "pretty");

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

        clear_vars(&["ACCOLADE_LOG_LEVEL", "ACCOLADE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ACCOLADE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("ACCOLADE_RECOGNITION_CANDIDATE_LIMIT", "4");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("accolade.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[recognition]
candidate_limit = 3
history_months = 6

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
            ensure(config.recognition.candidate_limit == 4, "env candidate limit beats file")?;
            ensure(config.recognition.history_months == 6, "file history beats default")?;
            Ok(())
        })();

        clear_vars(&["ACCOLADE_DATABASE_URL", "ACCOLADE_RECOGNITION_CANDIDATE_LIMIT"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides { candidate_limit: Some(0), ..ConfigOverrides::default() },
            ..LoadOptions::default()
        }) {
            Ok(_) => {
                return Err("expected validation failure but config load succeeded".to_string())
            }
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("recognition.candidate_limit")
        );
        ensure(has_message, "validation failure should mention recognition.candidate_limit")
    }

    #[test]
    fn candidate_limit_above_five_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        for limit in [6, 50] {
            let result = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    candidate_limit: Some(limit),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            });
            let rejected = matches!(
                result,
                Err(ConfigError::Validation(ref message)) if message.contains("1..=5")
            );
            ensure(rejected, "candidate limit above five must fail validation")?;
        }
        Ok(())
    }

    #[test]
    fn interpolation_reports_missing_and_unterminated_names() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_ACCOLADE_SCOPE", "cycle");
        let expanded =
            interpolate_env_vars("a = \"${TEST_ACCOLADE_SCOPE}\" # ${TEST_ACCOLADE_SCOPE}");
        clear_vars(&["TEST_ACCOLADE_SCOPE"]);
        ensure(
            expanded.map_err(|err| err.to_string())? == "a = \"cycle\" # cycle",
            "every placeholder should expand",
        )?;

        let missing = interpolate_env_vars("${TEST_ACCOLADE_UNSET_VALUE}");
        ensure(
            matches!(
                missing,
                Err(ConfigError::MissingEnvInterpolation { ref var })
                    if var == "TEST_ACCOLADE_UNSET_VALUE"
            ),
            "missing variable should be named",
        )?;
        let unclosed = interpolate_env_vars("url = \"${OPEN");
        ensure(
            matches!(unclosed, Err(ConfigError::UnterminatedInterpolation)),
            "unclosed placeholder should fail",
        )
    }

    #[test]
    fn unknown_winner_scope_in_env_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ACCOLADE_RECOGNITION_WINNER_SCOPE", "quarterly");

        let result = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => Err("expected winner scope parse failure".to_string()),
            Err(ConfigError::Validation(message)) => {
                ensure(message.contains("quarterly"), "error should echo the bad scope")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
        };

        clear_vars(&["ACCOLADE_RECOGNITION_WINNER_SCOPE"]);
        result
    }

    #[test]
    fn non_numeric_env_override_is_reported_with_its_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ACCOLADE_RECOGNITION_HISTORY_MONTHS", "a year");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "ACCOLADE_RECOGNITION_HISTORY_MONTHS",
                "error should name the offending variable",
            ),
            Ok(_) => Err("expected invalid override failure".to_string()),
            Err(other) => Err(format!("unexpected error: {other}")),
        };

        clear_vars(&["ACCOLADE_RECOGNITION_HISTORY_MONTHS"]);
        result
    }
}
