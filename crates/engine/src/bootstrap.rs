use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use accolade_core::config::{AppConfig, ConfigError, LoadOptions};
use accolade_db::{connect_with_settings, migrations, DbPool, SqlNominationRepository};

use crate::engine::RecognitionEngine;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<RecognitionEngine>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

/// Loads configuration, opens the pool, applies pending migrations and wires the
/// engine to the SQL record store.
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting recognition engine bootstrap");
    let config = AppConfig::load(options)?;

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let store = Arc::new(SqlNominationRepository::new(db_pool.clone()));
    let engine = Arc::new(RecognitionEngine::new(store, config.recognition.clone()));
    info!(
        event_name = "system.bootstrap.ready",
        winner_scope = config.recognition.winner_scope.as_str(),
        candidate_limit = config.recognition.candidate_limit,
        "recognition engine ready"
    );

    Ok(Application { config, db_pool, engine })
}

#[cfg(test)]
mod tests {
    use accolade_core::config::{ConfigOverrides, LoadOptions};
    use accolade_core::domain::period::WinnerScope;

    use super::bootstrap;

    #[tokio::test]
    async fn bootstrap_applies_overrides_and_migrates() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let database_url = format!("sqlite://{}", temp_dir.path().join("accolade.db").display());

        let app = bootstrap(LoadOptions {
            config_path: Some(temp_dir.path().join("missing.toml")),
            require_file: false,
            overrides: ConfigOverrides {
                database_url: Some(database_url),
                winner_scope: Some(WinnerScope::Cycle),
                ..ConfigOverrides::default()
            },
        })
        .await
        .expect("bootstrap");

        assert_eq!(app.engine.settings().winner_scope, WinnerScope::Cycle);
        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = 'nomination'",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("inspect schema");
        assert_eq!(tables, 1);
    }
}
