pub mod models;
pub mod queries;

use std::str::FromStr;

use anyhow::Context;
use sqlx::any::{AnyConnectOptions, AnyPoolOptions};
use sqlx::{AnyPool, ConnectOptions, Executor};

use crate::config::Config;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./src/db/migrations");

pub async fn connect_and_migrate(config: &Config) -> anyhow::Result<AnyPool> {
    sqlx::any::install_default_drivers();

    let db_url = normalized_db_url(&config.db_url);
    let is_sqlite = db_url.starts_with("sqlite:");

    let connect_options = AnyConnectOptions::from_str(&db_url)
        .with_context(|| format!("invalid SOLVINGHUB_DB_URL: {}", config.db_url))?
        .disable_statement_logging();

    let pool = AnyPoolOptions::new()
        .max_connections(8)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                // Cascading deletes depend on this for every pooled sqlite connection.
                if is_sqlite {
                    conn.execute("PRAGMA foreign_keys = ON;").await?;
                }
                Ok(())
            })
        })
        .connect_with(connect_options)
        .await
        .context("failed to establish sqlx AnyPool")?;

    if is_sqlite {
        pool.execute("PRAGMA journal_mode = WAL;")
            .await
            .context("failed to set sqlite WAL mode")?;
    }

    MIGRATOR
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    Ok(pool)
}

/// Appends `mode=rwc` to sqlite URLs so a missing database file is created.
fn normalized_db_url(db_url: &str) -> String {
    if !db_url.starts_with("sqlite://") || db_url.starts_with("sqlite::memory:") {
        return db_url.to_string();
    }

    let mut normalized = db_url.replace('\\', "/");
    if !normalized.contains('?') {
        normalized.push_str("?mode=rwc");
    }

    normalized
}

#[cfg(test)]
mod tests {
    use crate::db::normalized_db_url;

    #[test]
    fn normalized_db_url_preserves_non_sqlite_urls() {
        assert_eq!(
            normalized_db_url("postgres://localhost/solvinghub"),
            "postgres://localhost/solvinghub"
        );
    }

    #[test]
    fn normalized_db_url_adds_mode_when_missing() {
        assert_eq!(
            normalized_db_url("sqlite://./solvinghub.db"),
            "sqlite://./solvinghub.db?mode=rwc"
        );
        assert_eq!(
            normalized_db_url("sqlite://./solvinghub.db?mode=ro"),
            "sqlite://./solvinghub.db?mode=ro"
        );
    }

    #[test]
    fn normalized_db_url_uses_forward_slashes() {
        assert_eq!(
            normalized_db_url(r"sqlite://data\solvinghub.db"),
            "sqlite://data/solvinghub.db?mode=rwc"
        );
    }
}
