//! Database bootstrap: pool creation and schema migrations

use std::str::FromStr;

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::Result;

/// Embedded schema migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open a pool for `config`, applying migrations when configured to.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    if config.run_migrations {
        MIGRATOR.run(&pool).await?;
        info!("Database schema up to date at {}", config.url);
    }
    Ok(pool)
}

/// Apply migrations on a connection the caller already holds.
pub async fn migrate(conn: &mut SqliteConnection) -> Result<()> {
    MIGRATOR.run(conn).await?;
    Ok(())
}
