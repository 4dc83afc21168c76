//! Database migration command.
//!
//! Applies the migrations in `crates/api/migrations/` to the database named
//! by `BAZAAR_DATABASE_URL` (or `DATABASE_URL`). The API server never
//! migrates on start-up.

use bookbazaar_api::db;

/// Errors running migrations.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Run all pending migrations.
///
/// # Errors
///
/// Returns an error if the database URL is missing, the database cannot be
/// reached, or a migration fails.
pub async fn run() -> Result<(), MigrationError> {
    let database_url = super::database_url()
        .map_err(|_| MigrationError::MissingEnvVar("BAZAAR_DATABASE_URL"))?;

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&database_url).await?;

    let migrator = sqlx::migrate!("../api/migrations");
    tracing::info!(available = migrator.iter().count(), "Running migrations...");
    migrator.run(&pool).await?;

    tracing::info!("Migrations complete!");
    Ok(())
}
