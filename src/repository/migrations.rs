//! Embedded-at-compile-time migrations.
//!
//! SQLite uses `diesel_migrations`'s harness directly (a real sync
//! `SqliteConnection` is cheap to open). PostgreSQL has no `diesel::postgres`
//! backend available here (it requires libpq; `diesel-async`'s `postgres`
//! feature only gives the async, libpq-free `AsyncPgConnection`), so its
//! migrations are plain embedded SQL files executed directly over
//! `tokio-postgres`.

use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use super::pool::DbError;
use super::util::to_diesel_error;

pub const SQLITE_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/sqlite");

/// Run pending migrations for a database URL, dispatching on its scheme.
pub async fn run_migrations(database_url: &str) -> Result<(), DbError> {
    if super::util::is_postgres_url(database_url) {
        #[cfg(feature = "postgres")]
        {
            run_postgres_migrations(database_url).await
        }
        #[cfg(not(feature = "postgres"))]
        {
            Err(diesel::result::Error::QueryBuilderError(
                "PostgreSQL support not compiled; rebuild with --features postgres".into(),
            ))
        }
    } else {
        run_sqlite_migrations(database_url).await
    }
}

async fn run_sqlite_migrations(database_url: &str) -> Result<(), DbError> {
    let url = database_url
        .strip_prefix("sqlite:")
        .unwrap_or(database_url)
        .to_string();

    tokio::task::spawn_blocking(move || {
        let mut conn = diesel::SqliteConnection::establish(&url).map_err(to_diesel_error)?;
        let applied = conn
            .run_pending_migrations(SQLITE_MIGRATIONS)
            .map_err(|e| to_diesel_error(e.to_string()))?;

        for migration in &applied {
            info!(%migration, "applied migration");
        }
        if applied.is_empty() {
            info!("no pending migrations");
        }
        Ok(())
    })
    .await
    .map_err(|e| to_diesel_error(e.to_string()))?
}

#[cfg(feature = "postgres")]
static POSTGRES_MIGRATION_FILES: &[(&str, &str)] = &[(
    "2026-01-01-000000",
    include_str!("../../migrations/postgres/2026-01-01-000000_initial_schema/up.sql"),
)];

#[cfg(feature = "postgres")]
async fn run_postgres_migrations(database_url: &str) -> Result<(), DbError> {
    use tokio_postgres::NoTls;

    let (client, connection) = tokio_postgres::connect(database_url, NoTls)
        .await
        .map_err(to_diesel_error)?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(error = %e, "postgres connection error");
        }
    });

    client
        .execute(
            "CREATE TABLE IF NOT EXISTS __pricetrack_schema_migrations (
                version TEXT PRIMARY KEY NOT NULL,
                run_on TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            &[],
        )
        .await
        .map_err(to_diesel_error)?;

    let rows = client
        .query("SELECT version FROM __pricetrack_schema_migrations", &[])
        .await
        .map_err(to_diesel_error)?;
    let applied: std::collections::HashSet<String> =
        rows.iter().map(|row| row.get::<_, String>(0)).collect();

    let mut ran = 0;
    for (version, sql) in POSTGRES_MIGRATION_FILES {
        if applied.contains(*version) {
            continue;
        }
        info!(%version, "applying migration");
        for stmt in sql.split(';') {
            let stmt = stmt.trim();
            if stmt.is_empty() || stmt.lines().all(|l| l.trim().is_empty() || l.trim_start().starts_with("--")) {
                continue;
            }
            client.execute(stmt, &[]).await.map_err(to_diesel_error)?;
        }
        client
            .execute(
                "INSERT INTO __pricetrack_schema_migrations (version) VALUES ($1)",
                &[version],
            )
            .await
            .map_err(to_diesel_error)?;
        ran += 1;
    }

    if ran == 0 {
        info!("no pending migrations");
    } else {
        info!(count = ran, "applied migrations");
    }
    Ok(())
}
