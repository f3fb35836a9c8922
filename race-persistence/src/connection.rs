use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

pub async fn connect_to_database() -> Result<DatabaseConnection, DbErr> {
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://race.db?mode=rwc".to_string());

    Database::connect(&database_url).await
}

/// Connect and bring the schema up to date. Used by the server at startup.
pub async fn connect_and_migrate() -> Result<DatabaseConnection, DbErr> {
    let db = connect_to_database().await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// In-memory database for tests. SQLite `:memory:` is per-connection, so the
/// pool is capped at one connection to keep every caller on the same
/// database.
pub async fn connect_to_memory_database() -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new("sqlite::memory:".to_owned());
    options.max_connections(1);
    Database::connect(options).await
}
