//! PostgreSQL persistence for channels and subscribers.

pub mod models;
pub mod queries;
pub mod store;

use sqlx::postgres::{PgPool, PgPoolOptions};

pub use store::PgStore;

pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
}

/// Apply the schema migrations bundled with this crate.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
