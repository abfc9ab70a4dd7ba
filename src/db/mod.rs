pub mod copy;
pub mod models;

use anyhow::Result;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Connection options scoped to `layer`, with `public` as fallback.
pub fn connect_options(pg: &PostgresConfig, layer: &str) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&pg.host)
        .port(pg.port)
        .username(&pg.user)
        .password(&pg.password)
        .database(&pg.dbname)
        .options([("search_path", format!("{layer},public"))])
}

pub async fn create_pool(pg: &PostgresConfig, layer: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect_with(connect_options(pg, layer))
        .await?;
    Ok(pool)
}

/// Creates the layer schema if needed, then applies the embedded migrations
/// inside it. `layer` is validated as a plain identifier on config load.
pub async fn run_migrations(pool: &PgPool, layer: &str) -> Result<()> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{layer}\""))
        .execute(pool)
        .await?;
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
