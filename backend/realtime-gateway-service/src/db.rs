use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::str::FromStr;

const SCHEMA: &str = include_str!("../migrations/0001_realtime_gateway.sql");

pub async fn init_pool(database_url: &str, max_size: usize) -> anyhow::Result<Pool> {
    let pg_config = tokio_postgres::Config::from_str(database_url)?;
    let manager = Manager::from_config(
        pg_config,
        tokio_postgres::NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(manager).max_size(max_size).build()?;

    let client = pool.get().await?;
    client.batch_execute(SCHEMA).await?;
    tracing::info!(max_size, "database pool ready, schema applied");

    Ok(pool)
}
