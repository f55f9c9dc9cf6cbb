use std::sync::Arc;

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

/// Thin pool wrapper, mirroring the one-connection-per-transaction session
/// scoping the rest of the repository relies on: callers never hold a `Db`
/// across an `.await` boundary beyond the single query/transaction it backs.
#[derive(Clone)]
pub struct Db {
    pub pool: Arc<AnyPool>,
}

impl Db {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        crate::schema::migrate(&self.pool).await
    }
}
