use sqlx::{postgres::PgPoolOptions, PgPool};

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(database_url)
            .await?;

        // Fail fast when the database is unreachable. Schema lives in migrations/.
        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }
}
