use sqlx::{postgres::PgPoolOptions, PgPool};

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Fails fast when the admissions schema has not been created.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        let present: Option<String> =
            sqlx::query_scalar("SELECT to_regclass('admissions.candidates')::text")
                .fetch_one(&self.pool)
                .await?;

        if present.is_none() {
            anyhow::bail!(
                "admissions schema not found; apply migrations/0001_admissions_core.sql first"
            );
        }
        Ok(())
    }
}
