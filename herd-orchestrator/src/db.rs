use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Job records
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS herd_jobs (
            id BIGSERIAL PRIMARY KEY,
            owner_id TEXT,
            spec JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Parent logs use array_index 0; counters stay NULL for plain jobs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS herd_job_logs (
            job_id BIGINT NOT NULL REFERENCES herd_jobs(id) ON DELETE CASCADE,
            array_index INTEGER NOT NULL,
            history JSONB NOT NULL DEFAULT '[]',
            launch JSONB,
            result JSONB,
            num_started INTEGER,
            num_ended INTEGER,
            num_canceled INTEGER,
            num_failed INTEGER,
            PRIMARY KEY (job_id, array_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Out-of-band failure reports
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS herd_job_failures (
            id BIGSERIAL PRIMARY KEY,
            job_id BIGINT NOT NULL REFERENCES herd_jobs(id) ON DELETE CASCADE,
            array_index INTEGER,
            message TEXT NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_herd_jobs_owner_id ON herd_jobs(owner_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_herd_job_failures_job_id ON herd_job_failures(job_id)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
