//! PostgreSQL-backed storage.
//!
//! Jobs live in `relay_jobs`. Workers claim a job by flipping it to `running`
//! with `FOR UPDATE SKIP LOCKED`, so concurrent workers never claim the same
//! attempt. A `running` job whose lock is older than `lock_timeout` is treated
//! as abandoned and handed out again.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::marker::PhantomData;
use std::time::Duration;

use crate::storage::{new_job_id, Job, Storage};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS relay_jobs (
    id          TEXT PRIMARY KEY,
    queue       TEXT NOT NULL,
    payload     JSONB NOT NULL,
    attempt     INTEGER NOT NULL DEFAULT 0,
    status      TEXT NOT NULL DEFAULT 'pending',
    run_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    locked_at   TIMESTAMPTZ,
    last_error  TEXT,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS relay_jobs_runnable
    ON relay_jobs (queue, run_at)
    WHERE status <> 'dead';
"#;

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    queue: String,
    payload: serde_json::Value,
    attempt: i32,
}

pub struct PostgresStorage<T> {
    pool: PgPool,
    lock_timeout: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for PostgresStorage<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            lock_timeout: self.lock_timeout,
            _marker: PhantomData,
        }
    }
}

impl<T> PostgresStorage<T> {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connect job storage")?;
        let storage = Self::from_pool(pool);
        storage.setup().await?;
        Ok(storage)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: Duration::from_secs(300),
            _marker: PhantomData,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Create the jobs table if it does not exist yet.
    pub async fn setup(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("create relay_jobs table")?;
        Ok(())
    }
}

#[async_trait]
impl<T> Storage<T> for PostgresStorage<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn push(&self, queue: &str, job: T) -> Result<String> {
        let id = new_job_id();
        let payload = serde_json::to_value(&job).context("serialize job payload")?;
        sqlx::query(
            r#"
            INSERT INTO relay_jobs (id, queue, payload)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&id)
        .bind(queue)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn fetch(&self, queue: &str) -> Result<Option<Job<T>>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE relay_jobs
            SET status = 'running', locked_at = now()
            WHERE id = (
                SELECT id
                FROM relay_jobs
                WHERE queue = $1
                  AND ((status = 'pending' AND run_at <= now())
                    OR (status = 'running' AND locked_at < now() - make_interval(secs => $2)))
                ORDER BY run_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, queue, payload, attempt
            "#,
        )
        .bind(queue)
        .bind(self.lock_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload = serde_json::from_value(row.payload)
            .with_context(|| format!("decode payload of job {}", row.id))?;
        Ok(Some(Job {
            id: row.id,
            queue: row.queue,
            attempt: row.attempt.max(0) as u32,
            payload,
        }))
    }

    async fn ack(&self, job: &Job<T>) -> Result<()> {
        sqlx::query("DELETE FROM relay_jobs WHERE id = $1")
            .bind(&job.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn retry(&self, job: &Job<T>, delay: Duration, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE relay_jobs
            SET status = 'pending',
                attempt = attempt + 1,
                run_at = now() + make_interval(secs => $2),
                locked_at = NULL,
                last_error = $3
            WHERE id = $1
            "#,
        )
        .bind(&job.id)
        .bind(delay.as_secs_f64())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn kill(&self, job: &Job<T>, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE relay_jobs
            SET status = 'dead', locked_at = NULL, last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(&job.id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
