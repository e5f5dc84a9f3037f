//! SQLite-based run history

use crate::persistence::{RunState, RunStatus, RunStore};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;

const COLUMNS: &str = "run_id, pipeline_key, status, submitted_at, started_at, completed_at, error";

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open run history at {}", db_path.as_ref().display()))?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store under the platform data directory
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("transporter");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        Self::new(db_dir.join("runs.db")).await
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                pipeline_key TEXT NOT NULL,
                status TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_runs_pipeline_key ON runs(pipeline_key);
            CREATE INDEX IF NOT EXISTS idx_runs_submitted_at ON runs(submitted_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialise run history schema")?;

        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn from_row(row: &SqliteRow) -> Result<RunState> {
        let status: String = row.get("status");
        Ok(RunState {
            run_id: row.get("run_id"),
            pipeline_key: row.get("pipeline_key"),
            status: RunStatus::parse(&status).ok_or_else(|| anyhow!("unknown run status '{}'", status))?,
            submitted_at: Self::from_naive(row.get("submitted_at")),
            started_at: row.get::<Option<NaiveDateTime>, _>("started_at").map(Self::from_naive),
            completed_at: row.get::<Option<NaiveDateTime>, _>("completed_at").map(Self::from_naive),
            error: row.get("error"),
        })
    }
}

#[async_trait::async_trait]
impl RunStore for SqliteRunStore {
    async fn save_run(&self, run: &RunState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (run_id, pipeline_key, status, submitted_at, started_at, completed_at, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.pipeline_key)
        .bind(run.status.to_string())
        .bind(Self::to_naive(run.submitted_at))
        .bind(run.started_at.map(Self::to_naive))
        .bind(run.completed_at.map(Self::to_naive))
        .bind(&run.error)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<RunState>> {
        let row = sqlx::query(&format!("SELECT {} FROM runs WHERE run_id = ?1", COLUMNS))
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, pipeline_key: &str) -> Result<Vec<RunState>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM runs WHERE pipeline_key = ?1 ORDER BY submitted_at DESC",
            COLUMNS
        ))
        .bind(pipeline_key)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunState>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM runs ORDER BY submitted_at DESC LIMIT ?1",
            COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list recent runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT pipeline_key FROM runs ORDER BY pipeline_key ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline_key")).collect())
    }
}
