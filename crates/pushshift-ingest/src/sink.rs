//! Relational sink for matching submissions
//!
//! Each archive is loaded inside one transaction. Rows become visible only
//! when that transaction commits, immediately before the archive is
//! checkpointed.

use crate::config::DatabaseConfig;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Acquire, Postgres, Transaction};
use std::time::Duration;
use tracing::info;

const INSERT_SUBMISSION: &str = "INSERT INTO submissions (created_utc, submission_id, title) \
     VALUES ($1, $2, $3) \
     ON CONFLICT (submission_id) DO NOTHING";

/// One row of the `submissions` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRow {
    pub created_utc: DateTime<Utc>,
    pub submission_id: String,
    pub title: String,
}

/// Result of inserting a single row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same `submission_id` already exists
    Duplicate,
    /// The sink refused this row; the transaction remains usable
    Rejected(String),
}

/// Destination for loaded submissions
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    /// Open the transaction for one archive
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>>;
}

/// An open per-archive transaction. Dropping it without [`commit`] rolls back.
///
/// [`commit`]: SinkTransaction::commit
#[async_trait]
pub trait SinkTransaction: Send {
    /// Insert one row. `Err` means the transaction itself is broken.
    async fn insert(&mut self, row: &SubmissionRow) -> Result<InsertOutcome>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// PostgreSQL sink backed by a small connection pool
#[derive(Clone)]
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Pool that opens its first connection on first use
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_lazy(&config.url)?;

        Ok(Self { pool })
    }

    /// Create the `submissions` table and its unique index if missing
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Sink migrations applied");
        Ok(())
    }
}

#[async_trait]
impl SubmissionSink for PgSink {
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSinkTransaction { tx }))
    }
}

struct PgSinkTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SinkTransaction for PgSinkTransaction {
    async fn insert(&mut self, row: &SubmissionRow) -> Result<InsertOutcome> {
        // A failed statement aborts a Postgres transaction, so each row gets a
        // savepoint that can be rolled back on its own.
        let mut savepoint = self.tx.begin().await?;

        let result = sqlx::query(INSERT_SUBMISSION)
            .bind(row.created_utc.naive_utc())
            .bind(&row.submission_id)
            .bind(&row.title)
            .execute(&mut *savepoint)
            .await;

        match result {
            Ok(done) => {
                savepoint.commit().await?;
                if done.rows_affected() == 0 {
                    Ok(InsertOutcome::Duplicate)
                } else {
                    Ok(InsertOutcome::Inserted)
                }
            },
            Err(sqlx::Error::Database(db_err)) => {
                savepoint.rollback().await?;
                Ok(InsertOutcome::Rejected(db_err.to_string()))
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
