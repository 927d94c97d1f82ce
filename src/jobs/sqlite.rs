//! SQLite-based job store.

use super::{Job, JobStatus, JobStore, NewJob, PaymentStatus};
use crate::agent::JobInput;
use crate::util::{now_string, sanitize_filename};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY NOT NULL,
    status TEXT NOT NULL DEFAULT 'awaiting_payment',
    payment_status TEXT NOT NULL DEFAULT 'pending',
    input_data TEXT NOT NULL,
    input_hash TEXT NOT NULL,
    identifier_from_purchaser TEXT NOT NULL,
    blockchain_identifier TEXT NOT NULL,
    amounts TEXT NOT NULL,
    pay_by_time TEXT NOT NULL,
    result TEXT,
    result_hash TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_blockchain_identifier ON jobs(blockchain_identifier);
"#;

const JOB_COLUMNS: &str = "id, status, payment_status, input_data, input_hash, identifier_from_purchaser,
     blockchain_identifier, amounts, pay_by_time, result, result_hash, error, created_at, updated_at";

pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub async fn new(base_dir: PathBuf, agent_id: &str) -> Result<Self, String> {
        let db_path = base_dir.join(format!("jobs-{}.db", sanitize_filename(agent_id)));

        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| format!("Failed to create job store dir: {}", e))?;

        // Open database in blocking task
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| format!("Failed to open SQLite database: {}", e))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| format!("Failed to run schema: {}", e))?;
            tracing::info!("Job database ready at {}", db_path.display());
            Ok::<_, String>(conn)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, String> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(|e| e.to_string())?
    }
}

/// Raw column values; converted outside the rusqlite row callback so
/// decoding failures surface as store errors.
struct JobRow {
    id: String,
    status: String,
    payment_status: String,
    input_data: String,
    input_hash: String,
    identifier_from_purchaser: String,
    blockchain_identifier: String,
    amounts: String,
    pay_by_time: String,
    result: Option<String>,
    result_hash: Option<String>,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            status: row.get(1)?,
            payment_status: row.get(2)?,
            input_data: row.get(3)?,
            input_hash: row.get(4)?,
            identifier_from_purchaser: row.get(5)?,
            blockchain_identifier: row.get(6)?,
            amounts: row.get(7)?,
            pay_by_time: row.get(8)?,
            result: row.get(9)?,
            result_hash: row.get(10)?,
            error: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_job(self) -> Result<Job, String> {
        let addresses: Vec<String> = serde_json::from_str(&self.input_data)
            .map_err(|e| format!("Corrupt input for job {}: {}", self.id, e))?;
        Ok(Job {
            id: Uuid::parse_str(&self.id).map_err(|e| format!("Corrupt job id {}: {}", self.id, e))?,
            status: JobStatus::parse(&self.status)
                .ok_or_else(|| format!("Unknown job status '{}'", self.status))?,
            payment_status: PaymentStatus::parse(&self.payment_status)
                .ok_or_else(|| format!("Unknown payment status '{}'", self.payment_status))?,
            input: JobInput { addresses },
            input_hash: self.input_hash,
            identifier_from_purchaser: self.identifier_from_purchaser,
            blockchain_identifier: self.blockchain_identifier,
            amounts: serde_json::from_str(&self.amounts)
                .map_err(|e| format!("Corrupt amounts for job {}: {}", self.id, e))?,
            pay_by_time: DateTime::parse_from_rfc3339(&self.pay_by_time)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| format!("Corrupt pay_by_time for job {}: {}", self.id, e))?,
            result: self.result,
            result_hash: self.result_hash,
            error: self.error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Fail with a precise message when a terminal update touched no row.
fn explain_unchanged(conn: &Connection, id: &str) -> String {
    let status: Option<String> = conn
        .query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |row| row.get(0))
        .optional()
        .unwrap_or(None);
    match status {
        Some(status) => format!("Job {} is already {}", id, status),
        None => format!("Job {} not found", id),
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn create_job(&self, new_job: NewJob) -> Result<Job, String> {
        let now = now_string();
        let job = Job {
            id: Uuid::new_v4(),
            status: JobStatus::AwaitingPayment,
            payment_status: PaymentStatus::Pending,
            input: new_job.input,
            input_hash: new_job.input_hash,
            identifier_from_purchaser: new_job.identifier_from_purchaser,
            blockchain_identifier: new_job.blockchain_identifier,
            amounts: new_job.amounts,
            pay_by_time: new_job.pay_by_time,
            result: None,
            result_hash: None,
            error: None,
            created_at: now.clone(),
            updated_at: now,
        };

        let amounts_json = serde_json::to_string(&job.amounts).map_err(|e| e.to_string())?;
        let row = job.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO jobs (id, status, payment_status, input_data, input_hash,
                                   identifier_from_purchaser, blockchain_identifier, amounts,
                                   pay_by_time, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    row.id.to_string(),
                    row.status.as_str(),
                    row.payment_status.as_str(),
                    row.input.to_input_data(),
                    row.input_hash,
                    row.identifier_from_purchaser,
                    row.blockchain_identifier,
                    amounts_json,
                    row.pay_by_time.to_rfc3339(),
                    row.created_at,
                    row.updated_at,
                ],
            )
            .map_err(|e| format!("Failed to insert job: {}", e))?;
            Ok(())
        })
        .await?;

        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, String> {
        let id_str = id.to_string();
        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                    params![id_str],
                    JobRow::from_row,
                )
                .optional()
                .map_err(|e| e.to_string())
            })
            .await?;
        row.map(JobRow::into_job).transpose()
    }

    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>, String> {
        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM jobs WHERE status = ?1 ORDER BY created_at ASC",
                        JOB_COLUMNS
                    ))
                    .map_err(|e| e.to_string())?;
                let rows = stmt
                    .query_map(params![status.as_str()], JobRow::from_row)
                    .map_err(|e| e.to_string())?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| e.to_string())?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn mark_running(&self, id: Uuid) -> Result<bool, String> {
        let id_str = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE jobs SET status = ?1, payment_status = ?2, updated_at = ?3
                     WHERE id = ?4 AND status = ?5",
                    params![
                        JobStatus::Running.as_str(),
                        PaymentStatus::Locked.as_str(),
                        now_string(),
                        id_str,
                        JobStatus::AwaitingPayment.as_str(),
                    ],
                )
                .map_err(|e| e.to_string())?;
            if changed == 0 {
                let exists = conn
                    .prepare("SELECT 1 FROM jobs WHERE id = ?1")
                    .map_err(|e| e.to_string())?
                    .exists(params![id_str])
                    .map_err(|e| e.to_string())?;
                if !exists {
                    return Err(format!("Job {} not found", id_str));
                }
            }
            Ok(changed > 0)
        })
        .await
    }

    async fn complete_job(
        &self,
        id: Uuid,
        result: &str,
        result_hash: &str,
        payment_status: PaymentStatus,
    ) -> Result<(), String> {
        let id_str = id.to_string();
        let result = result.to_string();
        let result_hash = result_hash.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE jobs SET status = ?1, payment_status = ?2, result = ?3,
                                     result_hash = ?4, updated_at = ?5
                     WHERE id = ?6 AND status NOT IN ('completed', 'failed')",
                    params![
                        JobStatus::Completed.as_str(),
                        payment_status.as_str(),
                        result,
                        result_hash,
                        now_string(),
                        id_str,
                    ],
                )
                .map_err(|e| e.to_string())?;
            if changed == 0 {
                return Err(explain_unchanged(conn, &id_str));
            }
            Ok(())
        })
        .await
    }

    async fn fail_job(&self, id: Uuid, reason: &str) -> Result<(), String> {
        let id_str = id.to_string();
        let reason = reason.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE jobs SET status = ?1, error = ?2, updated_at = ?3
                     WHERE id = ?4 AND status NOT IN ('completed', 'failed')",
                    params![JobStatus::Failed.as_str(), reason, now_string(), id_str],
                )
                .map_err(|e| e.to_string())?;
            if changed == 0 {
                return Err(explain_unchanged(conn, &id_str));
            }
            Ok(())
        })
        .await
    }
}
