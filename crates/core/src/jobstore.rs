//! JobStore port (spec §3, §4.1, §4.2): transactional CRUD over `Session`
//! and `AnalysisJob`, with the conditional updates that give the worker
//! claim protocol and `CompleteUpload`'s idempotency their guarantees.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::errors::JobStoreError;
use crate::models::{AnalysisJob, AnalysisMode, Findings, JobStatus, Report, Session, SessionStatus};

/// Everything the API and worker need from session/job storage. Methods
/// that implement a state transition are named after the transition, not
/// the SQL verb, so callers can't bypass the state machine by reaching
/// for a generic `update`.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_session(&self, session: NewSession) -> Result<Session, JobStoreError>;

    async fn get_session(&self, session_id: Uuid) -> Result<Session, JobStoreError>;

    async fn list_sessions(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
        status_filter: Option<SessionStatus>,
        exclude_failed: bool,
    ) -> Result<(Vec<Session>, i64), JobStoreError>;

    /// `InitiateUpload`: creates a fresh `AnalysisJob` row against an
    /// existing, non-terminal session. Fails with `PreconditionFailed` if
    /// the session is already `failed`.
    async fn create_job(
        &self,
        session_id: Uuid,
        s3_key: String,
        sample_fps: i32,
        include_frames: bool,
        analysis_mode: Option<AnalysisMode>,
    ) -> Result<AnalysisJob, JobStoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<AnalysisJob, JobStoreError>;

    /// `CompleteUpload`'s idempotency check (spec §4.1 table): returns the
    /// job's current status without mutating anything.
    async fn peek_job_status(&self, job_id: Uuid) -> Result<JobStatus, JobStoreError>;

    /// `awaiting_upload|failed -> queued`, and bumps the parent session to
    /// `uploaded`. Returns the updated job so the caller can enqueue it.
    async fn transition_to_queued(&self, job_id: Uuid) -> Result<AnalysisJob, JobStoreError>;

    /// Preflight 404 path: `awaiting_upload|failed -> failed`.
    async fn mark_upload_missing(&self, job_id: Uuid, s3_key: &str) -> Result<(), JobStoreError>;

    /// Conditional claim: `queued -> quick_running`. Returns `Ok(None)`
    /// when no row matched (already claimed by another worker, or the
    /// message was stale) rather than an error — the caller drops the
    /// queue message either way.
    async fn claim_job(&self, job_id: Uuid) -> Result<Option<AnalysisJob>, JobStoreError>;

    /// Persists quick-pass artifacts and transitions `quick_running ->
    /// quick_done`. Call only after the §4.4 guardrail has accepted the
    /// findings/report pair.
    async fn persist_quick_and_advance(
        &self,
        job_id: Uuid,
        analysis_mode_used: AnalysisMode,
        quick_results: serde_json::Value,
        quick_findings: Findings,
        quick_report: Report,
        quick_results_s3_key: Option<String>,
    ) -> Result<AnalysisJob, JobStoreError>;

    /// `quick_done -> deep_running`.
    async fn transition_to_deep_running(&self, job_id: Uuid) -> Result<AnalysisJob, JobStoreError>;

    /// Persists deep-pass artifacts and transitions `deep_running ->
    /// done`. `analysis_mode_used` is mirrored into `deep_results` the same
    /// way `persist_quick_and_advance` mirrors it into `quick_results`, so
    /// the field is identical across both result payloads.
    async fn persist_deep_and_complete(
        &self,
        job_id: Uuid,
        analysis_mode_used: AnalysisMode,
        deep_results: serde_json::Value,
        deep_findings: Findings,
        deep_report: Report,
        deep_results_s3_key: Option<String>,
    ) -> Result<AnalysisJob, JobStoreError>;

    /// Any in-flight state `-> failed`, with a message explaining why.
    async fn mark_failed(&self, job_id: Uuid, error_message: &str) -> Result<(), JobStoreError>;

    /// Ownership-checked cascade delete of a session and its jobs.
    /// Returns the job's `s3_key`s so the caller can best-effort delete
    /// the backing blobs.
    async fn delete_session_cascade(&self, session_id: Uuid, owner_id: &str) -> Result<Vec<String>, JobStoreError>;

    async fn bulk_delete_sessions(&self, session_ids: &[Uuid], owner_id: &str) -> Result<Vec<String>, JobStoreError>;

    /// DB-rescan safety net (spec §4.1: "worker is driven by DB rescan as
    /// safety net"): returns any job that has sat in `quick_running` or
    /// `deep_running` past `stale_after` back to `queued` so a future
    /// claim can pick it up again. Covers a worker that crashed hard
    /// enough to never reach `mark_failed` and whose queue message was
    /// separately lost or already exhausted its redelivery budget.
    async fn reap_stale_claims(&self, stale_after: chrono::Duration) -> Result<Vec<Uuid>, JobStoreError>;
}

pub struct NewSession {
    pub owner_id: String,
    pub title: String,
    pub player_ids: Vec<String>,
    pub notes: Option<String>,
    pub analysis_context: Option<String>,
    pub camera_view: Option<String>,
}

/// Production adapter over Postgres via `sqlx`.
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Exposes the underlying pool for health checks; business logic
    /// should go through the `JobStore` trait instead.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Builds a connection pool the way the rest of the platform's
    /// services do: bounded size, bounded acquire/idle/lifetime, and a
    /// per-connection statement timeout so a runaway query can't starve
    /// the pool. Runs embedded migrations before returning.
    pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("SET statement_timeout = '60s'").execute(&mut *conn).await?;
                    sqlx::query("SET idle_in_transaction_session_timeout = '60s'")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&config.url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

fn row_to_session(row: &sqlx::postgres::PgRow) -> Result<Session, sqlx::Error> {
    Ok(Session {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        title: row.try_get("title")?,
        player_ids: row.try_get("player_ids")?,
        notes: row.try_get("notes")?,
        analysis_context: row.try_get("analysis_context")?,
        camera_view: row.try_get("camera_view")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<AnalysisJob, sqlx::Error> {
    Ok(AnalysisJob {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        status: row.try_get("status")?,
        stage: row.try_get("stage")?,
        progress_pct: row.try_get("progress_pct")?,
        analysis_mode: row.try_get("analysis_mode")?,
        sample_fps: row.try_get("sample_fps")?,
        include_frames: row.try_get("include_frames")?,
        s3_key: row.try_get("s3_key")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
        quick_results: row.try_get("quick_results")?,
        deep_results: row.try_get("deep_results")?,
        quick_findings: row
            .try_get::<Option<serde_json::Value>, _>("quick_findings")?
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        quick_report: row
            .try_get::<Option<serde_json::Value>, _>("quick_report")?
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        deep_findings: row
            .try_get::<Option<serde_json::Value>, _>("deep_findings")?
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        deep_report: row
            .try_get::<Option<serde_json::Value>, _>("deep_report")?
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        quick_results_s3_key: row.try_get("quick_results_s3_key")?,
        deep_results_s3_key: row.try_get("deep_results_s3_key")?,
    })
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create_session(&self, session: NewSession) -> Result<Session, JobStoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO sessions (id, owner_id, title, player_ids, notes, analysis_context, camera_view, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', now(), now())
            RETURNING id, owner_id, title, player_ids, notes, analysis_context, camera_view, status, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&session.owner_id)
        .bind(&session.title)
        .bind(&session.player_ids)
        .bind(&session.notes)
        .bind(&session.analysis_context)
        .bind(&session.camera_view)
        .fetch_one(&self.pool)
        .await
        .map_err(JobStoreError::Transient)?;
        row_to_session(&row).map_err(JobStoreError::Transient)
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Session, JobStoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(JobStoreError::Transient)?
            .ok_or(JobStoreError::NotFound)?;
        row_to_session(&row).map_err(JobStoreError::Transient)
    }

    async fn list_sessions(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
        status_filter: Option<SessionStatus>,
        exclude_failed: bool,
    ) -> Result<(Vec<Session>, i64), JobStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM sessions
            WHERE owner_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND (NOT $3 OR status != 'failed')
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(owner_id)
        .bind(&status_filter)
        .bind(exclude_failed)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(JobStoreError::Transient)?;
        let sessions = rows.iter().map(row_to_session).collect::<Result<Vec<_>, _>>().map_err(JobStoreError::Transient)?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*) FROM sessions
            WHERE owner_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND (NOT $3 OR status != 'failed')
            "#,
        )
        .bind(owner_id)
        .bind(&status_filter)
        .bind(exclude_failed)
        .fetch_one(&self.pool)
        .await
        .map_err(JobStoreError::Transient)?;

        Ok((sessions, total))
    }

    async fn create_job(
        &self,
        session_id: Uuid,
        s3_key: String,
        sample_fps: i32,
        include_frames: bool,
        analysis_mode: Option<AnalysisMode>,
    ) -> Result<AnalysisJob, JobStoreError> {
        let mut tx = self.pool.begin().await.map_err(JobStoreError::Transient)?;

        let status: SessionStatus = sqlx::query_scalar("SELECT status FROM sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(JobStoreError::Transient)?
            .ok_or(JobStoreError::NotFound)?;
        if status == SessionStatus::Failed {
            return Err(JobStoreError::PreconditionFailed("session is in a terminal state".into()));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO analysis_jobs (id, session_id, status, stage, progress_pct, analysis_mode, sample_fps, include_frames, s3_key, created_at, updated_at)
            VALUES ($1, $2, 'awaiting_upload', 'AWAITING_UPLOAD', 0, $3, $4, $5, $6, now(), now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(analysis_mode)
        .bind(sample_fps)
        .bind(include_frames)
        .bind(&s3_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(JobStoreError::Transient)?;
        let job_out = row_to_job(&row).map_err(JobStoreError::Transient)?;

        tx.commit().await.map_err(JobStoreError::Transient)?;
        Ok(job_out)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<AnalysisJob, JobStoreError> {
        let row = sqlx::query("SELECT * FROM analysis_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(JobStoreError::Transient)?
            .ok_or(JobStoreError::NotFound)?;
        row_to_job(&row).map_err(JobStoreError::Transient)
    }

    async fn peek_job_status(&self, job_id: Uuid) -> Result<JobStatus, JobStoreError> {
        let status: JobStatus = sqlx::query_scalar("SELECT status FROM analysis_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(JobStoreError::Transient)?
            .ok_or(JobStoreError::NotFound)?;
        Ok(status)
    }

    async fn transition_to_queued(&self, job_id: Uuid) -> Result<AnalysisJob, JobStoreError> {
        let mut tx = self.pool.begin().await.map_err(JobStoreError::Transient)?;

        let row = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = 'queued', stage = 'QUEUED', progress_pct = 0, updated_at = now()
            WHERE id = $1 AND status IN ('awaiting_upload', 'failed')
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(JobStoreError::Transient)?
        .ok_or_else(|| JobStoreError::PreconditionFailed("job is not awaiting_upload or failed".into()))?;
        let job = row_to_job(&row).map_err(JobStoreError::Transient)?;

        sqlx::query("UPDATE sessions SET status = 'uploaded', updated_at = now() WHERE id = $1")
            .bind(job.session_id)
            .execute(&mut *tx)
            .await
            .map_err(JobStoreError::Transient)?;

        tx.commit().await.map_err(JobStoreError::Transient)?;
        Ok(job)
    }

    async fn mark_upload_missing(&self, job_id: Uuid, s3_key: &str) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = 'failed', stage = 'FAILED', error_message = $2, updated_at = now()
            WHERE id = $1 AND status IN ('awaiting_upload', 'failed')
            "#,
        )
        .bind(job_id)
        .bind(format!("Upload not found at {s3_key}"))
        .execute(&self.pool)
        .await
        .map_err(JobStoreError::Transient)?;
        Ok(())
    }

    async fn claim_job(&self, job_id: Uuid) -> Result<Option<AnalysisJob>, JobStoreError> {
        let row = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = 'quick_running', stage = 'QUICK_RUNNING', updated_at = now()
            WHERE id = $1 AND status = 'queued'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(JobStoreError::Transient)?;

        row.as_ref().map(row_to_job).transpose().map_err(JobStoreError::Transient)
    }

    async fn persist_quick_and_advance(
        &self,
        job_id: Uuid,
        analysis_mode_used: AnalysisMode,
        quick_results: serde_json::Value,
        quick_findings: Findings,
        quick_report: Report,
        quick_results_s3_key: Option<String>,
    ) -> Result<AnalysisJob, JobStoreError> {
        let mut results = quick_results;
        if let Some(obj) = results.as_object_mut() {
            obj.insert("analysis_mode_used".into(), serde_json::json!(analysis_mode_used.as_str()));
        }

        let row = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = 'quick_done', stage = 'QUICK_DONE', progress_pct = 50,
                analysis_mode = $2, quick_results = $3, quick_findings = $4, quick_report = $5,
                quick_results_s3_key = $6, updated_at = now()
            WHERE id = $1 AND status = 'quick_running'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(analysis_mode_used)
        .bind(&results)
        .bind(serde_json::to_value(&quick_findings).map_err(|e| JobStoreError::Other(e.into()))?)
        .bind(serde_json::to_value(&quick_report).map_err(|e| JobStoreError::Other(e.into()))?)
        .bind(&quick_results_s3_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(JobStoreError::Transient)?
        .ok_or_else(|| JobStoreError::PreconditionFailed("job is not quick_running".into()))?;

        row_to_job(&row).map_err(JobStoreError::Transient)
    }

    async fn transition_to_deep_running(&self, job_id: Uuid) -> Result<AnalysisJob, JobStoreError> {
        let row = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = 'deep_running', stage = 'DEEP_RUNNING', updated_at = now()
            WHERE id = $1 AND status = 'quick_done'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(JobStoreError::Transient)?
        .ok_or_else(|| JobStoreError::PreconditionFailed("job is not quick_done".into()))?;
        row_to_job(&row).map_err(JobStoreError::Transient)
    }

    async fn persist_deep_and_complete(
        &self,
        job_id: Uuid,
        analysis_mode_used: AnalysisMode,
        deep_results: serde_json::Value,
        deep_findings: Findings,
        deep_report: Report,
        deep_results_s3_key: Option<String>,
    ) -> Result<AnalysisJob, JobStoreError> {
        let mut results = deep_results;
        if let Some(obj) = results.as_object_mut() {
            obj.insert("analysis_mode_used".into(), serde_json::json!(analysis_mode_used.as_str()));
        }

        let row = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = 'done', stage = 'DONE', progress_pct = 100,
                deep_results = $2, deep_findings = $3, deep_report = $4,
                deep_results_s3_key = $5, completed_at = now(), updated_at = now()
            WHERE id = $1 AND status = 'deep_running'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(&results)
        .bind(serde_json::to_value(&deep_findings).map_err(|e| JobStoreError::Other(e.into()))?)
        .bind(serde_json::to_value(&deep_report).map_err(|e| JobStoreError::Other(e.into()))?)
        .bind(&deep_results_s3_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(JobStoreError::Transient)?
        .ok_or_else(|| JobStoreError::PreconditionFailed("job is not deep_running".into()))?;

        let job = row_to_job(&row).map_err(JobStoreError::Transient)?;
        sqlx::query("UPDATE sessions SET status = 'ready', updated_at = now() WHERE id = $1")
            .bind(job.session_id)
            .execute(&self.pool)
            .await
            .map_err(JobStoreError::Transient)?;
        Ok(job)
    }

    async fn mark_failed(&self, job_id: Uuid, error_message: &str) -> Result<(), JobStoreError> {
        let mut tx = self.pool.begin().await.map_err(JobStoreError::Transient)?;
        let row = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = 'failed', stage = 'FAILED', error_message = $2, updated_at = now()
            WHERE id = $1
            RETURNING session_id
            "#,
        )
        .bind(job_id)
        .bind(error_message)
        .fetch_optional(&mut *tx)
        .await
        .map_err(JobStoreError::Transient)?
        .ok_or(JobStoreError::NotFound)?;
        let session_id: Uuid = row.try_get("session_id").map_err(JobStoreError::Transient)?;

        sqlx::query("UPDATE sessions SET status = 'failed', updated_at = now() WHERE id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(JobStoreError::Transient)?;

        tx.commit().await.map_err(JobStoreError::Transient)?;
        Ok(())
    }

    async fn delete_session_cascade(&self, session_id: Uuid, owner_id: &str) -> Result<Vec<String>, JobStoreError> {
        let mut tx = self.pool.begin().await.map_err(JobStoreError::Transient)?;

        let owned: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM sessions WHERE id = $1 AND owner_id = $2)")
            .bind(session_id)
            .bind(owner_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(JobStoreError::Transient)?;
        if !owned {
            return Err(JobStoreError::PreconditionFailed("not the owner of this session".into()));
        }

        let keys: Vec<String> = sqlx::query_scalar("SELECT s3_key FROM analysis_jobs WHERE session_id = $1")
            .bind(session_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(JobStoreError::Transient)?;

        sqlx::query("DELETE FROM analysis_jobs WHERE session_id = $1").bind(session_id).execute(&mut *tx).await.map_err(JobStoreError::Transient)?;
        let deleted = sqlx::query("DELETE FROM sessions WHERE id = $1").bind(session_id).execute(&mut *tx).await.map_err(JobStoreError::Transient)?;
        if deleted.rows_affected() == 0 {
            return Err(JobStoreError::NotFound);
        }

        tx.commit().await.map_err(JobStoreError::Transient)?;
        Ok(keys)
    }

    async fn bulk_delete_sessions(&self, session_ids: &[Uuid], owner_id: &str) -> Result<Vec<String>, JobStoreError> {
        let mut all_keys = Vec::new();
        for id in session_ids {
            match self.delete_session_cascade(*id, owner_id).await {
                Ok(keys) => all_keys.extend(keys),
                Err(JobStoreError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(all_keys)
    }

    async fn reap_stale_claims(&self, stale_after: chrono::Duration) -> Result<Vec<Uuid>, JobStoreError> {
        let threshold = Utc::now() - stale_after;
        let rows = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = 'queued', stage = 'QUEUED', updated_at = now()
            WHERE status IN ('quick_running', 'deep_running') AND updated_at < $1
            RETURNING id
            "#,
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
        .map_err(JobStoreError::Transient)?;

        rows.iter().map(|row| row.try_get("id").map_err(JobStoreError::Transient)).collect()
    }
}

/// In-memory fake used by unit and HTTP-integration tests (spec §10.5).
/// Enforces the same state-machine preconditions as the Postgres adapter
/// so tests exercise real transition logic, not a rubber stamp.
#[derive(Default)]
pub struct InMemoryJobStore {
    sessions: Arc<Mutex<HashMap<Uuid, Session>>>,
    jobs: Arc<Mutex<HashMap<Uuid, AnalysisJob>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_session(&self, session: NewSession) -> Result<Session, JobStoreError> {
        let now = Utc::now();
        let session_out = Session {
            id: Uuid::new_v4(),
            owner_id: session.owner_id,
            title: session.title,
            player_ids: session.player_ids,
            notes: session.notes,
            analysis_context: session.analysis_context,
            camera_view: session.camera_view,
            status: SessionStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.sessions.lock().await.insert(session_out.id, session_out.clone());
        Ok(session_out)
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Session, JobStoreError> {
        self.sessions.lock().await.get(&session_id).cloned().ok_or(JobStoreError::NotFound)
    }

    async fn list_sessions(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
        status_filter: Option<SessionStatus>,
        exclude_failed: bool,
    ) -> Result<(Vec<Session>, i64), JobStoreError> {
        let sessions = self.sessions.lock().await;
        let mut matching: Vec<Session> = sessions
            .values()
            .filter(|s| s.owner_id == owner_id)
            .filter(|s| status_filter.is_none_or(|f| f == s.status))
            .filter(|s| !exclude_failed || s.status != SessionStatus::Failed)
            .cloned()
            .collect();
        matching.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        let total = matching.len() as i64;
        let page = matching.into_iter().skip(offset.max(0) as usize).take(limit.max(0) as usize).collect();
        Ok((page, total))
    }

    async fn create_job(
        &self,
        session_id: Uuid,
        s3_key: String,
        sample_fps: i32,
        include_frames: bool,
        analysis_mode: Option<AnalysisMode>,
    ) -> Result<AnalysisJob, JobStoreError> {
        let status = self
            .sessions
            .lock()
            .await
            .get(&session_id)
            .map(|s| s.status)
            .ok_or(JobStoreError::NotFound)?;
        if status == SessionStatus::Failed {
            return Err(JobStoreError::PreconditionFailed("session is in a terminal state".into()));
        }

        let now = Utc::now();
        let job_out = AnalysisJob {
            id: Uuid::new_v4(),
            session_id,
            status: JobStatus::AwaitingUpload,
            stage: "AWAITING_UPLOAD".into(),
            progress_pct: 0,
            analysis_mode,
            sample_fps,
            include_frames,
            s3_key,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_message: None,
            quick_results: None,
            deep_results: None,
            quick_findings: None,
            quick_report: None,
            deep_findings: None,
            deep_report: None,
            quick_results_s3_key: None,
            deep_results_s3_key: None,
        };

        self.jobs.lock().await.insert(job_out.id, job_out.clone());
        Ok(job_out)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<AnalysisJob, JobStoreError> {
        self.jobs.lock().await.get(&job_id).cloned().ok_or(JobStoreError::NotFound)
    }

    async fn peek_job_status(&self, job_id: Uuid) -> Result<JobStatus, JobStoreError> {
        self.jobs.lock().await.get(&job_id).map(|j| j.status).ok_or(JobStoreError::NotFound)
    }

    async fn transition_to_queued(&self, job_id: Uuid) -> Result<AnalysisJob, JobStoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound)?;
        if !matches!(job.status, JobStatus::AwaitingUpload | JobStatus::Failed) {
            return Err(JobStoreError::PreconditionFailed("job is not awaiting_upload or failed".into()));
        }
        job.status = JobStatus::Queued;
        job.stage = "QUEUED".into();
        job.progress_pct = 0;
        job.updated_at = Utc::now();
        let out = job.clone();
        drop(jobs);

        if let Some(session) = self.sessions.lock().await.get_mut(&out.session_id) {
            session.status = SessionStatus::Uploaded;
            session.updated_at = Utc::now();
        }
        Ok(out)
    }

    async fn mark_upload_missing(&self, job_id: Uuid, s3_key: &str) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound)?;
        if matches!(job.status, JobStatus::AwaitingUpload | JobStatus::Failed) {
            job.status = JobStatus::Failed;
            job.stage = "FAILED".into();
            job.error_message = Some(format!("Upload not found at {s3_key}"));
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn claim_job(&self, job_id: Uuid) -> Result<Option<AnalysisJob>, JobStoreError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&job_id) else { return Ok(None) };
        if !job.status.is_claimable() {
            return Ok(None);
        }
        job.status = JobStatus::QuickRunning;
        job.stage = "QUICK_RUNNING".into();
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn persist_quick_and_advance(
        &self,
        job_id: Uuid,
        analysis_mode_used: AnalysisMode,
        mut quick_results: serde_json::Value,
        quick_findings: Findings,
        quick_report: Report,
        quick_results_s3_key: Option<String>,
    ) -> Result<AnalysisJob, JobStoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound)?;
        if job.status != JobStatus::QuickRunning {
            return Err(JobStoreError::PreconditionFailed("job is not quick_running".into()));
        }
        if let Some(obj) = quick_results.as_object_mut() {
            obj.insert("analysis_mode_used".into(), serde_json::json!(analysis_mode_used.as_str()));
        }
        job.status = JobStatus::QuickDone;
        job.stage = "QUICK_DONE".into();
        job.progress_pct = 50;
        job.analysis_mode = Some(analysis_mode_used);
        job.quick_results = Some(quick_results);
        job.quick_findings = Some(quick_findings);
        job.quick_report = Some(quick_report);
        job.quick_results_s3_key = quick_results_s3_key;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn transition_to_deep_running(&self, job_id: Uuid) -> Result<AnalysisJob, JobStoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound)?;
        if job.status != JobStatus::QuickDone {
            return Err(JobStoreError::PreconditionFailed("job is not quick_done".into()));
        }
        job.status = JobStatus::DeepRunning;
        job.stage = "DEEP_RUNNING".into();
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn persist_deep_and_complete(
        &self,
        job_id: Uuid,
        analysis_mode_used: AnalysisMode,
        mut deep_results: serde_json::Value,
        deep_findings: Findings,
        deep_report: Report,
        deep_results_s3_key: Option<String>,
    ) -> Result<AnalysisJob, JobStoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound)?;
        if job.status != JobStatus::DeepRunning {
            return Err(JobStoreError::PreconditionFailed("job is not deep_running".into()));
        }
        if let Some(obj) = deep_results.as_object_mut() {
            obj.insert("analysis_mode_used".into(), serde_json::json!(analysis_mode_used.as_str()));
        }
        job.status = JobStatus::Done;
        job.stage = "DONE".into();
        job.progress_pct = 100;
        job.deep_results = Some(deep_results);
        job.deep_findings = Some(deep_findings);
        job.deep_report = Some(deep_report);
        job.deep_results_s3_key = deep_results_s3_key;
        job.completed_at = Some(Utc::now());
        job.updated_at = Utc::now();
        let out = job.clone();
        drop(jobs);

        if let Some(session) = self.sessions.lock().await.get_mut(&out.session_id) {
            session.status = SessionStatus::Ready;
            session.updated_at = Utc::now();
        }
        Ok(out)
    }

    async fn mark_failed(&self, job_id: Uuid, error_message: &str) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound)?;
        job.status = JobStatus::Failed;
        job.stage = "FAILED".into();
        job.error_message = Some(error_message.to_string());
        job.updated_at = Utc::now();
        let session_id = job.session_id;
        drop(jobs);

        if let Some(session) = self.sessions.lock().await.get_mut(&session_id) {
            session.status = SessionStatus::Failed;
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_session_cascade(&self, session_id: Uuid, owner_id: &str) -> Result<Vec<String>, JobStoreError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get(&session_id).ok_or(JobStoreError::NotFound)?;
        if session.owner_id != owner_id {
            return Err(JobStoreError::PreconditionFailed("not the owner of this session".into()));
        }
        sessions.remove(&session_id);
        drop(sessions);

        let mut jobs = self.jobs.lock().await;
        let keys: Vec<String> = jobs.values().filter(|j| j.session_id == session_id).map(|j| j.s3_key.clone()).collect();
        jobs.retain(|_, j| j.session_id != session_id);
        Ok(keys)
    }

    async fn bulk_delete_sessions(&self, session_ids: &[Uuid], owner_id: &str) -> Result<Vec<String>, JobStoreError> {
        let mut all_keys = Vec::new();
        for id in session_ids {
            match self.delete_session_cascade(*id, owner_id).await {
                Ok(keys) => all_keys.extend(keys),
                Err(JobStoreError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(all_keys)
    }

    async fn reap_stale_claims(&self, stale_after: chrono::Duration) -> Result<Vec<Uuid>, JobStoreError> {
        let threshold = Utc::now() - stale_after;
        let mut jobs = self.jobs.lock().await;
        let mut reaped = Vec::new();
        for job in jobs.values_mut() {
            if matches!(job.status, JobStatus::QuickRunning | JobStatus::DeepRunning) && job.updated_at < threshold {
                job.status = JobStatus::Queued;
                job.stage = "QUEUED".into();
                job.updated_at = Utc::now();
                reaped.push(job.id);
            }
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Pass, compute_metrics, extract_pose};
    use crate::findings::{assemble_report, generate_batting_findings};

    fn new_session() -> NewSession {
        NewSession {
            owner_id: "owner-1".into(),
            title: "Nets session".into(),
            player_ids: vec!["player-1".into()],
            notes: None,
            analysis_context: Some("batting".into()),
            camera_view: None,
        }
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = InMemoryJobStore::new();
        let session = store.create_session(new_session()).await.unwrap();
        let job = store.create_job(session.id, "owner-1/s/j.mp4".into(), 30, false, None).await.unwrap();
        store.transition_to_queued(job.id).await.unwrap();

        let first = store.claim_job(job.id).await.unwrap();
        assert!(first.is_some());
        let second = store.claim_job(job.id).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn complete_upload_is_idempotent_once_queued() {
        let store = InMemoryJobStore::new();
        let session = store.create_session(new_session()).await.unwrap();
        let job = store.create_job(session.id, "owner-1/s/j.mp4".into(), 30, false, None).await.unwrap();
        store.transition_to_queued(job.id).await.unwrap();

        let err = store.transition_to_queued(job.id).await.unwrap_err();
        assert!(matches!(err, JobStoreError::PreconditionFailed(_)));
        assert_eq!(store.peek_job_status(job.id).await.unwrap(), JobStatus::Queued);
    }

    #[tokio::test]
    async fn full_pipeline_reaches_done_with_artifacts() {
        let store = InMemoryJobStore::new();
        let session = store.create_session(new_session()).await.unwrap();
        let job = store.create_job(session.id, "owner-1/s/j.mp4".into(), 30, false, None).await.unwrap();
        store.transition_to_queued(job.id).await.unwrap();
        store.claim_job(job.id).await.unwrap().unwrap();

        let metrics = compute_metrics(extract_pose(b"clip", 12, Pass::Quick), b"clip", 12);
        let findings = generate_batting_findings(&metrics);
        let report = assemble_report(AnalysisMode::Batting, Pass::Quick, &findings);
        store
            .persist_quick_and_advance(job.id, AnalysisMode::Batting, serde_json::json!({}), findings, report, None)
            .await
            .unwrap();

        store.transition_to_deep_running(job.id).await.unwrap();

        let deep_metrics = compute_metrics(extract_pose(b"clip", 60, Pass::Deep), b"clip", 60);
        let deep_findings = generate_batting_findings(&deep_metrics);
        let deep_report = assemble_report(AnalysisMode::Batting, Pass::Deep, &deep_findings);
        let done = store
            .persist_deep_and_complete(job.id, AnalysisMode::Batting, serde_json::json!({}), deep_findings, deep_report, None)
            .await
            .unwrap();

        assert_eq!(done.status, JobStatus::Done);
        assert!(done.deep_findings.is_some());
        assert!(done.deep_report.is_some());
        assert_eq!(
            done.deep_results.as_ref().and_then(|r| r.get("analysis_mode_used")).and_then(|v| v.as_str()),
            Some("batting")
        );
    }

    #[tokio::test]
    async fn reap_stale_claims_returns_crashed_jobs_to_queued() {
        let store = InMemoryJobStore::new();
        let session = store.create_session(new_session()).await.unwrap();
        let job = store.create_job(session.id, "owner-1/s/j.mp4".into(), 30, false, None).await.unwrap();
        store.transition_to_queued(job.id).await.unwrap();
        let claimed = store.claim_job(job.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::QuickRunning);

        // Not yet stale: a generous threshold finds nothing to reap.
        let reaped = store.reap_stale_claims(chrono::Duration::hours(1)).await.unwrap();
        assert!(reaped.is_empty());
        assert_eq!(store.peek_job_status(job.id).await.unwrap(), JobStatus::QuickRunning);

        // Backdate the claim to simulate a worker that crashed a while ago.
        {
            let mut jobs = store.jobs.lock().await;
            jobs.get_mut(&job.id).unwrap().updated_at = Utc::now() - chrono::Duration::hours(2);
        }

        let reaped = store.reap_stale_claims(chrono::Duration::minutes(30)).await.unwrap();
        assert_eq!(reaped, vec![job.id]);
        assert_eq!(store.peek_job_status(job.id).await.unwrap(), JobStatus::Queued);

        // Idempotent: a job already back in `queued` isn't reaped again.
        let reaped_again = store.reap_stale_claims(chrono::Duration::minutes(30)).await.unwrap();
        assert!(reaped_again.is_empty());
    }
}
