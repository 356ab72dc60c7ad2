use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use utoipa::ToSchema;
use uuid::Uuid;

/// Coarse lifecycle state of a `Session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Uploaded,
    Processing,
    Ready,
    Failed,
}

/// `AnalysisJob.status`, following the state machine in the spec (§4.2).
///
/// `Completed` is kept as a legacy alias of `Done`; both are treated as
/// terminal-success by the `ExportGate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    AwaitingUpload,
    Queued,
    QuickRunning,
    QuickDone,
    DeepRunning,
    Done,
    Completed,
    Failed,
}

impl JobStatus {
    /// The snake_case wire name (matches `#[serde(rename_all = "snake_case")]`
    /// above), for rendering into messages callers see — never `{:?}`,
    /// which would leak the PascalCase Rust variant name instead.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::AwaitingUpload => "awaiting_upload",
            JobStatus::Queued => "queued",
            JobStatus::QuickRunning => "quick_running",
            JobStatus::QuickDone => "quick_done",
            JobStatus::DeepRunning => "deep_running",
            JobStatus::Done => "done",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Jobs in this state may be handed a queue message by a worker claim.
    pub fn is_claimable(self) -> bool {
        matches!(self, JobStatus::Queued)
    }

    /// Terminal success states accepted by the ExportGate.
    pub fn is_terminal_success(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Completed)
    }

    /// `CompleteUpload` is a no-op for jobs already past the preflight step.
    pub fn is_already_dispatched(self) -> bool {
        matches!(
            self,
            JobStatus::Queued
                | JobStatus::QuickRunning
                | JobStatus::QuickDone
                | JobStatus::DeepRunning
                | JobStatus::Done
                | JobStatus::Completed
        )
    }
}

/// The coaching specialization a job is analyzed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Batting,
    Bowling,
    Wicketkeeping,
    Fielding,
}

impl AnalysisMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisMode::Batting => "batting",
            AnalysisMode::Bowling => "bowling",
            AnalysisMode::Wicketkeeping => "wicketkeeping",
            AnalysisMode::Fielding => "fielding",
        }
    }

    pub fn report_title(self) -> String {
        let label = match self {
            AnalysisMode::Batting => "Batting",
            AnalysisMode::Bowling => "Bowling",
            AnalysisMode::Wicketkeeping => "Wicketkeeping",
            AnalysisMode::Fielding => "Fielding",
        };
        format!("{label} Analysis Report")
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "batting" => Some(AnalysisMode::Batting),
            "bowling" => Some(AnalysisMode::Bowling),
            "wicketkeeping" => Some(AnalysisMode::Wicketkeeping),
            "fielding" => Some(AnalysisMode::Fielding),
            _ => None,
        }
    }
}

impl Default for AnalysisMode {
    fn default() -> Self {
        AnalysisMode::Batting
    }
}

/// User-visible container for one video and its analysis (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub id: Uuid,
    pub owner_id: String,
    pub title: String,
    pub player_ids: Vec<String>,
    pub notes: Option<String>,
    pub analysis_context: Option<String>,
    pub camera_view: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A structured coaching observation keyed by a stable code (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Finding {
    /// Uppercase stable identifier, e.g. `HEAD_MOVEMENT`.
    pub code: String,
    pub title: String,
    pub severity: Severity,
    pub message: String,
    pub why_matters: String,
    pub evidence: serde_json::Value,
    /// At most 3 suggested drills.
    pub suggested_drills: Vec<String>,
    pub phase: Option<AnalysisPhase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisPhase {
    Quick,
    Deep,
}

/// Output of a mode-specific findings generator (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Findings {
    pub findings: Vec<Finding>,
    pub overall_level: Severity,
}

/// Assembled prose accompanying a `Findings` set.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Report {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<serde_json::Value>,
}

/// One attempted analysis over one session's video (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub session_id: Uuid,
    pub status: JobStatus,
    pub stage: String,
    pub progress_pct: i32,
    pub analysis_mode: Option<AnalysisMode>,
    pub sample_fps: i32,
    pub include_frames: bool,
    pub s3_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,

    pub quick_results: Option<serde_json::Value>,
    pub deep_results: Option<serde_json::Value>,
    pub quick_findings: Option<Findings>,
    pub quick_report: Option<Report>,
    pub deep_findings: Option<Findings>,
    pub deep_report: Option<Report>,
    pub quick_results_s3_key: Option<String>,
    pub deep_results_s3_key: Option<String>,
}

/// Queue wire payload (spec §6): `{job_id: string}`, nothing else. The
/// worker treats JobStore as the source of truth for every other parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJobMessage {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T: ToSchema> {
    pub items: Vec<T>,
    pub total_count: i64,
    pub limit: i64,
    pub offset: i64,
}
