use rollcall_core::{AttendanceStatus, Embedding, Enrollment};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
}

impl ApiError {
    /// Whether a retry later could reasonably succeed. The sync engine
    /// retries regardless; this only informs log severity.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ApiError::Status { status, .. } => *status >= 500,
        }
    }
}

/// Session handle issued by `POST attendance/start-session`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub class_id: String,
    /// `YYYY-MM-DD`, wall-clock local on the server.
    pub date: String,
    /// ISO-8601 instant.
    pub start_time: String,
}

/// One attendance mark inside a batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentMark {
    pub student_id: String,
    pub status: AttendanceStatus,
    /// `HH:mm:ss`, wall-clock local, captured when the mark was produced.
    pub time: String,
    pub captured_offline: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRequest {
    pub session_id: String,
    pub class_id: String,
    pub recognized_students: Vec<StudentMark>,
}

/// Per-record outcome of a mark submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkStatus {
    Saved,
    /// The (studentId, classId, date, sessionId) tuple was already recorded.
    /// Success-equivalent: never retried, never surfaced as an error.
    Duplicate,
    Error,
}

impl MarkStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MarkStatus::Saved | MarkStatus::Duplicate)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkResult {
    pub student_id: String,
    pub status: MarkStatus,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkResponse {
    pub success: bool,
    pub results: Vec<MarkResult>,
}

impl MarkResponse {
    /// True when every record was saved or was a known duplicate.
    pub fn all_accepted(&self) -> bool {
        self.results.iter().all(|r| r.status.is_accepted())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    pub full_name: String,
    pub roll_no: String,
    pub class_id: String,
    pub embedding_float_array: Vec<f32>,
    pub embedding_version: i64,
}

/// Generic `{ success: ... }` acknowledgement body.
#[derive(Debug, Clone, Deserialize)]
pub struct Ack {
    pub success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartSessionRequest {
    pub class_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EndSessionRequest {
    pub session_id: String,
}

/// Roster entry as delivered by `GET students/embeddings/:classId`.
/// The embedding arrives decrypted and lives only in session memory.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RosterStudent {
    pub id: String,
    pub full_name: String,
    pub roll_no: String,
    pub embedding: Vec<f32>,
    #[serde(default = "default_embedding_version")]
    pub embedding_version: i64,
}

fn default_embedding_version() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RosterResponse {
    pub students: Vec<RosterStudent>,
}

impl From<RosterStudent> for Enrollment {
    fn from(s: RosterStudent) -> Self {
        Enrollment {
            student_id: s.id,
            full_name: s.full_name,
            roll_no: s.roll_no,
            embedding: Embedding::new(s.embedding),
            embedding_version: s.embedding_version,
        }
    }
}
