use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Face embedding vector (typically 128-dimensional).
///
/// The dimension is fixed by the provider model, not by this crate; rosters
/// are validated for internal consistency only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Dimensions must match; callers are expected to have validated the
    /// roster. Mismatched inputs compare only the overlapping prefix, which
    /// the matcher never relies on (it skips mismatched entries).
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Attendance status for one student in one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "excused" => Ok(AttendanceStatus::Excused),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One enrolled student in a class roster, fetched once per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    /// Server-assigned stable identity id.
    pub student_id: String,
    pub full_name: String,
    pub roll_no: String,
    pub embedding: Embedding,
    pub embedding_version: i64,
}

#[derive(Error, Debug)]
pub enum RosterError {
    #[error(
        "embedding dimension mismatch for student {student_id}: expected {expected}, got {actual}"
    )]
    DimensionMismatch {
        student_id: String,
        expected: usize,
        actual: usize,
    },
    #[error("student {student_id} has an empty embedding")]
    EmptyEmbedding { student_id: String },
}

/// Validate that every roster embedding has the same, non-zero dimension.
///
/// Embedding length is constant across all enrollments within a session;
/// a mismatch is a hard error surfaced before the session goes active.
/// An empty roster is valid (the matcher simply never matches).
pub fn validate_roster(roster: &[Enrollment]) -> Result<(), RosterError> {
    let Some(first) = roster.first() else {
        return Ok(());
    };
    let expected = first.embedding.dim();

    for entry in roster {
        let dim = entry.embedding.dim();
        if dim == 0 {
            return Err(RosterError::EmptyEmbedding {
                student_id: entry.student_id.clone(),
            });
        }
        if dim != expected {
            return Err(RosterError::DimensionMismatch {
                student_id: entry.student_id.clone(),
                expected,
                actual: dim,
            });
        }
    }

    Ok(())
}
