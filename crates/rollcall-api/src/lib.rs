//! rollcall-api — Client for the remote attendance service.
//!
//! The remote service is a black box with a small contract: session
//! lifecycle, an idempotent batch mark endpoint, a per-class roster fetch,
//! and student enrollment. Duplicate submissions of the same
//! (studentId, classId, date, sessionId) tuple are reported as `duplicate`
//! and are success-equivalent.

mod client;
pub mod time;
mod types;

pub use client::{ApiClient, AttendanceService};
pub use types::{
    Ack, ApiError, EnrollRequest, MarkRequest, MarkResponse, MarkResult, MarkStatus, SessionInfo,
    StudentMark,
};
