//! rollcall-store — Durable offline queue on SQLite.
//!
//! The queue is the recovery mechanism for connectivity loss: attendance
//! marks (and enrollments) produced while offline are appended here and
//! drained later by the sync engine. Entries survive process restart;
//! single-writer per client instance.

mod queue;

pub use queue::{
    AttendanceIntent, EnrollmentIntent, NewAttendanceIntent, NewEnrollmentIntent, OfflineQueue,
    StoreError,
};
