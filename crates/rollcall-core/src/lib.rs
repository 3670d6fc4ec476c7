//! rollcall-core — Embedding types, roster matching, and capture capability traits.
//!
//! The face detection/embedding model itself is an external capability; this
//! crate only defines the fixed-length embedding vector, the per-class roster,
//! and the Euclidean matcher that maps a probe embedding to an enrolled
//! student.

pub mod capture;
pub mod frame;
pub mod matcher;
pub mod types;

pub use capture::{CaptureError, EmbeddingProvider, FrameSource, ProviderError};
pub use frame::Frame;
pub use matcher::{EuclideanMatcher, Matcher, RosterMatch};
pub use types::{validate_roster, AttendanceStatus, Embedding, Enrollment, RosterError};
