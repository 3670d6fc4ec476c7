//! rollcall-sync — Background reconciliation of the offline queue.
//!
//! A single [`SyncEngine`] instance owns the drain lifecycle for the whole
//! client: constructed once at startup, it drains on a fixed interval, on
//! connectivity-regained events, and on manual invocation, with an atomic
//! guard ensuring at most one drain pass at a time.

mod connectivity;
mod engine;

pub use connectivity::Connectivity;
pub use engine::{DrainReport, SyncEngine};
