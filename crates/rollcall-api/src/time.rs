//! Wall-clock time formatting for the wire contract.
//!
//! The service exchanges local wall-clock strings with no timezone encoding;
//! mark times are `HH:mm:ss`. Dates are server-derived from the session.

use chrono::Local;

/// Current time of day, `HH:mm:ss`, local wall clock.
pub fn time_of_day() -> String {
    Local::now().format("%H:%M:%S").to_string()
}
