//! Wall-clock helpers shared by the processor and the leaderboard.

use std::time::SystemTime;

/// Current wall-clock time as whole seconds since the Unix epoch.
#[inline]
pub(crate) fn unix_time_seconds() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
