//! Timestamp handling
//!
//! DMTP timestamps are 4-byte big-endian unsigned seconds since the Unix
//! epoch; that is also the resolution the connection tracker works at.

use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp type (seconds since Unix epoch)
pub type Timestamp = u32;

/// Get the current Unix timestamp in seconds
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as Timestamp
}
