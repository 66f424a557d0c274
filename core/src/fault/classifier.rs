use crate::error::CoreError;
use crate::model::build::FailureReason;
use std::io::ErrorKind;

// ENOSPC on Linux and macOS.
const ENOSPC: i32 = 28;

const TIMEOUT_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "deadline exceeded",
    "maximum execution time",
    "attempt budget",
];
const DISK_FULL_MARKERS: &[&str] = &[
    "no space left",
    "disk full",
    "disk quota exceeded",
    "not enough space",
];
const SOURCE_READ_MARKERS: &[&str] = &[
    "failed to read object",
    "unable to read",
    "error reading",
    "getobject",
    "nosuchkey",
    "no such key",
];
const PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "access denied",
    "accessdenied",
    "forbidden",
    "not authorized",
    "unauthorized",
];

/// Maps a build fault onto the fixed failure taxonomy.
///
/// Typed variants decide first; anything else falls back to the message text.
pub fn classify(err: &CoreError) -> FailureReason {
    match err {
        CoreError::Timeout(_) => FailureReason::TIMEOUT,
        CoreError::SourceRead { .. } => FailureReason::S3_READ_ERROR,
        CoreError::PermissionDenied(_) => FailureReason::PERMISSION_ERROR,
        CoreError::Io(io) => match io.kind() {
            ErrorKind::TimedOut => FailureReason::TIMEOUT,
            ErrorKind::PermissionDenied => FailureReason::PERMISSION_ERROR,
            _ if io.raw_os_error() == Some(ENOSPC) => FailureReason::DISK_FULL,
            _ => classify_message(&io.to_string()),
        },
        other => classify_message(&other.to_string()),
    }
}

/// Classification for faults reported back as text, e.g. by the queue when it
/// kills an attempt that ran past its budget.
pub fn classify_message(message: &str) -> FailureReason {
    let m = message.to_ascii_lowercase();
    let hit = |markers: &[&str]| markers.iter().any(|k| m.contains(k));
    if hit(TIMEOUT_MARKERS) {
        FailureReason::TIMEOUT
    } else if hit(DISK_FULL_MARKERS) {
        FailureReason::DISK_FULL
    } else if hit(PERMISSION_MARKERS) {
        // Store errors name the failed call ("GetObject"), so this goes first.
        FailureReason::PERMISSION_ERROR
    } else if hit(SOURCE_READ_MARKERS) {
        FailureReason::S3_READ_ERROR
    } else {
        FailureReason::UNKNOWN
    }
}
