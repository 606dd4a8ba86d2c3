//! Stable exit codes for the testloop CLI.

/// Generated tests pass (or `detect` completed).
pub const OK: i32 = 0;
/// The iteration cap was reached with tests still failing.
pub const GAVE_UP: i32 = 1;
/// Could not start: unreadable input, invalid config or arguments.
pub const INVALID: i32 = 2;
/// The run aborted mid-loop (completion failure, unusable output, I/O).
pub const ABORTED: i32 = 3;
