//! Stable exit codes for relay CLI commands.

/// Turn succeeded or the command completed.
pub const OK: i32 = 0;
/// Turn failed (execution error, spawn failure, unexpected exit) or the command errored.
pub const FAILED: i32 = 1;
/// The assistant binary is missing, incompatible or unauthenticated.
pub const NOT_READY: i32 = 2;
/// The turn exceeded its timeout.
pub const TIMED_OUT: i32 = 3;
/// The turn was aborted (Ctrl-C).
pub const ABORTED: i32 = 4;
