//! Stable exit codes for grader CLI commands.

/// A scored report was produced (regardless of how many points it earned).
pub const OK: i32 = 0;
/// Invalid invocation, unreadable config, or another host-side failure.
pub const INVALID: i32 = 1;
/// The submission manifest was missing, malformed, or incomplete.
pub const MANIFEST_ERROR: i32 = 2;
