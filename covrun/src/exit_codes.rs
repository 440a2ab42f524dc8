//! Stable exit codes for covrun CLI commands.

/// Tests passed and coverage (if requested) was collected.
pub const OK: i32 = 0;
/// The run completed but a phase or the tests reported failure.
pub const FAILED: i32 = 1;
/// Invalid arguments, config, or files; nothing was run.
pub const INVALID: i32 = 2;
