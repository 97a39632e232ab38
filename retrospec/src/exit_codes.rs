//! Stable exit codes for retrospec CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid arguments, configuration or input; `validate` found a violation.
pub const INVALID: i32 = 1;
/// The search ran but failed: infrastructure error or no usable candidate.
pub const FAILED: i32 = 3;
/// Interrupted by the user.
pub const CANCELLED: i32 = 130;
