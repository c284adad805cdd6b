//! Stable exit codes for hostrun CLI commands.

/// Command succeeded; for `run`, every host succeeded.
pub const OK: i32 = 0;
/// Fatal error before any host was contacted (settings, inventory, I/O).
pub const INVALID: i32 = 1;
/// `hostrun run` finished but at least one host failed.
pub const HOST_FAILED: i32 = 2;
/// `hostrun run` was declined at the confirmation prompt.
pub const CANCELLED: i32 = 3;
