// Process exit codes
//
// A session ended early by the operator is a normal outcome and exits with
// SUCCESS as long as everything was saved.

pub const SUCCESS: i32 = 0;

/// Unexpected failure inside the tool
pub const EXECUTION_ERROR: i32 = 1;

/// Bad arguments, configuration, or unreadable input files
pub const INPUT_ERROR: i32 = 2;

/// Recording ran but the device failed mid-session, an export failed, or
/// inspected files disagree
pub const PARTIAL_FAILURE: i32 = 3;

/// The device could not be started; nothing was recorded
pub const DEVICE_ERROR: i32 = 4;
