//! Exit codes for the CLI.
//!
//! These follow common Unix conventions so scripts can tell failures apart.

/// Successful execution
pub const SUCCESS: u8 = 0;

/// General/unspecified error
pub const GENERAL_ERROR: u8 = 1;

/// Access to the location was refused
pub const PERMISSION_DENIED: u8 = 5;

/// Another process held the item for longer than the lock timeout
pub const BUSY: u8 = 6;

/// File, directory or bookmark not found
pub const NOT_FOUND: u8 = 7;

/// Operation cancelled by the user
pub const CANCELLED: u8 = 8;
