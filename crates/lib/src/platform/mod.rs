//! Platform-specific directories and filesystem helpers.

pub mod fs;
pub mod paths;
