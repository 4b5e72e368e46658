//! End-to-end tests of the store library against real temp directories.

mod common;
mod lock_tests;
mod server_tests;
mod uninstall_tests;
