//! CLI integration tests for pkgstore.

mod common;
mod install_tests;
mod prune_tests;
mod uninstall_tests;
