//! pkgstore-lib: shared package store for a Node.js package manager
//!
//! The store keeps one copy of every installed package version and a
//! reference-counted graph of who uses what:
//! - `StoreGraph`: forward and reverse dependency edges, persisted as `store.json`
//! - `plan_uninstall`: cascading removal of entries nobody uses any more
//! - `StoreController`: the locked, single writer of a store
//! - `StoreServer`: shares one controller between many package manager runs

pub mod bins;
pub mod config;
pub mod consts;
pub mod context;
pub mod controller;
pub mod fetch;
pub mod graph;
pub mod manifest;
pub mod planner;
pub mod platform;
pub mod repository;
pub mod server;
pub mod store_lock;
