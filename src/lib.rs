//! Library entry for decman exposing the reconciliation core for the binary and integration tests.

pub mod build;
pub mod cache;
pub mod command;
pub mod config;
pub mod error;
pub mod index;
pub mod logic;
pub mod modules;
pub mod plugin;
pub mod sources;
pub mod store;
pub mod util;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
