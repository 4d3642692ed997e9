//! Core domain + application logic for the Telegram archive exporter.
//!
//! This crate is intentionally framework-agnostic. Telegram, S3 and HTTP live
//! behind ports (traits) implemented in adapter crates.

pub mod archive;
pub mod config;
pub mod domain;
pub mod errors;
pub mod fetcher;
pub mod logging;
pub mod orchestrator;
pub mod policy;
pub mod ports;
pub mod scheduler;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
