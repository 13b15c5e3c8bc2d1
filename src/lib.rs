#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]

//! Incremental build engine core for large Fortran/C scientific codebases.
//!
//! A content-addressed pipeline: source files are analysed once per content hash, symbols are
//! resolved into per-target build trees, and object files are compiled once per
//! (source, flags, module-interface) fingerprint. Re-running the pipeline over an unchanged
//! workspace does no compiler work at all.

#[macro_use]
extern crate tracing;

pub mod error;

pub mod analysis;
pub mod cache;
pub mod config;
pub mod hasher;
pub mod pipeline;
pub mod report;
pub mod scheduler;
pub mod store;
pub mod symbols;
pub mod tools;
pub mod utils;

pub use config::Config;
pub use error::{AggregatedError, Error, Result, Warning};
pub use pipeline::Pipeline;
pub use store::Store;

/// Installs a `tracing-subscriber` fmt layer for tests that exercise more than one module end to
/// end, so a failing run prints its `tracing` output instead of it going nowhere. Safe to call
/// from more than one test; only the first call actually installs a subscriber.
#[cfg(test)]
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
