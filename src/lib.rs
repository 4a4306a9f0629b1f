//! drover: a test-orchestration core.
//!
//! Discovers suites, resolves fixtures, expands tests across projects and
//! schedules the resulting units on a pool of async workers with retries
//! and timeouts. Results stream to reporter sinks.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod driver;
pub mod fixture;
pub mod matrix;
pub mod report;
pub mod runner;
pub mod suite;
